//! Global Escape key handling.
//!
//! Uses rdev for cross-platform global key listening, so Escape stops the
//! watch loop whether or not the terminal or the preview window has focus.

use rdev::{listen, Event, EventType, Key};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::cancel::CancelToken;

/// A key event the watch loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Stop watching
    Quit,
}

impl HotkeyEvent {
    /// Map a pressed key to a hotkey, if it is one.
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::Escape => Some(HotkeyEvent::Quit),
            _ => None,
        }
    }
}

/// Listens for Escape and cancels a token when it is pressed.
pub struct EscapeListener {
    cancel: CancelToken,
    /// Set once the listener should ignore further events
    stop_flag: Arc<AtomicBool>,
    listener_thread: Option<JoinHandle<()>>,
}

impl EscapeListener {
    pub fn new(cancel: CancelToken) -> Self {
        EscapeListener {
            cancel,
            stop_flag: Arc::new(AtomicBool::new(false)),
            listener_thread: None,
        }
    }

    /// Start listening on a background thread.
    ///
    /// Returns an error if the listener is already running.
    pub fn start(&mut self) -> Result<(), String> {
        if self.listener_thread.is_some() {
            return Err("Hotkey listener already running".to_string());
        }

        let cancel = self.cancel.clone();
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = thread::Builder::new()
            .name("hotkeys".to_string())
            .spawn(move || {
                let callback = move |event: Event| {
                    if stop_flag.load(Ordering::SeqCst) {
                        return;
                    }
                    if let EventType::KeyPress(key) = event.event_type {
                        handle_key(key, &cancel);
                    }
                };

                // Blocks for the life of the process. On macOS this needs
                // Accessibility permission.
                if let Err(e) = listen(callback) {
                    log::warn!("Hotkey listener error: {:?}", e);
                }
            })
            .map_err(|e| e.to_string())?;

        self.listener_thread = Some(handle);
        Ok(())
    }

    /// Stop reacting to keys.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        // rdev's listen() cannot be interrupted, so the thread is detached
        // and lives until the process exits.
        self.listener_thread = None;
    }

    pub fn is_running(&self) -> bool {
        self.listener_thread.is_some()
    }
}

impl Drop for EscapeListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_key(key: Key, cancel: &CancelToken) {
    if let Some(HotkeyEvent::Quit) = HotkeyEvent::from_key(key) {
        if !cancel.is_cancelled() {
            log::info!("Escape pressed, stopping");
        }
        cancel.cancel();
    }
}
