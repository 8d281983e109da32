//! One-shot motion alerts.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

/// Default tone pitch.
pub const DEFAULT_FREQUENCY_HZ: u32 = 1000;

/// Default tone length.
pub const DEFAULT_DURATION_MS: u64 = 200;

/// Errors from an alert sink. Callers log these; they never stop recording.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert output unavailable: {0}")]
    Unavailable(String),
    #[error("Alert player exited with code {0:?}")]
    PlayerFailed(Option<i32>),
    #[error("Failed to emit alert: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives one notification per recording trigger.
pub trait AlertSink {
    fn alert(&mut self) -> Result<(), AlertError>;
}

/// How the user is notified of motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// Sine tone through ffplay
    #[default]
    Tone,
    /// Terminal bell
    Bell,
    /// No alert
    Off,
}

/// Alert configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertSettings {
    pub mode: AlertMode,
    pub frequency_hz: u32,
    pub duration: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            mode: AlertMode::default(),
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            duration: Duration::from_millis(DEFAULT_DURATION_MS),
        }
    }
}

/// Build the alert sink selected by `settings`.
pub fn create_alert(settings: &AlertSettings) -> Box<dyn AlertSink + Send> {
    match settings.mode {
        AlertMode::Tone => Box::new(ToneAlert::new(settings.frequency_hz, settings.duration)),
        AlertMode::Bell => Box::new(TerminalBell),
        AlertMode::Off => Box::new(SilentAlert),
    }
}

/// Plays a fixed sine tone with ffplay, blocking until it ends.
///
/// Falls back to the terminal bell once ffplay turns out to be missing.
#[derive(Debug, Clone)]
pub struct ToneAlert {
    frequency_hz: u32,
    duration: Duration,
    player_missing: bool,
}

impl ToneAlert {
    pub fn new(frequency_hz: u32, duration: Duration) -> Self {
        Self {
            frequency_hz,
            duration,
            player_missing: false,
        }
    }

    pub fn player_args(&self) -> Vec<String> {
        vec![
            "-nodisp".to_string(),
            "-autoexit".to_string(),
            "-loglevel".to_string(),
            "quiet".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "sine=frequency={}:duration={:.3}",
                self.frequency_hz,
                self.duration.as_secs_f64()
            ),
        ]
    }
}

impl AlertSink for ToneAlert {
    fn alert(&mut self) -> Result<(), AlertError> {
        if self.player_missing {
            return TerminalBell.alert();
        }

        let status = Command::new("ffplay")
            .args(self.player_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(AlertError::PlayerFailed(status.code())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("ffplay not found, using the terminal bell for alerts");
                self.player_missing = true;
                TerminalBell.alert()
            }
            Err(e) => Err(AlertError::Io(e)),
        }
    }
}

/// Writes BEL to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl AlertSink for TerminalBell {
    fn alert(&mut self) -> Result<(), AlertError> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAlert;

impl AlertSink for SilentAlert {
    fn alert(&mut self) -> Result<(), AlertError> {
        Ok(())
    }
}
