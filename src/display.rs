//! Live preview: overlay rendering and the mpv window.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
#[cfg(unix)]
use std::time::Duration;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::camera::{Frame, Resolution};
use crate::detector::Region;
use crate::pipeline::ChildProcess;

/// Window title and status caption.
pub const WINDOW_TITLE: &str = "Live CCTV - Motion Detection | ESC to exit";

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const REC_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// Frames queued for the preview writer before new ones are dropped.
const PREVIEW_QUEUE: usize = 2;

/// Longest a title update may block the loop.
#[cfg(unix)]
const IPC_TIMEOUT: Duration = Duration::from_millis(50);

/// A display-only copy of a frame with motion boxes drawn on it.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub image: RgbImage,
    pub caption: String,
    pub recording: bool,
}

/// Draw every region and, while recording, a red indicator.
///
/// The source frame is left untouched.
pub fn render_overlay(frame: &Frame, regions: &[Region], recording: bool) -> Overlay {
    let mut image = frame.image().clone();

    for region in regions {
        for inset in 0..BOX_THICKNESS {
            if region.width <= inset * 2 || region.height <= inset * 2 {
                break;
            }
            let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32)
                .of_size(region.width - inset * 2, region.height - inset * 2);
            draw_hollow_rect_mut(&mut image, rect, BOX_COLOR);
        }
    }

    if recording {
        let radius = (image.width().min(image.height()) / 40).max(3) as i32;
        let center = (radius * 3, radius * 3);
        draw_filled_circle_mut(&mut image, center, radius, REC_COLOR);
    }

    let caption = if recording {
        format!("● REC | {}", WINDOW_TITLE)
    } else {
        WINDOW_TITLE.to_string()
    };

    Overlay {
        image,
        caption,
        recording,
    }
}

/// Something that shows overlays to the user.
pub trait Display {
    /// Show an overlay. Must not block the caller for long; implementations
    /// may drop frames.
    fn show(&mut self, overlay: &Overlay);

    /// Tear the display down. Safe to call more than once.
    fn close(&mut self);

    /// Whether overlays are worth rendering for this display.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Headless operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl Display for NullDisplay {
    fn show(&mut self, _overlay: &Overlay) {}

    fn close(&mut self) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

struct Preview {
    resolution: Resolution,
    tx: Option<SyncSender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    process: ChildProcess,
    /// mpv's JSON IPC socket, used to retitle the window
    ipc_path: Option<PathBuf>,
}

/// Preview window backed by mpv reading rawvideo on stdin.
///
/// mpv is started on the first overlay, sized to it. Frames are handed to a
/// writer thread over a small bounded queue; when mpv falls behind, frames
/// are dropped instead of stalling the caller. The overlay caption becomes
/// the window title through mpv's IPC socket (unix only).
pub struct MpvDisplay {
    fps: f64,
    preview: Option<Preview>,
    failed: bool,
    recording: bool,
    /// Caption mpv currently shows as its title
    title: String,
    dropped: u64,
}

impl MpvDisplay {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            preview: None,
            failed: false,
            recording: false,
            title: WINDOW_TITLE.to_string(),
            dropped: 0,
        }
    }

    /// Spawn mpv and its writer thread. Disables the preview on failure.
    fn start(&mut self, resolution: Resolution) -> bool {
        let ipc_path = ipc_socket_path();
        let args = build_mpv_args(resolution, self.fps, ipc_path.as_deref());
        let mut process = match ChildProcess::spawn_writer("mpv", &args) {
            Ok(process) => process,
            Err(e) => {
                log::warn!("Preview disabled: {}", e);
                self.failed = true;
                return false;
            }
        };
        let Some(mut stdin) = process.take_stdin() else {
            log::warn!("Preview disabled: mpv stdin not captured");
            self.failed = true;
            return false;
        };

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(PREVIEW_QUEUE);
        let writer = thread::Builder::new()
            .name("preview-writer".to_string())
            .spawn(move || {
                for bytes in rx {
                    if let Err(e) = stdin.write_all(&bytes) {
                        log::debug!("Preview closed: {}", e);
                        break;
                    }
                }
            });
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Preview disabled: {}", e);
                self.failed = true;
                return false;
            }
        };

        log::debug!("Preview started at {}", resolution);
        self.preview = Some(Preview {
            resolution,
            tx: Some(tx),
            writer: Some(writer),
            process,
            ipc_path,
        });
        self.title = WINDOW_TITLE.to_string();
        true
    }
}

impl Display for MpvDisplay {
    fn show(&mut self, overlay: &Overlay) {
        if self.failed {
            return;
        }
        if overlay.recording != self.recording {
            self.recording = overlay.recording;
            log::debug!("{}", overlay.caption);
        }

        let resolution = Resolution::new(overlay.image.width(), overlay.image.height());
        if self.preview.is_none() && !self.start(resolution) {
            return;
        }
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        if preview.resolution != resolution {
            log::debug!("Skipping {} overlay on {} preview", resolution, preview.resolution);
            return;
        }
        if overlay.caption != self.title {
            if let Some(socket) = preview.ipc_path.as_deref() {
                // mpv creates the socket shortly after start; retried next frame
                match send_title(socket, &overlay.caption) {
                    Ok(()) => self.title = overlay.caption.clone(),
                    Err(e) => log::trace!("Preview title not updated: {}", e),
                }
            }
        }
        let Some(tx) = preview.tx.as_ref() else {
            return;
        };

        match tx.try_send(overlay.image.as_raw().clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
            }
            Err(TrySendError::Disconnected(_)) => {
                // Window closed by the user; keep watching without it
                log::info!("Preview window closed");
                self.close();
                self.failed = true;
            }
        }
    }

    fn close(&mut self) {
        let Some(mut preview) = self.preview.take() else {
            return;
        };
        drop(preview.tx.take());
        // Stop mpv first so a writer blocked on a full pipe sees EPIPE
        if let Err(e) = preview.process.shutdown() {
            log::warn!("Failed to stop mpv: {}", e);
        }
        if let Some(writer) = preview.writer.take() {
            let _ = writer.join();
        }
        if let Some(socket) = preview.ipc_path.take() {
            let _ = std::fs::remove_file(socket);
        }
        if self.dropped > 0 {
            log::debug!("Preview dropped {} frames", self.dropped);
        }
    }
}

impl Drop for MpvDisplay {
    fn drop(&mut self) {
        self.close();
    }
}

/// mpv arguments for an rgb24 rawvideo stream on stdin.
pub fn build_mpv_args(resolution: Resolution, fps: f64, ipc_path: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--no-cache".to_string(),
        "--untimed".to_string(),
        "--no-terminal".to_string(),
        "--force-seekable=no".to_string(),
        format!("--title={}", WINDOW_TITLE),
    ];
    if let Some(path) = ipc_path {
        args.push(format!("--input-ipc-server={}", path.display()));
    }
    args.extend([
        "--demuxer=rawvideo".to_string(),
        format!("--demuxer-rawvideo-w={}", resolution.width),
        format!("--demuxer-rawvideo-h={}", resolution.height),
        "--demuxer-rawvideo-mp-format=rgb24".to_string(),
        format!("--demuxer-rawvideo-fps={}", fps),
        "-".to_string(),
    ]);
    args
}

#[cfg(unix)]
fn ipc_socket_path() -> Option<PathBuf> {
    Some(std::env::temp_dir().join(format!("motion-recorder-mpv-{}.sock", std::process::id())))
}

#[cfg(not(unix))]
fn ipc_socket_path() -> Option<PathBuf> {
    None
}

/// Ask the mpv listening on `socket` to show `title` as its window title.
#[cfg(unix)]
pub fn send_title(socket: &Path, title: &str) -> std::io::Result<()> {
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(socket)?;
    stream.set_write_timeout(Some(IPC_TIMEOUT))?;
    let command = serde_json::json!({ "command": ["set_property", "title", title] });
    writeln!(stream, "{}", command)
}

#[cfg(not(unix))]
pub fn send_title(_socket: &Path, _title: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "mpv IPC needs a unix socket",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::new(width, height), 0)
    }

    #[test]
    fn test_overlay_draws_box_without_touching_frame() {
        let frame = black(100, 80);
        let region = Region {
            x: 10,
            y: 20,
            width: 30,
            height: 25,
            area: 900,
        };
        let overlay = render_overlay(&frame, &[region], false);

        assert_eq!(*overlay.image.get_pixel(10, 20), BOX_COLOR);
        assert_eq!(*overlay.image.get_pixel(39, 44), BOX_COLOR);
        assert_eq!(*overlay.image.get_pixel(11, 21), BOX_COLOR);
        assert_eq!(*overlay.image.get_pixel(25, 30), Rgb([0, 0, 0]));
        assert!(frame.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(overlay.caption, WINDOW_TITLE);
    }

    #[test]
    fn test_overlay_recording_indicator() {
        let frame = black(200, 160);
        let overlay = render_overlay(&frame, &[], true);
        assert!(overlay.recording);
        assert!(overlay.caption.contains("REC"));
        assert!(overlay.image.pixels().any(|p| *p == REC_COLOR));
    }

    #[test]
    fn test_tiny_region_is_drawn() {
        let frame = black(10, 10);
        let region = Region {
            x: 2,
            y: 2,
            width: 1,
            height: 1,
            area: 1,
        };
        let overlay = render_overlay(&frame, &[region], false);
        assert_eq!(*overlay.image.get_pixel(2, 2), BOX_COLOR);
    }

    #[test]
    fn test_mpv_args() {
        let args = build_mpv_args(Resolution::new(320, 240), 15.0, None);
        assert!(args.contains(&"--demuxer-rawvideo-w=320".to_string()));
        assert!(args.contains(&"--demuxer-rawvideo-h=240".to_string()));
        assert!(args.contains(&"--demuxer-rawvideo-fps=15".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--input-ipc-server")));
        assert_eq!(args.last().unwrap(), "-");

        let args = build_mpv_args(Resolution::new(320, 240), 15.0, Some(Path::new("/tmp/mpv.sock")));
        assert!(args.contains(&"--input-ipc-server=/tmp/mpv.sock".to_string()));
        assert_eq!(args.last().unwrap(), "-");
    }

    #[cfg(unix)]
    #[test]
    fn test_send_title_writes_set_property_command() {
        use std::io::{BufRead, BufReader};
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let caption = render_overlay(&black(8, 8), &[], true).caption;
        send_title(&socket, &caption).unwrap();

        let (stream, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        let command: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            command,
            serde_json::json!({ "command": ["set_property", "title", caption] })
        );
        assert!(caption.starts_with("● REC"));
    }

    #[test]
    fn test_send_title_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(send_title(&dir.path().join("missing.sock"), WINDOW_TITLE).is_err());
    }

    #[test]
    fn test_null_display() {
        let mut display = NullDisplay;
        display.show(&render_overlay(&black(4, 4), &[], false));
        display.close();
        display.close();
    }
}
