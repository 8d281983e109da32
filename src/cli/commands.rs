//! Subcommand handlers for watch, list-devices and config actions.

use std::path::Path;

use super::args::{ConfigAction, WatchArgs};
use crate::camera::{self, CameraInput, CaptureFormat};
use crate::cancel::{install_ctrlc_handler, CancelToken};
use crate::cctv::{CctvError, CctvHandle, CctvSettings};
use crate::config::{default_path as get_config_path, Config, ConfigError, DeviceRef, DEFAULT_CONFIG};
use crate::hotkeys::EscapeListener;
use crate::orchestrator::StopReason;

/// Load the config file for `watch` and `config show`.
///
/// An explicit `--config` file must exist and parse. A broken default file
/// only produces a warning.
fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load(Some(path)),
        None => match Config::load(None) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("Failed to load config file: {}. Using default settings.", e);
                Ok(Config::default())
            }
        },
    }
}

/// Apply command-line flags on top of the config file.
pub fn apply_watch_args(config: &mut Config, args: &WatchArgs) {
    if let Some(device) = &args.device {
        config.camera.device = Some(match device.parse::<u32>() {
            Ok(index) => DeviceRef::Index(index),
            Err(_) => DeviceRef::Name(device.clone()),
        });
        // An explicit device replaces a configured input file
        config.camera.input = None;
    }
    if let Some(format) = args.format {
        config.camera.format = Some(format);
    }
    if let Some(input) = &args.input {
        config.camera.input = Some(input.clone());
    }
    if let Some(resolution) = args.resolution {
        config.camera.resolution = Some(resolution);
    }
    if let Some(fps) = args.fps {
        config.camera.fps = Some(fps);
    }
    if args.mirror {
        config.camera.mirror = Some(true);
    }
    if let Some(threshold) = args.threshold {
        config.detector.threshold = Some(threshold);
    }
    if let Some(min_area) = args.min_area {
        config.detector.min_area = Some(min_area);
    }
    if let Some(dir) = &args.output_dir {
        config.recording.output_dir = Some(dir.clone());
    }
    if let Some(duration) = args.duration {
        config.recording.duration_secs = Some(duration);
    }
    if let Some(pre_roll) = args.pre_roll {
        config.recording.pre_roll_secs = Some(pre_roll);
    }
    if let Some(codec) = args.codec {
        config.recording.codec = Some(codec);
    }
    if let Some(mode) = args.alert {
        config.alert.mode = Some(mode);
    }
    if args.no_display {
        config.display.enabled = Some(false);
    }
}

/// Run the watch loop until Ctrl+C, Escape, or the end of the input.
pub fn run_watch(args: WatchArgs) -> Result<(), CctvError> {
    let mut config = load_config(args.config.as_deref())?;
    apply_watch_args(&mut config, &args);
    let settings = config.settings()?;

    let cancel = CancelToken::new();
    if let Err(e) = install_ctrlc_handler(&cancel) {
        log::warn!("Could not set up Ctrl+C handler: {}", e);
    }

    let mut escape = EscapeListener::new(cancel.clone());
    if settings.display {
        if let Err(e) = escape.start() {
            log::warn!("Could not start hotkey listener: {}. Use Ctrl+C to stop.", e);
        }
    }

    print_watch_status(&settings);

    let handle = CctvHandle::start(settings, cancel)?;
    let result = handle.wait();
    escape.stop();

    let summary = result?;
    match &summary.stop_reason {
        StopReason::SourceFailed(msg) => eprintln!("Camera stopped: {}", msg),
        StopReason::EndOfStream => eprintln!("End of input reached."),
        StopReason::Cancelled => {}
    }
    println!(
        "Processed {} frames, recorded {} clip(s).",
        summary.frames_read,
        summary.clips.len()
    );
    for clip in &summary.clips {
        println!("  {}", clip.display());
    }
    Ok(())
}

fn print_watch_status(settings: &CctvSettings) {
    let opts = &settings.options;
    println!();
    println!("┌─────────────────────────────────────────┐");
    println!("│  motion-recorder watching               │");
    println!("├─────────────────────────────────────────┤");
    println!("│  Source:     {:<27}│", truncate(&settings.camera.input.to_string(), 27));
    println!(
        "│  Size:       {:<27}│",
        format!("{} @ {} fps", settings.camera.resolution, settings.camera.fps)
    );
    println!("│  Output:     {:<27}│", truncate(&opts.output_dir.display().to_string(), 27));
    println!(
        "│  Clips:      {:<27}│",
        format!("{:?} + {}s pre-roll, {}", opts.duration, opts.pre_roll_secs, opts.codec)
    );
    println!(
        "│  Detector:   {:<27}│",
        format!("threshold {}, min area {}", opts.detector.threshold, opts.detector.min_area)
    );
    println!("├─────────────────────────────────────────┤");
    println!("│  Stop:       Ctrl+C or Esc              │");
    println!("└─────────────────────────────────────────┘");
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let tail: String = s.chars().rev().take(max - 3).collect::<Vec<_>>().into_iter().rev().collect();
        format!("...{}", tail)
    }
}

/// List available cameras and print them to stdout.
pub fn list_devices(format: Option<CaptureFormat>) -> Result<(), CctvError> {
    let format = format.unwrap_or_else(CaptureFormat::platform_default);
    let devices = camera::list_devices(format)?;
    if devices.is_empty() {
        println!("No cameras found.");
        println!();
        println!("Make sure your camera is connected and permissions are granted.");
        println!("On macOS, grant access in System Settings > Privacy & Security > Camera.");
    } else {
        println!("Available cameras ({}):", format);
        for device in devices {
            println!("  {}", device);
        }
        println!();
        println!("Use --device <index> to select a camera.");
    }
    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction) -> Result<(), CctvError> {
    match action {
        ConfigAction::Show { config } => {
            let path = config.clone().unwrap_or_else(get_config_path);
            let settings = load_config(config.as_deref())?.settings()?;
            print!("{}", describe_settings(&settings));
            println!();
            if path.exists() {
                println!("Config file: {} (exists)", path.display());
            } else {
                println!("Config file: {} (not found)", path.display());
            }
        }
        ConfigAction::Init => {
            let path = get_config_path();
            if path.exists() {
                eprintln!("Config file already exists: {}", path.display());
                eprintln!("Use 'motion-recorder config show' to view current settings.");
                return Ok(());
            }
            write_default_config(&path)?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

/// Write the commented default config, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let io_err = |e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, DEFAULT_CONFIG).map_err(io_err)
}

/// Human readable effective settings.
pub fn describe_settings(settings: &CctvSettings) -> String {
    let opts = &settings.options;
    let source = match &settings.camera.input {
        CameraInput::Device { format, device } => format!("{} device {}", format, device),
        CameraInput::File(path) => format!("file {}", path.display()),
    };
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    format!(
        "Current configuration:
  Source: {}
  Resolution: {}
  FPS: {}
  Mirror: {}
  Threshold: {}
  Min area: {}
  Blur sigma: {}
  Dilate iterations: {}
  Output dir: {}
  Duration: {}s
  Pre-roll: {}s
  Codec: {}
  Fallback FPS: {}
  Alert: {:?} ({} Hz, {} ms)
  Display: {}
",
        source,
        settings.camera.resolution,
        settings.camera.fps,
        yes_no(settings.camera.mirror),
        opts.detector.threshold,
        opts.detector.min_area,
        opts.detector.blur_sigma,
        opts.detector.dilate_iterations,
        opts.output_dir.display(),
        opts.duration.as_secs_f64(),
        opts.pre_roll_secs,
        opts.codec,
        opts.fallback_fps,
        settings.alert.mode,
        settings.alert.frequency_hz,
        settings.alert.duration.as_millis(),
        yes_no(settings.display),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Resolution;
    use crate::recording::Codec;
    use std::path::PathBuf;

    #[test]
    fn test_cli_overrides_config_file() {
        let mut config =
            Config::parse("[camera]\nfps = 10\n[detector]\nthreshold = 40\nmin_area = 300\n", Path::new("c"))
                .unwrap();
        let args = WatchArgs {
            fps: Some(25),
            min_area: Some(900),
            codec: Some(Codec::Mp4v),
            no_display: true,
            ..Default::default()
        };
        apply_watch_args(&mut config, &args);
        let settings = config.settings().unwrap();

        assert_eq!(settings.camera.fps, 25);
        // File value survives when no flag is given
        assert_eq!(settings.options.detector.threshold, 40);
        assert_eq!(settings.options.detector.min_area, 900);
        assert_eq!(settings.options.codec, Codec::Mp4v);
        assert!(!settings.display);
        // Built-in default when neither sets it
        assert_eq!(settings.camera.resolution, Resolution::MEDIUM);
    }

    #[test]
    fn test_device_flag_replaces_configured_input() {
        let mut config = Config::parse("[camera]\ninput = \"a.mp4\"\n", Path::new("c")).unwrap();
        let args = WatchArgs {
            device: Some("3".to_string()),
            format: Some(CaptureFormat::V4l2),
            ..Default::default()
        };
        apply_watch_args(&mut config, &args);
        assert_eq!(
            config.settings().unwrap().camera.input,
            CameraInput::Device {
                format: CaptureFormat::V4l2,
                device: "3".to_string(),
            }
        );
    }

    #[test]
    fn test_write_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.recording.codec, Some(Codec::Xvid));
        assert_eq!(config.recording.output_dir, Some(PathBuf::from("recordings")));
    }

    #[test]
    fn test_describe_settings() {
        let settings = Config::default().settings().unwrap();
        let text = describe_settings(&settings);
        assert!(text.contains("Min area: 800"));
        assert!(text.contains("Codec: XVID"));
        assert!(text.contains("Duration: 10s"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("/very/long/path/to/clips", 10), "...o/clips");
    }
}
