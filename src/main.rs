use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use trackconv::config::{ConverterConfig, LogLevel};
use trackconv::format::{FormatRegistry, WarningSeverity};

/// Convert video tracking annotations between MOT, CVAT video and Label Studio video.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Format of the input annotations
    #[arg(long = "from", value_enum)]
    from: Format,

    /// Format to write
    #[arg(long = "to", value_enum)]
    to: Format,

    /// Input file, directory or archive
    input: PathBuf,

    /// Output file, directory or archive
    output: PathBuf,

    /// JSON configuration file with conversion defaults
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Frame width in pixels
    #[arg(long = "width")]
    width: Option<u32>,

    /// Frame height in pixels
    #[arg(long = "height")]
    height: Option<u32>,

    /// Number of frames in the video
    #[arg(long = "seq-length")]
    seq_length: Option<u32>,

    /// Frames per second
    #[arg(long = "frame-rate")]
    frame_rate: Option<f64>,

    /// Video name written into the output
    #[arg(long = "video-name")]
    video_name: Option<String>,

    /// Video URL for Label Studio tasks
    #[arg(long = "video-path")]
    video_path: Option<String>,

    /// Video file to probe for missing dimensions
    #[arg(long = "video-file")]
    video_file: Option<PathBuf>,

    /// Never call ffprobe
    #[arg(long = "no-probe")]
    no_probe: bool,

    /// Log level: error, warn, info, debug or trace
    #[arg(long = "log-level", value_parser = parse_log_level)]
    log_level: Option<LogLevel>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Format {
    /// MOT gt.txt, sequence directory or zip
    #[value(name = "mot")]
    Mot,
    /// CVAT for video XML or zip
    #[value(name = "cvat_video")]
    CvatVideo,
    /// Label Studio video JSON
    #[value(name = "label_studio_video")]
    LabelStudioVideo,
}

impl Format {
    fn id(self) -> &'static str {
        match self {
            Format::Mot => "mot",
            Format::CvatVideo => "cvat_video",
            Format::LabelStudioVideo => "label_studio_video",
        }
    }
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_name(s).ok_or_else(|| format!("unknown log level '{}'", s))
}

/// Config file values, overridden by command line flags.
fn merged_config(args: &Args) -> Result<ConverterConfig, String> {
    let mut config = match &args.config {
        Some(path) => ConverterConfig::load(path).map_err(|e| format!("{:?}: {}", path, e))?,
        None => ConverterConfig::default(),
    };

    config.video_width = args.width.or(config.video_width);
    config.video_height = args.height.or(config.video_height);
    config.seq_length = args.seq_length.or(config.seq_length);
    config.frame_rate = args.frame_rate.or(config.frame_rate);
    config.video_name = args.video_name.clone().or(config.video_name);
    config.video_path = args.video_path.clone().or(config.video_path);
    config.log_level = args.log_level.unwrap_or(config.log_level);
    if args.no_probe {
        config.probe_videos = false;
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match merged_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::new()
        .filter_level(config.log_level.to_level_filter())
        .parse_default_env()
        .init();

    let mut import_options = config.import_options();
    let mut export_options = config.export_options();
    if let Some(file) = &args.video_file {
        import_options.video_file = Some(file.clone());
        export_options.video_file = Some(file.clone());
    }

    let registry = FormatRegistry::new();
    let (data, result) = match registry.convert(
        args.from.id(),
        &args.input,
        args.to.id(),
        &args.output,
        &import_options,
        &export_options,
    ) {
        Ok(converted) => converted,
        Err(e) => {
            log::error!("Conversion failed: {}", e);
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for warning in data.warnings.iter().chain(&result.warnings) {
        let prefix = match warning.severity {
            WarningSeverity::Info => "info",
            WarningSeverity::Warning => "warning",
        };
        match warning.track_id {
            Some(track) => println!("{} (track {}): {}", prefix, track, warning.message),
            None => println!("{}: {}", prefix, warning.message),
        }
    }

    println!(
        "Read {} records ({} tracks over {} frames), wrote {} records ({} tracks)",
        data.total_annotations(),
        data.track_count(),
        data.frame_span().unwrap_or(0),
        result.annotations_exported,
        result.tracks_exported
    );
    for file in &result.files_created {
        println!("  {}", file.display());
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "trackconv",
            "--from",
            "cvat_video",
            "--to",
            "mot",
            "in.xml",
            "out",
            "--width",
            "640",
            "--log-level",
            "debug",
            "--no-probe",
        ]);
        assert_eq!(args.from, Format::CvatVideo);

        let config = merged_config(&args).unwrap();
        assert_eq!(config.video_width, Some(640));
        assert_eq!(config.video_height, None);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.probe_videos);
    }

    #[test]
    fn test_rejects_unknown_format() {
        let parsed = Args::try_parse_from(["trackconv", "--from", "yolo", "--to", "mot", "a", "b"]);
        assert!(parsed.is_err());
    }
}
