//! Video probing used to fill in missing frame dimensions and lengths.
//!
//! Probing is best effort: a failure is logged and treated as "still
//! unknown". Only when the dimensions are actually needed does the caller
//! get a [`FormatError::UnresolvedDimensions`].

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::format::error::FormatError;
use crate::format::video::VideoBBox;

/// Video file extensions considered when looking for a co-located video.
pub const VIDEO_EXTENSIONS: &[&str] = &["avi", "flv", "m4v", "mkv", "mov", "mp4", "webm", "wmv"];

/// Errors from a single probe attempt.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("ffprobe binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    #[error("video file not found: {0:?}")]
    VideoNotFound(PathBuf),

    #[error("no usable video stream in {0:?}")]
    NoVideoStream(PathBuf),
}

/// Frame geometry and rate of a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Source of video metadata.
pub trait VideoProber {
    /// Width, height and frame rate of the first video stream.
    fn dimensions(&self, path: &Path) -> Result<VideoInfo, ProbeError>;

    /// Total number of frames.
    fn frame_count(&self, path: &Path) -> Result<u32, ProbeError>;
}

/// Prober that shells out to `ffprobe`.
///
/// The call is synchronous and has no timeout.
#[derive(Debug, Clone, Default)]
pub struct FfprobeProber;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
}

impl FfprobeProber {
    fn run(&self, path: &Path, extra_args: &[&str]) -> Result<FfprobeStream, ProbeError> {
        if !path.exists() {
            return Err(ProbeError::VideoNotFound(path.to_path_buf()));
        }

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-select_streams",
                "v:0",
                "-print_format",
                "json",
                "-show_streams",
            ])
            .args(extra_args)
            .arg(path)
            .output()
            .map_err(ProbeError::NotFound)?;

        if !output.status.success() {
            return Err(ProbeError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: FfprobeOutput = serde_json::from_str(&stdout)
            .map_err(|e| ProbeError::Parse(format!("{e}: {stdout}")))?;
        parsed
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))
    }
}

/// Parse an ffprobe rational frame rate such as `"30000/1001"`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 { None } else { Some(num / den) }
}

impl VideoProber for FfprobeProber {
    fn dimensions(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        let stream = self.run(path, &[])?;
        let width = stream.width.unwrap_or(0);
        let height = stream.height.unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(ProbeError::NoVideoStream(path.to_path_buf()));
        }
        let fps = stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .unwrap_or(0.0);
        Ok(VideoInfo { width, height, fps })
    }

    fn frame_count(&self, path: &Path) -> Result<u32, ProbeError> {
        let stream = self.run(path, &[])?;
        if let Some(count) = stream.nb_frames.as_deref().and_then(|n| n.parse().ok()) {
            return Ok(count);
        }
        // Containers without a frame count in the header need a full decode
        let stream = self.run(path, &["-count_frames"])?;
        stream
            .nb_read_frames
            .as_deref()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ProbeError::Parse(format!("no frame count for {path:?}")))
    }
}

/// Video file next to `reference` whose stem is `stem` (or `reference`'s).
pub fn find_video_sibling(reference: &Path, stem: Option<&str>) -> Option<PathBuf> {
    let parent = reference.parent()?;
    if !parent.is_dir() {
        return None;
    }
    let stem = match stem {
        Some(stem) => stem.to_string(),
        None => reference.file_stem()?.to_string_lossy().to_string(),
    };
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| parent.join(format!("{stem}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Probe a video, logging and discarding any failure.
pub fn probe_dimensions(prober: &dyn VideoProber, path: &Path) -> Option<VideoInfo> {
    match prober.dimensions(path) {
        Ok(info) => {
            log::debug!(
                "Probed {:?}: {}x{} @ {:.2} fps",
                path,
                info.width,
                info.height,
                info.fps
            );
            Some(info)
        }
        Err(e) => {
            log::debug!("Could not probe {:?}: {}", path, e);
            None
        }
    }
}

/// Sequence length and frame rate, each filled from a probe of `video_file`
/// when unknown. Zero values count as unknown.
pub fn resolve_timing(
    seq_length: Option<u32>,
    frame_rate: Option<f64>,
    video_file: Option<&Path>,
    prober: Option<&dyn VideoProber>,
) -> (Option<u32>, Option<f64>) {
    let seq_length = seq_length.filter(|&n| n > 0);
    let frame_rate = frame_rate.filter(|&r| r > 0.0);
    let (Some(path), Some(prober)) = (video_file, prober) else {
        return (seq_length, frame_rate);
    };

    let seq_length = seq_length.or_else(|| match prober.frame_count(path) {
        Ok(count) if count > 0 => {
            log::debug!("Probed {:?}: {} frames", path, count);
            Some(count)
        }
        Ok(_) => None,
        Err(e) => {
            log::debug!("Could not count frames of {:?}: {}", path, e);
            None
        }
    });
    let frame_rate = frame_rate.or_else(|| {
        probe_dimensions(prober, path)
            .map(|info| info.fps)
            .filter(|&r| r > 0.0)
    });
    (seq_length, frame_rate)
}

/// Frame dimensions resolved from every available source, in order:
/// explicit values, the records themselves, then a probe of `video_file`.
pub fn resolve_dimensions(
    explicit: (Option<u32>, Option<u32>),
    annotations: &[VideoBBox],
    video_file: Option<&Path>,
    prober: Option<&dyn VideoProber>,
) -> Result<(u32, u32), FormatError> {
    let known = |v: Option<u32>| v.filter(|&v| v > 0);

    let mut width =
        known(explicit.0).or_else(|| annotations.iter().find_map(|a| known(a.video_width)));
    let mut height =
        known(explicit.1).or_else(|| annotations.iter().find_map(|a| known(a.video_height)));

    if width.is_none() || height.is_none() {
        if let (Some(path), Some(prober)) = (video_file, prober) {
            if let Some(info) = probe_dimensions(prober, path) {
                width = width.or(Some(info.width));
                height = height.or(Some(info.height));
            }
        }
    }

    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => {
            let mut missing = Vec::new();
            if width.is_none() {
                missing.push("video_width");
            }
            if height.is_none() {
                missing.push("video_height");
            }
            let remediation = match video_file {
                Some(path) => format!(
                    "Probing {path:?} did not help; provide {} explicitly.",
                    missing.join(" and ")
                ),
                None => format!(
                    "Provide {} explicitly, or place the source video next to the annotation file.",
                    missing.join(" and ")
                ),
            };
            Err(FormatError::UnresolvedDimensions {
                missing: missing.join(", "),
                remediation,
            })
        }
    }
}
