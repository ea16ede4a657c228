//! Trait definitions for video annotation format implementations.

use std::path::{Path, PathBuf};

use crate::format::dataset::VideoDataset;
use crate::format::error::FormatError;
use crate::format::probe::{FfprobeProber, VideoProber};

/// Trait for video annotation format import/export implementations.
///
/// Each format (MOT, CVAT video, Label Studio video) implements this trait
/// to convert between its files and [`VideoDataset`]. Formats never talk to
/// each other directly.
pub trait VideoFormat: Send + Sync {
    /// Unique identifier for this format (e.g., "mot", "cvat_video").
    fn id(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// File extensions this format uses.
    fn extensions(&self) -> &[&'static str];

    /// Whether the format needs one row per visible frame.
    fn is_dense(&self) -> bool;

    /// Export a dataset to `path` (file, directory or `.zip`, depending on
    /// the format).
    fn export(
        &self,
        data: &VideoDataset,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, FormatError>;

    /// Import a dataset from `path`.
    fn import(&self, path: &Path, options: &ImportOptions) -> Result<VideoDataset, FormatError>;
}

/// Options for export operations.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Frame width override.
    pub video_width: Option<u32>,

    /// Frame height override.
    pub video_height: Option<u32>,

    /// Sequence length override.
    pub seq_length: Option<u32>,

    /// Frame rate override.
    pub frame_rate: Option<f64>,

    /// Video name written into the output (CVAT `<source>`, MOT `name`).
    pub video_name: Option<String>,

    /// Video URL for Label Studio `data.video`.
    pub video_path: Option<String>,

    /// Video file to probe when dimensions are unknown.
    pub video_file: Option<PathBuf>,

    /// Whether probing with `ffprobe` is allowed.
    pub probe: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            video_width: None,
            video_height: None,
            seq_length: None,
            frame_rate: None,
            video_name: None,
            video_path: None,
            video_file: None,
            probe: true,
        }
    }
}

impl ExportOptions {
    /// Create new export options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set explicit frame dimensions.
    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.video_width = Some(width);
        self.video_height = Some(height);
        self
    }

    /// Set the sequence length.
    pub fn seq_length(mut self, seq_length: u32) -> Self {
        self.seq_length = Some(seq_length);
        self
    }

    /// Set the frame rate.
    pub fn frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the output video name.
    pub fn video_name(mut self, name: impl Into<String>) -> Self {
        self.video_name = Some(name.into());
        self
    }

    /// Set the Label Studio video URL.
    pub fn video_path(mut self, path: impl Into<String>) -> Self {
        self.video_path = Some(path.into());
        self
    }

    /// Set the video file used for probing.
    pub fn video_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.video_file = Some(path.into());
        self
    }

    /// Enable or disable probing.
    pub fn probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    /// Prober to use, if probing is enabled.
    pub fn prober(&self) -> Option<&'static dyn VideoProber> {
        static FFPROBE: FfprobeProber = FfprobeProber;
        self.probe.then_some(&FFPROBE as &dyn VideoProber)
    }
}

/// Options for import operations.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Frame width override.
    pub video_width: Option<u32>,

    /// Frame height override.
    pub video_height: Option<u32>,

    /// Video file to probe when the source has no dimensions.
    pub video_file: Option<PathBuf>,

    /// Category used for unknown class ids.
    pub default_category: Option<String>,

    /// Whether probing with `ffprobe` is allowed.
    pub probe: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            video_width: None,
            video_height: None,
            video_file: None,
            default_category: None,
            probe: true,
        }
    }
}

impl ImportOptions {
    /// Create new import options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set explicit frame dimensions.
    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.video_width = Some(width);
        self.video_height = Some(height);
        self
    }

    /// Set the video file used for probing.
    pub fn video_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.video_file = Some(path.into());
        self
    }

    /// Set the category used for unknown class ids.
    pub fn default_category(mut self, name: impl Into<String>) -> Self {
        self.default_category = Some(name.into());
        self
    }

    /// Enable or disable probing.
    pub fn probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    /// Prober to use, if probing is enabled.
    pub fn prober(&self) -> Option<&'static dyn VideoProber> {
        static FFPROBE: FfprobeProber = FfprobeProber;
        self.probe.then_some(&FFPROBE as &dyn VideoProber)
    }
}

/// Result of an export operation.
#[derive(Debug, Default)]
pub struct ExportResult {
    /// Number of tracks exported.
    pub tracks_exported: usize,

    /// Number of rows/boxes/sequence items written.
    pub annotations_exported: usize,

    /// Warnings generated during export.
    pub warnings: Vec<FormatWarning>,

    /// Files created during export.
    pub files_created: Vec<PathBuf>,
}

impl ExportResult {
    /// Create a new export result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a warning to the result.
    pub fn add_warning(&mut self, warning: FormatWarning) {
        self.warnings.push(warning);
    }

    /// Check if there were any warnings.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Warning generated during format conversion.
#[derive(Debug, Clone)]
pub struct FormatWarning {
    /// Track this warning relates to (if applicable).
    pub track_id: Option<i64>,

    /// Human-readable warning message.
    pub message: String,

    /// Severity level of the warning.
    pub severity: WarningSeverity,
}

impl FormatWarning {
    /// Create a new warning.
    pub fn new(message: impl Into<String>, severity: WarningSeverity) -> Self {
        Self {
            track_id: None,
            message: message.into(),
            severity,
        }
    }

    /// Create an info-level warning.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, WarningSeverity::Info)
    }

    /// Create a warning-level warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, WarningSeverity::Warning)
    }

    /// Set the track this warning relates to.
    pub fn with_track(mut self, track_id: i64) -> Self {
        self.track_id = Some(track_id);
        self
    }
}

/// Severity level for format warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    /// Informational message, not a problem.
    Info,
    /// Something was skipped or modified.
    Warning,
}
