//! Video annotation format import/export system.
//!
//! Every format converts to and from one intermediate representation, a flat
//! list of [`VideoBBox`] records wrapped in a [`VideoDataset`]. Formats never
//! talk to each other directly; adding one means implementing the
//! [`VideoFormat`] trait and registering it.
//!
//! ## Supported Formats
//!
//! - **MOT**: dense `gt.txt` rows, one per visible frame
//! - **CVAT video XML**: sparse keyframes with `outside` markers
//! - **Label Studio video JSON**: sparse keyframes with `enabled` flags
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trackconv::format::{ExportOptions, FormatRegistry, ImportOptions};
//!
//! let registry = FormatRegistry::new();
//! let (data, result) = registry.convert(
//!     "cvat_video",
//!     Path::new("annotations.xml"),
//!     "mot",
//!     Path::new("out/seq01"),
//!     &ImportOptions::default(),
//!     &ExportOptions::default(),
//! )?;
//! ```

pub mod archive;
mod category;
mod dataset;
pub mod densify;
mod error;
pub mod formats;
pub mod probe;
mod registry;
mod traits;
mod video;

pub use category::CategoryTable;
pub use dataset::VideoDataset;
pub use error::FormatError;
pub use probe::{FfprobeProber, ProbeError, VideoInfo, VideoProber};
pub use registry::FormatRegistry;
pub use traits::{
    ExportOptions, ExportResult, FormatWarning, ImportOptions, VideoFormat, WarningSeverity,
};
pub use video::{
    Categories, CoordinateStyle, DEFAULT_CATEGORY, SourceFormat, TrackMeta, VideoAnnotation,
    VideoBBox,
};
