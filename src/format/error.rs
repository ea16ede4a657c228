//! Error types for video annotation format operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during video annotation import/export.
#[derive(Error, Debug)]
pub enum FormatError {
    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing or serialization error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Invalid format structure or content
    #[error("Invalid format: {message}")]
    InvalidFormat {
        /// Description of the format error
        message: String,
    },

    /// A line of a line-oriented format could not be parsed
    #[error("Malformed line {line_number} ('{line}'): {reason}")]
    MalformedLine {
        /// 1-based line number within the source file
        line_number: usize,
        /// The offending line
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// Required XML attribute is missing
    #[error("Missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        /// Element the attribute belongs to
        element: String,
        /// Name of the missing attribute
        attribute: String,
    },

    /// Expected file not found in a directory or archive
    #[error("File not found: {path:?}")]
    MissingFile {
        /// Path (or archive entry) that was expected
        path: PathBuf,
    },

    /// Annotation carries more or fewer than one category
    #[error(
        "Annotation {annotation} in '{filename}' has {count} categories, exactly one is required"
    )]
    MultipleCategories {
        /// Identifies the annotation (track and frame)
        annotation: String,
        /// Source file of the annotation
        filename: String,
        /// Number of categories found
        count: usize,
    },

    /// Frame dimensions could not be determined
    #[error("Cannot determine frame dimensions. Missing: {missing}. {remediation}")]
    UnresolvedDimensions {
        /// Which of width/height is missing
        missing: String,
        /// How the caller can supply them
        remediation: String,
    },

    /// A single video name override was given for several source videos
    #[error(
        "Video name '{video_name}' given, but annotations come from {} different videos: {}",
        .sources.len(),
        .sources.join(", ")
    )]
    AmbiguousVideo {
        /// The override that was supplied
        video_name: String,
        /// The distinct source filenames found
        sources: Vec<String>,
    },

    /// Archive entry path escapes the archive root
    #[error("Unsafe path in archive: {path}")]
    UnsafeArchivePath {
        /// The rejected entry name
        path: String,
    },

    /// Frame number outside the representable range
    #[error("Invalid frame number {frame} in {context}")]
    InvalidFrame {
        /// The frame value as found in the source
        frame: i64,
        /// Where it was found
        context: String,
    },
}

impl FormatError {
    /// Create an invalid format error with a message.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Create a malformed line error.
    pub fn malformed_line(
        line_number: usize,
        line: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedLine {
            line_number,
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing attribute error.
    pub fn missing_attribute(element: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            element: element.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a missing file error.
    pub fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { path: path.into() }
    }
}
