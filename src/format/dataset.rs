//! Dataset container passed between codecs.
//!
//! `VideoDataset` is what every [`VideoFormat`](crate::format::VideoFormat)
//! imports into and exports from: the flat record list plus the
//! sequence-level facts (frame size, length, rate, video name, class table)
//! that the formats store outside the per-box data.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::format::category::CategoryTable;
use crate::format::traits::FormatWarning;
use crate::format::video::VideoBBox;

/// Video annotations of one conversion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoDataset {
    /// All records, in source order.
    pub annotations: Vec<VideoBBox>,

    /// Frame width in pixels, if known.
    #[serde(default)]
    pub video_width: Option<u32>,

    /// Frame height in pixels, if known.
    #[serde(default)]
    pub video_height: Option<u32>,

    /// Number of frames in the sequence, if known.
    #[serde(default)]
    pub seq_length: Option<u32>,

    /// Frames per second, if known.
    #[serde(default)]
    pub frame_rate: Option<f64>,

    /// Name of the source video (CVAT `<source>`, MOT sequence name).
    #[serde(default)]
    pub video_name: Option<String>,

    /// Class id table (MOT `labels.txt`).
    #[serde(default)]
    pub categories: CategoryTable,

    /// Format the data was imported from.
    #[serde(default)]
    pub imported_from: Option<String>,

    /// Content skipped during import.
    #[serde(skip)]
    pub warnings: Vec<FormatWarning>,
}

impl VideoDataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset holding the given records.
    pub fn from_annotations(annotations: Vec<VideoBBox>) -> Self {
        Self {
            annotations,
            ..Self::default()
        }
    }

    /// Set the frame dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.video_width = Some(width);
        self.video_height = Some(height);
        self
    }

    /// Total number of records.
    pub fn total_annotations(&self) -> usize {
        self.annotations.len()
    }

    /// Number of distinct `(video, track)` pairs.
    pub fn track_count(&self) -> usize {
        self.annotations
            .iter()
            .map(|a| (a.video_key(), a.track_id))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// `max(frame_number) + 1` over all records.
    pub fn frame_span(&self) -> Option<u32> {
        self.annotations.iter().map(|a| a.frame_number.saturating_add(1)).max()
    }

    /// Distinct source video names carried by the records.
    pub fn source_videos(&self) -> Vec<String> {
        self.annotations
            .iter()
            .filter_map(|a| a.video_key())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}
