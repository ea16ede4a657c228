//! Video annotation record, the intermediate representation shared by all codecs.
//!
//! Every codec imports into a flat list of [`VideoBBox`] records and exports
//! from one. A track is the frame-ordered subsequence of records that share a
//! `track_id` within one source video. Records are treated as values: the
//! coordinate transforms return new records instead of mutating in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::format::error::FormatError;

/// Category name used when a source carries no label at all.
pub const DEFAULT_CATEGORY: &str = "object";

/// Largest frame index a record may carry, so `frame_number + 1` still fits.
pub const MAX_FRAME: u32 = u32::MAX - 1;

/// 0-based index of a wire frame number counted from `base`, or `None` if it
/// falls before the first frame or past [`MAX_FRAME`].
pub fn frame_index(frame: i64, base: i64) -> Option<u32> {
    frame
        .checked_sub(base)
        .and_then(|f| u32::try_from(f).ok())
        .filter(|&f| f <= MAX_FRAME)
}

/// Category name to confidence in `[0, 1]`.
pub type Categories = BTreeMap<String, f64>;

/// How the geometry of a record is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateStyle {
    /// Fractions of the frame dimensions in `[0, 1]`.
    Normalized,
    /// Pixel units.
    #[default]
    Denormalized,
}

/// Provenance tag used to pick the interpolation policy on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Imported from a MOT `gt.txt`.
    Mot,
    /// Imported from a CVAT video XML.
    Cvat,
}

impl SourceFormat {
    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Mot => "mot",
            SourceFormat::Cvat => "cvat",
        }
    }
}

/// Format-specific side flags carried across conversions.
///
/// Flags that a codec does not promote to a first-class field land in
/// `extra` and are written back by the codecs that understand them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackMeta {
    /// Object has left the frame from this frame on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside: Option<bool>,

    /// Excluded from scoring (MOT `not_ignored == 0`).
    #[serde(default)]
    pub ignored: bool,

    /// Label Studio "interpolate to the next keyframe" flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ls_enabled: Option<bool>,

    /// Total frame count of the Label Studio video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ls_frames_count: Option<u32>,

    /// Label Studio result id the record came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ls_id: Option<String>,

    /// CVAT drawing order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_order: Option<i64>,

    /// Which codec produced the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_format: Option<SourceFormat>,

    /// Flags no codec promotes to a field (CVAT box attributes, unknown
    /// Label Studio sequence keys).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Parse the loose boolean spellings found in exported files.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Coerce a JSON flag given as bool, number or string.
pub fn coerce_flag(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        serde_json::Value::String(s) => parse_flag(s),
        _ => None,
    }
}

/// A single object's bounding box at one frame of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoBBox {
    /// Identity of the tracked object, unique per source video.
    pub track_id: i64,

    /// 0-based frame index.
    pub frame_number: u32,

    /// Authored keyframe (vs. synthesized in-between frame).
    #[serde(default = "default_true")]
    pub keyframe: bool,

    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,

    #[serde(default)]
    pub coordinate_style: CoordinateStyle,

    #[serde(default)]
    pub video_width: Option<u32>,
    #[serde(default)]
    pub video_height: Option<u32>,

    #[serde(default)]
    pub categories: Categories,

    /// 1.0 fully visible, 0.0 hidden, fractional when occluded.
    #[serde(default = "default_visibility")]
    pub visibility: f64,

    /// Degrees, pivot at the top-left corner.
    #[serde(default)]
    pub rotation: f64,

    /// Seconds from the start of the video.
    #[serde(default)]
    pub timestamp: Option<f64>,

    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub video_path: Option<String>,

    #[serde(default)]
    pub meta: TrackMeta,

    /// Identifier of the record in its source format.
    #[serde(default)]
    pub imported_id: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_visibility() -> f64 {
    1.0
}

impl VideoBBox {
    /// Create a visible keyframe with no category and unknown dimensions.
    pub fn new(
        track_id: i64,
        frame_number: u32,
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        coordinate_style: CoordinateStyle,
    ) -> Self {
        Self {
            track_id,
            frame_number,
            keyframe: true,
            left,
            top,
            width,
            height,
            coordinate_style,
            video_width: None,
            video_height: None,
            categories: Categories::new(),
            visibility: 1.0,
            rotation: 0.0,
            timestamp: None,
            filename: None,
            video_path: None,
            meta: TrackMeta::default(),
            imported_id: None,
        }
    }

    /// Add a category with full confidence.
    pub fn with_category(mut self, name: impl Into<String>) -> Self {
        self.categories.insert(name.into(), 1.0);
        self
    }

    /// Set the frame dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.video_width = Some(width);
        self.video_height = Some(height);
        self
    }

    /// Fill in frame dimensions that are not already known.
    pub fn with_fallback_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        if self.video_width.is_none_or(|w| w == 0) {
            self.video_width = width;
        }
        if self.video_height.is_none_or(|h| h == 0) {
            self.video_height = height;
        }
        self
    }

    pub fn with_visibility(mut self, visibility: f64) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_meta(mut self, meta: TrackMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether the object is absent from the frame.
    ///
    /// An explicit `outside` flag wins; otherwise zero visibility counts as
    /// outside.
    pub fn is_outside(&self) -> bool {
        self.meta.outside.unwrap_or(self.visibility <= 0.0)
    }

    /// Identity of the source video, used to group tracks.
    pub fn video_key(&self) -> Option<&str> {
        self.filename.as_deref().or(self.video_path.as_deref())
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        format!("track {} frame {}", self.track_id, self.frame_number)
    }

    fn dimensions(&self) -> Result<(f64, f64), FormatError> {
        match (self.video_width, self.video_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Ok((f64::from(w), f64::from(h))),
            (w, h) => {
                let mut missing = Vec::new();
                if w.is_none_or(|w| w == 0) {
                    missing.push("video_width");
                }
                if h.is_none_or(|h| h == 0) {
                    missing.push("video_height");
                }
                Err(FormatError::UnresolvedDimensions {
                    missing: missing.join(", "),
                    remediation: format!(
                        "Cannot convert coordinates of {} without frame dimensions; \
                         provide them explicitly or place the video next to the annotations.",
                        self.describe()
                    ),
                })
            }
        }
    }

    fn scaled(&self, sx: f64, sy: f64, style: CoordinateStyle) -> Self {
        Self {
            left: self.left * sx,
            top: self.top * sy,
            width: self.width * sx,
            height: self.height * sy,
            coordinate_style: style,
            ..self.clone()
        }
    }
}

/// Shared interface of video annotation variants.
pub trait VideoAnnotation: Sized {
    /// Current coordinate style.
    fn coordinate_style(&self) -> CoordinateStyle;

    /// Copy with geometry expressed as fractions of the frame.
    fn normalized(&self) -> Result<Self, FormatError>;

    /// Copy with geometry expressed in pixels.
    fn denormalized(&self) -> Result<Self, FormatError>;

    fn categories(&self) -> &Categories;

    /// Description naming the annotation in errors.
    fn describe(&self) -> String;

    /// File the annotation came from, for errors.
    fn source_name(&self) -> &str;

    /// The single category name, or `MultipleCategories` if there is not
    /// exactly one.
    fn ensure_has_one_category(&self) -> Result<&str, FormatError> {
        let categories = self.categories();
        if categories.len() == 1 {
            if let Some(name) = categories.keys().next() {
                return Ok(name.as_str());
            }
        }
        Err(FormatError::MultipleCategories {
            annotation: self.describe(),
            filename: self.source_name().to_string(),
            count: categories.len(),
        })
    }
}

impl VideoAnnotation for VideoBBox {
    fn coordinate_style(&self) -> CoordinateStyle {
        self.coordinate_style
    }

    fn normalized(&self) -> Result<Self, FormatError> {
        if self.coordinate_style == CoordinateStyle::Normalized {
            return Ok(self.clone());
        }
        let (w, h) = self.dimensions()?;
        Ok(self.scaled(1.0 / w, 1.0 / h, CoordinateStyle::Normalized))
    }

    fn denormalized(&self) -> Result<Self, FormatError> {
        if self.coordinate_style == CoordinateStyle::Denormalized {
            return Ok(self.clone());
        }
        let (w, h) = self.dimensions()?;
        Ok(self.scaled(w, h, CoordinateStyle::Denormalized))
    }

    fn categories(&self) -> &Categories {
        &self.categories
    }

    fn describe(&self) -> String {
        VideoBBox::describe(self)
    }

    fn source_name(&self) -> &str {
        self.video_key().unwrap_or("<unknown>")
    }
}
