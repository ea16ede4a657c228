//! Label Studio video (`videorectangle`) JSON format implementation.
//!
//! A task holds one `videorectangle` result per track. Each result carries a
//! sparse `sequence` of keyframes in percent coordinates; `enabled` on a
//! keyframe says whether the editor interpolates towards the next one.
//! Frames are 1-based on the wire (0-based sequences are detected and
//! accepted).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::format::dataset::VideoDataset;
use crate::format::densify::{group_tracks, group_videos, infer_ls_enabled, max_frames_count};
use crate::format::error::FormatError;
use crate::format::probe::{
    VideoProber, find_video_sibling, probe_dimensions, resolve_dimensions, resolve_timing,
};
use crate::format::traits::{ExportOptions, ExportResult, FormatWarning, ImportOptions, VideoFormat};
use crate::format::video::{
    CoordinateStyle, DEFAULT_CATEGORY, SourceFormat, TrackMeta, VideoAnnotation, VideoBBox,
    coerce_flag, frame_index,
};

/// Result `type` of video rectangles.
pub const VIDEO_RECTANGLE: &str = "videorectangle";

/// `data.video` used when no video path is known.
pub const DEFAULT_VIDEO_PATH: &str = "/data/video.mp4";

fn default_true() -> bool {
    true
}

fn default_kind() -> String {
    VIDEO_RECTANGLE.to_string()
}

fn default_from_name() -> String {
    "box".to_string()
}

fn default_to_name() -> String {
    "video".to_string()
}

fn default_origin() -> String {
    "manual".to_string()
}

/// One keyframe of a video rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceItem {
    pub frame: i64,
    /// Percent of frame width.
    pub x: f64,
    /// Percent of frame height.
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default)]
    pub rotation: f64,
    /// Extension: object left the frame. Accepts bool, number or string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside: Option<Value>,
    /// Extension: partial visibility in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
    /// Keys this codec does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRectangleValue {
    pub sequence: Vec<SequenceItem>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(rename = "framesCount", default, skip_serializing_if = "Option::is_none")]
    pub frames_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// A `videorectangle` result: one tracked object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRectangle {
    pub id: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub value: VideoRectangleValue,
    #[serde(default)]
    pub original_width: Option<u32>,
    #[serde(default)]
    pub original_height: Option<u32>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_to_name")]
    pub to_name: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, Value>>,
}

/// One annotation of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LsAnnotation {
    #[serde(default)]
    pub result: Vec<Value>,
    #[serde(default)]
    pub ground_truth: bool,
    #[serde(default)]
    pub completed_by: Option<Value>,
}

/// A Label Studio task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LsTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub annotations: Vec<LsAnnotation>,
}

impl LsTask {
    /// `data.video`, if it is a string.
    pub fn video(&self) -> Option<&str> {
        self.data.get("video").and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Many(Vec<LsTask>),
    One(Box<LsTask>),
}

/// Stable track id for a result id: the first four bytes of its SHA-256,
/// big-endian, masked to 31 bits.
pub fn track_id_from_ls_id(id: &str) -> i64 {
    let digest = Sha256::digest(id.as_bytes());
    let prefix = [digest[0], digest[1], digest[2], digest[3]];
    i64::from(u32::from_be_bytes(prefix) & 0x7FFF_FFFF)
}

fn original_track_id(rect: &VideoRectangle) -> Option<i64> {
    let value = rect.meta.as_ref()?.get("original_track_id")?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl VideoRectangle {
    /// One record per sequence item.
    pub fn to_ir_annotations(
        &self,
        video_path: Option<&str>,
    ) -> Result<Vec<VideoBBox>, FormatError> {
        let track_id = original_track_id(self).unwrap_or_else(|| track_id_from_ls_id(&self.id));
        let base = if self.value.sequence.iter().any(|item| item.frame == 0) {
            0
        } else {
            1
        };

        let mut annotations = Vec::with_capacity(self.value.sequence.len());
        for item in &self.value.sequence {
            let frame_number =
                frame_index(item.frame, base).ok_or_else(|| FormatError::InvalidFrame {
                    frame: item.frame,
                    context: format!("Label Studio result '{}'", self.id),
                })?;

            let outside = item.outside.as_ref().and_then(coerce_flag);
            let visibility = if outside == Some(true) {
                0.0
            } else {
                item.visibility.unwrap_or(1.0)
            };

            let meta = TrackMeta {
                outside,
                ls_enabled: Some(item.enabled),
                ls_frames_count: self.value.frames_count,
                ls_id: Some(self.id.clone()),
                extra: item.extra.clone(),
                ..TrackMeta::default()
            };

            let mut ann = VideoBBox::new(
                track_id,
                frame_number,
                item.x / 100.0,
                item.y / 100.0,
                item.width / 100.0,
                item.height / 100.0,
                CoordinateStyle::Normalized,
            )
            .with_visibility(visibility)
            .with_meta(meta);

            if self.value.labels.is_empty() {
                ann = ann.with_category(DEFAULT_CATEGORY);
            }
            for label in &self.value.labels {
                ann = ann.with_category(label.clone());
            }
            ann.rotation = item.rotation;
            ann.timestamp = item.time;
            ann.video_width = self.original_width.filter(|&w| w > 0);
            ann.video_height = self.original_height.filter(|&h| h > 0);
            ann.video_path = video_path.map(str::to_string);
            ann.imported_id = Some(self.id.clone());
            annotations.push(ann);
        }
        Ok(annotations)
    }

    /// Build the result for one frame-sorted track.
    ///
    /// Outside records become `enabled: false` items, except that a
    /// CVAT-sourced outside record after a visible one is dropped (the
    /// preceding visible item already ends interpolation). `skipped` counts
    /// the dropped records.
    pub fn from_ir_annotations(
        track: &[VideoBBox],
        settings: &LsExportSettings,
        frames_count: Option<u32>,
    ) -> Result<(Self, usize), FormatError> {
        let first = track
            .first()
            .ok_or_else(|| FormatError::invalid_format("Cannot build a track from no records"))?;
        let (width, height) = resolve_dimensions(
            (settings.video_width, settings.video_height),
            track,
            None,
            None,
        )?;

        let mut labels: Vec<String> = first.categories.keys().cloned().collect();
        if labels.is_empty() {
            labels.push(DEFAULT_CATEGORY.to_string());
        }
        let id = first
            .meta
            .ls_id
            .clone()
            .or_else(|| first.imported_id.clone())
            .unwrap_or_else(|| format!("track_{}", first.track_id));

        let mut sequence = Vec::with_capacity(track.len());
        let mut seen_visible = false;
        let mut skipped = 0;

        for (i, ann) in track.iter().enumerate() {
            let outside = ann.is_outside();
            let enabled = if outside {
                if ann.meta.source_format == Some(SourceFormat::Cvat) && seen_visible {
                    skipped += 1;
                    continue;
                }
                false
            } else {
                seen_visible = true;
                infer_ls_enabled(ann, track.get(i + 1))
            };

            let norm = ann
                .clone()
                .with_fallback_dimensions(Some(width), Some(height))
                .normalized()?;
            let time = norm.timestamp.or_else(|| {
                settings
                    .frame_rate
                    .filter(|&r| r > 0.0)
                    .map(|r| f64::from(norm.frame_number) / r)
            });

            sequence.push(SequenceItem {
                frame: i64::from(norm.frame_number) + 1,
                x: norm.left * 100.0,
                y: norm.top * 100.0,
                width: norm.width * 100.0,
                height: norm.height * 100.0,
                enabled,
                time,
                rotation: norm.rotation,
                outside: outside.then_some(Value::Bool(true)),
                visibility: (!outside && norm.visibility != 1.0).then_some(norm.visibility),
                extra: norm.meta.extra.clone(),
            });
        }

        let duration = frames_count
            .zip(settings.frame_rate.filter(|&r| r > 0.0))
            .map(|(count, rate)| f64::from(count) / rate);

        let mut meta = serde_json::Map::new();
        meta.insert("original_track_id".to_string(), Value::from(first.track_id));

        Ok((
            Self {
                id,
                kind: default_kind(),
                value: VideoRectangleValue {
                    sequence,
                    labels,
                    frames_count,
                    duration,
                },
                original_width: Some(width),
                original_height: Some(height),
                from_name: default_from_name(),
                to_name: default_to_name(),
                origin: default_origin(),
                meta: Some(meta),
            },
            skipped,
        ))
    }
}

/// Settings for building tasks.
#[derive(Debug, Clone, Default)]
pub struct LsExportSettings {
    /// `data.video` for every task; only valid for a single source video.
    pub video_path: Option<String>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    /// Fallback for `framesCount` when no record carries one.
    pub seq_length: Option<u32>,
    /// Used to fill `time` and `duration`.
    pub frame_rate: Option<f64>,
}

/// Tasks built from records.
#[derive(Debug, Clone, Default)]
pub struct LsExport {
    pub tasks: Vec<LsTask>,
    pub tracks: usize,
    pub items: usize,
    pub skipped: usize,
}

impl LsExportSettings {
    /// Settings for exporting `data`: options first, then the dataset, then
    /// a probe of `options.video_file` for whatever is still missing.
    pub fn for_export(
        data: &VideoDataset,
        options: &ExportOptions,
        prober: Option<&dyn VideoProber>,
    ) -> Result<Self, FormatError> {
        let video_file = options.video_file.as_deref();
        let (seq_length, frame_rate) = resolve_timing(
            options.seq_length.or(data.seq_length),
            options.frame_rate.or(data.frame_rate),
            video_file,
            prober,
        );
        let mut settings = Self {
            video_path: options.video_path.clone(),
            video_width: options.video_width.or(data.video_width),
            video_height: options.video_height.or(data.video_height),
            seq_length,
            frame_rate,
        };

        let missing = data
            .annotations
            .iter()
            .any(|a| a.video_width.is_none() || a.video_height.is_none());
        if missing && (settings.video_width.is_none() || settings.video_height.is_none()) {
            let (w, h) = resolve_dimensions(
                (settings.video_width, settings.video_height),
                &data.annotations,
                video_file,
                prober,
            )?;
            settings.video_width = settings.video_width.or(Some(w));
            settings.video_height = settings.video_height.or(Some(h));
        }
        Ok(settings)
    }
}

/// One task per source video, one result per track.
pub fn video_ir_to_ls_tasks(
    annotations: &[VideoBBox],
    settings: &LsExportSettings,
) -> Result<LsExport, FormatError> {
    let videos = group_videos(annotations);
    if let Some(path) = &settings.video_path {
        let sources: Vec<String> = videos.keys().flatten().cloned().collect();
        if sources.len() > 1 {
            return Err(FormatError::AmbiguousVideo {
                video_name: path.clone(),
                sources,
            });
        }
    }

    let mut export = LsExport::default();
    for (video, records) in videos {
        let frames_count = max_frames_count(&records).or(settings.seq_length);
        let mut results = Vec::new();
        for track in group_tracks(&records).values() {
            let (rect, skipped) = VideoRectangle::from_ir_annotations(track, settings, frames_count)?;
            export.tracks += 1;
            export.items += rect.value.sequence.len();
            export.skipped += skipped;
            results.push(serde_json::to_value(rect)?);
        }

        let video_path = settings
            .video_path
            .clone()
            .or(video)
            .unwrap_or_else(|| DEFAULT_VIDEO_PATH.to_string());
        let mut data = serde_json::Map::new();
        data.insert("video".to_string(), Value::String(video_path));

        export.tasks.push(LsTask {
            id: None,
            data,
            annotations: vec![LsAnnotation {
                result: results,
                ground_truth: false,
                completed_by: None,
            }],
        });
    }
    Ok(export)
}

/// Render tasks as JSON: `[]` for none, an object for one, an array
/// otherwise.
pub fn video_ir_to_ls_json(
    annotations: &[VideoBBox],
    settings: &LsExportSettings,
) -> Result<String, FormatError> {
    let export = video_ir_to_ls_tasks(annotations, settings)?;
    let json = match export.tasks.as_slice() {
        [] => "[]".to_string(),
        [task] => serde_json::to_string_pretty(task)?,
        tasks => serde_json::to_string_pretty(tasks)?,
    };
    Ok(json)
}

fn tasks_to_video_ir(tasks: &[LsTask]) -> Result<(Vec<VideoBBox>, Vec<FormatWarning>), FormatError> {
    let mut annotations = Vec::new();
    let mut warnings = Vec::new();

    for task in tasks {
        for result in task.annotations.iter().flat_map(|a| &a.result) {
            let kind = result.get("type").and_then(Value::as_str).unwrap_or("<none>");
            if kind != VIDEO_RECTANGLE {
                let message = format!("Skipping unsupported Label Studio result type '{}'", kind);
                log::warn!("{}", message);
                warnings.push(FormatWarning::warning(message));
                continue;
            }
            let rect: VideoRectangle = serde_json::from_value(result.clone())?;
            annotations.extend(rect.to_ir_annotations(task.video())?);
        }
    }
    Ok((annotations, warnings))
}

/// Records of every `videorectangle` result in the tasks.
pub fn ls_tasks_to_video_ir(tasks: &[LsTask]) -> Result<Vec<VideoBBox>, FormatError> {
    Ok(tasks_to_video_ir(tasks)?.0)
}

fn parse_tasks(json: &str) -> Result<Vec<LsTask>, FormatError> {
    Ok(match serde_json::from_str(json)? {
        TaskFile::Many(tasks) => tasks,
        TaskFile::One(task) => vec![*task],
    })
}

/// Parse a task or an array of tasks.
pub fn ls_json_to_video_ir(json: &str) -> Result<Vec<VideoBBox>, FormatError> {
    ls_tasks_to_video_ir(&parse_tasks(json)?)
}

/// Label Studio video JSON format.
///
/// Supports:
/// - `videorectangle` results with multiple labels
/// - `enabled`, `outside` and `visibility` keyframe flags
/// - Single tasks and task arrays
///
/// Does not support:
/// - Other result types (skipped with warning)
pub struct LabelStudioVideoFormat;

impl VideoFormat for LabelStudioVideoFormat {
    fn id(&self) -> &'static str {
        "label_studio_video"
    }

    fn display_name(&self) -> &'static str {
        "Label Studio video (JSON)"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn is_dense(&self) -> bool {
        false
    }

    fn export(
        &self,
        data: &VideoDataset,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, FormatError> {
        log::info!("Exporting Label Studio video annotations to {:?}", path);
        let mut result = ExportResult::new();

        let settings = LsExportSettings::for_export(data, options, options.prober())?;
        let export = video_ir_to_ls_tasks(&data.annotations, &settings)?;
        if export.skipped > 0 {
            result.add_warning(FormatWarning::info(format!(
                "Dropped {} CVAT outside markers already implied by disabled interpolation",
                export.skipped
            )));
        }

        let json = match export.tasks.as_slice() {
            [] => "[]".to_string(),
            [task] => serde_json::to_string_pretty(task)?,
            tasks => serde_json::to_string_pretty(tasks)?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;

        result.tracks_exported = export.tracks;
        result.annotations_exported = export.items;
        result.files_created.push(path.to_path_buf());

        log::info!(
            "Label Studio video export complete: {} tasks, {} tracks, {} keyframes",
            export.tasks.len(),
            result.tracks_exported,
            result.annotations_exported
        );
        Ok(result)
    }

    fn import(&self, path: &Path, options: &ImportOptions) -> Result<VideoDataset, FormatError> {
        log::info!("Importing Label Studio video annotations from {:?}", path);

        let content = std::fs::read_to_string(path)?;
        let tasks = parse_tasks(&content)?;
        let (mut annotations, warnings) = tasks_to_video_ir(&tasks)?;
        let video_name = tasks.iter().find_map(|t| t.video().map(str::to_string));

        let mut width = options.video_width;
        let mut height = options.video_height;
        let needs_size = annotations
            .iter()
            .any(|a| a.video_width.is_none() || a.video_height.is_none());
        if needs_size && (width.is_none() || height.is_none()) {
            let stem = video_name
                .as_deref()
                .and_then(|v| Path::new(v).file_stem())
                .map(|s| s.to_string_lossy().to_string());
            let video_file = options
                .video_file
                .clone()
                .or_else(|| find_video_sibling(path, stem.as_deref()));
            if let (Some(file), Some(prober)) = (video_file, options.prober()) {
                if let Some(info) = probe_dimensions(prober, &file) {
                    width = width.or(Some(info.width));
                    height = height.or(Some(info.height));
                }
            }
        }
        if width.is_some() || height.is_some() {
            annotations = annotations
                .into_iter()
                .map(|a| a.with_fallback_dimensions(width, height))
                .collect();
        }

        let video_width = width.or_else(|| annotations.iter().find_map(|a| a.video_width));
        let video_height = height.or_else(|| annotations.iter().find_map(|a| a.video_height));
        let seq_length = max_frames_count(&annotations);

        let mut data = VideoDataset::from_annotations(annotations);
        data.video_width = video_width;
        data.video_height = video_height;
        data.seq_length = seq_length;
        data.video_name = video_name;
        data.imported_from = Some(self.id().to_string());
        data.warnings = warnings;

        log::info!(
            "Label Studio video import complete: {} keyframes, {} tracks",
            data.total_annotations(),
            data.track_count()
        );
        Ok(data)
    }
}
