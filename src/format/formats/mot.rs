//! MOT (CVAT MOT 1.1) format implementation.
//!
//! A sequence is a `gt/gt.txt` file with one row per visible `(track, frame)`:
//!
//! ```text
//! frame,track,x,y,w,h,not_ignored,class_id,visibility
//! ```
//!
//! Frames are 1-based on the wire. Class names live in `gt/labels.txt`
//! (line `n` is class `n`) and sequence facts in `seqinfo.ini`. Because the
//! format cannot express "hidden, then back", export densifies every track
//! first (see [`crate::format::densify`]).

use std::path::{Path, PathBuf};

use crate::format::archive;
use crate::format::category::CategoryTable;
use crate::format::dataset::VideoDataset;
use crate::format::densify::{densify, trailing_end_frame};
use crate::format::error::FormatError;
use crate::format::probe::{VideoProber, resolve_dimensions, resolve_timing};
use crate::format::traits::{ExportOptions, ExportResult, FormatWarning, ImportOptions, VideoFormat};
use crate::format::video::{
    CoordinateStyle, SourceFormat, TrackMeta, VideoAnnotation, VideoBBox, frame_index,
};

/// Number of fields in a gt.txt row.
pub const MOT_FIELDS: usize = 9;

const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Sequence facts and the class table shared by one MOT import or export.
#[derive(Debug, Clone, PartialEq)]
pub struct MotContext {
    pub frame_rate: f64,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub seq_name: Option<String>,
    pub seq_length: Option<u32>,
    pub categories: CategoryTable,
}

impl Default for MotContext {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            video_width: None,
            video_height: None,
            seq_name: None,
            seq_length: None,
            categories: CategoryTable::new(),
        }
    }
}

impl MotContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `[Sequence]` section of a `seqinfo.ini`.
    ///
    /// Keys are matched case-insensitively. Zero or unparsable numbers leave
    /// the value unknown.
    pub fn from_seqinfo(content: &str) -> Self {
        let mut ctx = Self::new();
        let mut in_sequence = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_sequence = line.eq_ignore_ascii_case("[sequence]");
                continue;
            }
            if !in_sequence {
                continue;
            }
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                continue;
            };
            let value = value.trim();
            let positive = || value.parse::<u32>().ok().filter(|&v| v > 0);

            match key.trim().to_ascii_lowercase().as_str() {
                "name" if !value.is_empty() => ctx.seq_name = Some(value.to_string()),
                "framerate" => {
                    if let Ok(rate) = value.parse::<f64>() {
                        ctx.frame_rate = rate;
                    }
                }
                "seqlength" => ctx.seq_length = positive(),
                "imwidth" => ctx.video_width = positive(),
                "imheight" => ctx.video_height = positive(),
                _ => {}
            }
        }

        ctx
    }

    /// Render `seqinfo.ini`.
    pub fn to_seqinfo(&self) -> String {
        let mut out = String::from("[Sequence]\n");
        if let Some(name) = &self.seq_name {
            out.push_str(&format!("name={}\n", name));
        }
        out.push_str(&format!("frameRate={}\n", self.frame_rate.round() as i64));
        if let Some(len) = self.seq_length {
            out.push_str(&format!("seqLength={}\n", len));
        }
        if let Some(w) = self.video_width {
            out.push_str(&format!("imWidth={}\n", w));
        }
        if let Some(h) = self.video_height {
            out.push_str(&format!("imHeight={}\n", h));
        }
        out.push_str("imDir=img1\nimExt=.jpg\n");
        out
    }

    /// Apply explicit dimensions, which win over `seqinfo.ini`.
    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        if width.is_some() {
            self.video_width = width;
        }
        if height.is_some() {
            self.video_height = height;
        }
        self
    }

    /// Grow `seq_length` to cover `frames` frames.
    fn cover_frames(&mut self, frames: u32) {
        if self.seq_length.is_none_or(|len| len < frames) {
            self.seq_length = Some(frames);
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    parts: &[&str],
    idx: usize,
    name: &str,
    line_number: usize,
    line: &str,
) -> Result<T, FormatError> {
    parts[idx].trim().parse().map_err(|_| {
        FormatError::malformed_line(
            line_number,
            line,
            format!("{} '{}' is not a number", name, parts[idx].trim()),
        )
    })
}

/// Parse one `gt.txt` row.
///
/// `line_number` is 1-based and only used in errors. Rows with more than
/// nine fields are accepted and the extra fields ignored.
pub fn import_bbox_from_line(
    line: &str,
    line_number: usize,
    ctx: &MotContext,
) -> Result<VideoBBox, FormatError> {
    let line = line.trim();
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < MOT_FIELDS {
        return Err(FormatError::malformed_line(
            line_number,
            line,
            format!(
                "expected {} comma-separated fields, found {}",
                MOT_FIELDS,
                parts.len()
            ),
        ));
    }

    let frame: i64 = parse_field(&parts, 0, "frame", line_number, line)?;
    let track_id: i64 = parse_field(&parts, 1, "track id", line_number, line)?;
    let x: f64 = parse_field(&parts, 2, "x", line_number, line)?;
    let y: f64 = parse_field(&parts, 3, "y", line_number, line)?;
    let w: f64 = parse_field(&parts, 4, "width", line_number, line)?;
    let h: f64 = parse_field(&parts, 5, "height", line_number, line)?;
    let not_ignored: i64 = parse_field(&parts, 6, "not_ignored", line_number, line)?;
    let class_id: i64 = parse_field(&parts, 7, "class id", line_number, line)?;
    let visibility: f64 = parse_field(&parts, 8, "visibility", line_number, line)?;

    let frame_number = frame_index(frame, 1).ok_or_else(|| FormatError::InvalidFrame {
        frame,
        context: format!("MOT line {}", line_number),
    })?;

    let category = u32::try_from(class_id)
        .map(|id| ctx.categories.name(id))
        .unwrap_or(ctx.categories.default_category.as_str());

    let meta = TrackMeta {
        ignored: not_ignored == 0,
        outside: (visibility <= 0.0).then_some(true),
        source_format: Some(SourceFormat::Mot),
        ..TrackMeta::default()
    };

    let mut ann = VideoBBox::new(
        track_id,
        frame_number,
        x,
        y,
        w,
        h,
        CoordinateStyle::Denormalized,
    )
    .with_category(category)
    .with_visibility(visibility)
    .with_meta(meta);
    ann.video_width = ctx.video_width;
    ann.video_height = ctx.video_height;
    Ok(ann)
}

/// Integer rendering for whole numbers, full precision otherwise.
fn format_coord(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Render one record as a `gt.txt` row.
///
/// Unknown category names are added to the context's table.
pub fn export_bbox_to_line(ann: &VideoBBox, ctx: &mut MotContext) -> Result<String, FormatError> {
    let ann = if ann.coordinate_style == CoordinateStyle::Normalized {
        ann.clone()
            .with_fallback_dimensions(ctx.video_width, ctx.video_height)
            .denormalized()?
    } else {
        ann.clone()
    };

    let class_id = ctx.categories.class_id(ann.ensure_has_one_category()?);
    let not_ignored = if ann.meta.ignored { 0 } else { 1 };
    let visibility = if ann.is_outside() { 0.0 } else { ann.visibility };

    Ok(format!(
        "{},{},{},{},{},{},{},{},{:?}",
        u64::from(ann.frame_number) + 1,
        ann.track_id,
        format_coord(ann.left),
        format_coord(ann.top),
        format_coord(ann.width),
        format_coord(ann.height),
        not_ignored,
        class_id,
        visibility
    ))
}

/// Parse `gt.txt` content. Blank lines and `#` comments are skipped.
pub fn load_mot_from_str(content: &str, ctx: &MotContext) -> Result<Vec<VideoBBox>, FormatError> {
    let mut annotations = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        annotations.push(import_bbox_from_line(trimmed, idx + 1, ctx)?);
    }
    log::debug!("Parsed {} MOT rows", annotations.len());
    Ok(annotations)
}

/// Load a single `gt.txt` file.
pub fn load_mot_from_file(path: &Path, ctx: &MotContext) -> Result<Vec<VideoBBox>, FormatError> {
    if !path.is_file() {
        return Err(FormatError::missing_file(path));
    }
    let content = std::fs::read_to_string(path)?;
    load_mot_from_str(&content, ctx)
}

fn build_context(
    seqinfo: Option<&str>,
    labels: Option<&str>,
    options: &ImportOptions,
    source: &Path,
) -> MotContext {
    let mut ctx = match seqinfo {
        Some(content) => MotContext::from_seqinfo(content),
        None => {
            log::warn!(
                "seqinfo.ini not found in {:?}, using default context",
                source
            );
            MotContext::new()
        }
    }
    .with_dimensions(options.video_width, options.video_height);

    if let Some(labels) = labels {
        ctx.categories = CategoryTable::from_labels(labels);
    }
    if let Some(name) = &options.default_category {
        ctx.categories.default_category = name.clone();
    }
    ctx
}

/// Load a MOT sequence directory (`gt/gt.txt`, `gt/labels.txt`,
/// `seqinfo.ini`). Dimensions in `options` override `seqinfo.ini`.
pub fn load_mot_from_dir(
    dir: &Path,
    options: &ImportOptions,
) -> Result<(Vec<VideoBBox>, MotContext), FormatError> {
    log::info!("Loading MOT sequence from {:?}", dir);

    let read_optional = |path: PathBuf| -> Result<Option<String>, FormatError> {
        if path.is_file() {
            Ok(Some(std::fs::read_to_string(path)?))
        } else {
            Ok(None)
        }
    };

    let seqinfo = read_optional(dir.join("seqinfo.ini"))?;
    let labels = read_optional(dir.join("gt").join("labels.txt"))?;
    let ctx = build_context(seqinfo.as_deref(), labels.as_deref(), options, dir);

    let annotations = load_mot_from_file(&dir.join("gt").join("gt.txt"), &ctx)?;
    log::info!("Loaded {} MOT rows", annotations.len());
    Ok((annotations, ctx))
}

/// Root prefix of the sequence inside an archive: `""` or `"<seq>/"`.
pub fn find_mot_prefix(names: &[String]) -> Result<String, FormatError> {
    if names.iter().any(|n| n == "gt/gt.txt") {
        return Ok(String::new());
    }
    names
        .iter()
        .find_map(|name| {
            let parts: Vec<&str> = name.split('/').collect();
            let n = parts.len();
            (n >= 3 && parts[n - 2] == "gt" && parts[n - 1] == "gt.txt")
                .then(|| format!("{}/", parts[..n - 2].join("/")))
        })
        .ok_or_else(|| FormatError::missing_file("gt/gt.txt"))
}

/// Load a MOT sequence from a ZIP archive, reading entries in place.
pub fn load_mot_from_zip(
    path: &Path,
    options: &ImportOptions,
) -> Result<(Vec<VideoBBox>, MotContext), FormatError> {
    let mut zip = archive::open_archive(path)?;
    let names = archive::safe_entry_names(&zip);
    let prefix = find_mot_prefix(&names)?;
    log::debug!("MOT root inside archive: '{}'", prefix);

    let mut read_optional = |name: String| -> Result<Option<String>, FormatError> {
        if names.contains(&name) {
            archive::read_entry(&mut zip, &name).map(Some)
        } else {
            Ok(None)
        }
    };
    let seqinfo = read_optional(format!("{}seqinfo.ini", prefix))?;
    let labels = read_optional(format!("{}gt/labels.txt", prefix))?;
    let ctx = build_context(seqinfo.as_deref(), labels.as_deref(), options, path);

    let gt = archive::read_entry(&mut zip, &format!("{}gt/gt.txt", prefix))?;
    let annotations = load_mot_from_str(&gt, &ctx)?;
    log::info!("Loaded {} MOT rows from {:?}", annotations.len(), path);
    Ok((annotations, ctx))
}

/// Densify and render `gt.txt` content.
///
/// Tracks are extended to the context's sequence length (or the Label
/// Studio frame count), and `ctx.seq_length` grows to cover every row.
/// Returns the content and the number of rows.
pub fn render_mot(
    annotations: &[VideoBBox],
    ctx: &mut MotContext,
) -> Result<(String, usize), FormatError> {
    let end_frame = trailing_end_frame(ctx.seq_length, annotations);
    let rows = densify(annotations, end_frame);

    let lines = rows
        .iter()
        .map(|row| export_bbox_to_line(row, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(frames) = rows.iter().map(|r| r.frame_number.saturating_add(1)).max() {
        ctx.cover_frames(frames);
    }

    let mut content = lines.join("\n");
    if !lines.is_empty() {
        content.push('\n');
    }
    Ok((content, lines.len()))
}

/// Write a single `gt.txt`.
pub fn export_to_mot(
    annotations: &[VideoBBox],
    ctx: &mut MotContext,
    path: &Path,
) -> Result<usize, FormatError> {
    let (content, rows) = render_mot(annotations, ctx)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    log::info!("Exported {} MOT rows to {:?}", rows, path);
    Ok(rows)
}

fn sequence_entries(
    annotations: &[VideoBBox],
    ctx: &mut MotContext,
) -> Result<(Vec<(String, Vec<u8>)>, usize), FormatError> {
    let (gt, rows) = render_mot(annotations, ctx)?;
    Ok((
        vec![
            ("gt/gt.txt".to_string(), gt.into_bytes()),
            ("gt/labels.txt".to_string(), ctx.categories.to_labels().into_bytes()),
            ("seqinfo.ini".to_string(), ctx.to_seqinfo().into_bytes()),
        ],
        rows,
    ))
}

/// Context for exporting `data`.
///
/// Options win over the dataset. A missing sequence length or frame rate is
/// probed from `options.video_file`, as are dimensions when normalized
/// records carry none. The frame rate falls back to 30.
pub fn export_context(
    data: &VideoDataset,
    options: &ExportOptions,
    prober: Option<&dyn VideoProber>,
) -> Result<MotContext, FormatError> {
    let video_file = options.video_file.as_deref();
    let (seq_length, frame_rate) = resolve_timing(
        options.seq_length.or(data.seq_length),
        options.frame_rate.or(data.frame_rate),
        video_file,
        prober,
    );

    let mut ctx = MotContext {
        frame_rate: frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
        video_width: options.video_width.or(data.video_width),
        video_height: options.video_height.or(data.video_height),
        seq_name: options.video_name.clone().or_else(|| data.video_name.clone()),
        seq_length,
        categories: data.categories.clone(),
    };

    let needs_dimensions = data.annotations.iter().any(|a| {
        a.coordinate_style == CoordinateStyle::Normalized
            && (a.video_width.is_none() || a.video_height.is_none())
    });
    if needs_dimensions && (ctx.video_width.is_none() || ctx.video_height.is_none()) {
        let (w, h) = resolve_dimensions(
            (ctx.video_width, ctx.video_height),
            &data.annotations,
            video_file,
            prober,
        )?;
        ctx.video_width = Some(w);
        ctx.video_height = Some(h);
    }
    Ok(ctx)
}

/// Write a sequence directory. Returns the files created and the row count.
pub fn export_mot_to_dir(
    annotations: &[VideoBBox],
    ctx: &mut MotContext,
    dir: &Path,
) -> Result<(Vec<PathBuf>, usize), FormatError> {
    let (entries, rows) = sequence_entries(annotations, ctx)?;
    std::fs::create_dir_all(dir.join("gt"))?;

    let mut files = Vec::with_capacity(entries.len());
    for (name, content) in entries {
        let path = dir.join(name);
        std::fs::write(&path, content)?;
        files.push(path);
    }
    log::info!("Exported MOT sequence ({} rows) to {:?}", rows, dir);
    Ok((files, rows))
}

/// Write a sequence as a ZIP archive. Returns the row count.
pub fn export_mot_to_zip(
    annotations: &[VideoBBox],
    ctx: &mut MotContext,
    path: &Path,
) -> Result<usize, FormatError> {
    let (entries, rows) = sequence_entries(annotations, ctx)?;
    archive::write_archive(path, &entries)?;
    Ok(rows)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn is_txt(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
}

/// MOT sequence format.
///
/// Supports:
/// - Sequence directories, ZIP archives and bare `gt.txt` files
/// - `labels.txt` class tables and `seqinfo.ini`
/// - Ignored and zero-visibility rows
///
/// Does not support:
/// - Rotation (dropped with a warning)
/// - More than one source video per sequence
pub struct MotFormat;

impl VideoFormat for MotFormat {
    fn id(&self) -> &'static str {
        "mot"
    }

    fn display_name(&self) -> &'static str {
        "MOT (gt.txt)"
    }

    fn extensions(&self) -> &[&'static str] {
        &["txt", "zip"]
    }

    fn is_dense(&self) -> bool {
        true
    }

    fn export(
        &self,
        data: &VideoDataset,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, FormatError> {
        log::info!("Exporting MOT annotations to {:?}", path);

        let mut result = ExportResult::new();
        let videos = data.source_videos();
        if videos.len() > 1 {
            result.add_warning(FormatWarning::warning(format!(
                "MOT holds one sequence; merging tracks of {} videos ({})",
                videos.len(),
                videos.join(", ")
            )));
        }
        for ann in data.annotations.iter().filter(|a| a.rotation != 0.0) {
            result.add_warning(
                FormatWarning::warning(format!(
                    "MOT cannot store rotation; dropping {} degrees at frame {}",
                    ann.rotation, ann.frame_number
                ))
                .with_track(ann.track_id),
            );
        }

        let mut ctx = export_context(data, options, options.prober())?;

        if is_zip(path) {
            result.annotations_exported = export_mot_to_zip(&data.annotations, &mut ctx, path)?;
            result.files_created.push(path.to_path_buf());
        } else if is_txt(path) {
            result.annotations_exported = export_to_mot(&data.annotations, &mut ctx, path)?;
            result.files_created.push(path.to_path_buf());
        } else {
            let (files, rows) = export_mot_to_dir(&data.annotations, &mut ctx, path)?;
            result.annotations_exported = rows;
            result.files_created = files;
        }
        result.tracks_exported = data.track_count();

        log::info!(
            "MOT export complete: {} rows, {} tracks",
            result.annotations_exported,
            result.tracks_exported
        );
        Ok(result)
    }

    fn import(&self, path: &Path, options: &ImportOptions) -> Result<VideoDataset, FormatError> {
        log::info!("Importing MOT annotations from {:?}", path);

        let (annotations, ctx) = if path.is_dir() {
            load_mot_from_dir(path, options)?
        } else if is_zip(path) {
            load_mot_from_zip(path, options)?
        } else {
            let labels = path.with_file_name("labels.txt");
            let labels = if labels.is_file() {
                Some(std::fs::read_to_string(labels)?)
            } else {
                None
            };
            let seqinfo = path
                .parent()
                .and_then(Path::parent)
                .map(|root| root.join("seqinfo.ini"))
                .filter(|p| p.is_file());
            let seqinfo = match seqinfo {
                Some(p) => Some(std::fs::read_to_string(p)?),
                None => None,
            };
            let ctx = build_context(seqinfo.as_deref(), labels.as_deref(), options, path);
            (load_mot_from_file(path, &ctx)?, ctx)
        };

        let data = VideoDataset {
            video_width: ctx.video_width,
            video_height: ctx.video_height,
            seq_length: ctx.seq_length,
            frame_rate: Some(ctx.frame_rate),
            video_name: ctx.seq_name.clone(),
            categories: ctx.categories,
            imported_from: Some(self.id().to_string()),
            ..VideoDataset::from_annotations(annotations)
        };

        log::info!(
            "MOT import complete: {} rows, {} tracks",
            data.total_annotations(),
            data.track_count()
        );
        Ok(data)
    }
}
