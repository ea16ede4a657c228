//! CVAT video (interpolation mode) XML format implementation.
//!
//! ```xml
//! <annotations>
//!   <version>1.1</version>
//!   <meta><task><mode>interpolation</mode><size>100</size>...</task></meta>
//!   <track id="0" label="person" source="manual">
//!     <box frame="0" keyframe="1" outside="0" occluded="0"
//!          xtl="100.00" ytl="150.00" xbr="150.00" ybr="270.00" z_order="0"/>
//!   </track>
//! </annotations>
//! ```
//!
//! Frames are 0-based. CVAT interpolates between keyframes natively, so
//! export maps records 1:1 to `<box>` elements and only adds `outside`
//! markers where interpolation was explicitly disabled.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::format::archive;
use crate::format::dataset::VideoDataset;
use crate::format::densify::{boundary_marker, group_tracks, group_videos, max_frames_count};
use crate::format::error::FormatError;
use crate::format::probe::{find_video_sibling, resolve_dimensions};
use crate::format::traits::{ExportOptions, ExportResult, FormatWarning, ImportOptions, VideoFormat};
use crate::format::video::{
    CoordinateStyle, MAX_FRAME, SourceFormat, TrackMeta, VideoAnnotation, VideoBBox, parse_flag,
};

/// Key in [`TrackMeta::extra`] holding `<attribute>` children of a box.
pub const CVAT_ATTRIBUTES_KEY: &str = "cvat_attributes";

/// Entry name of the annotations inside a CVAT export archive.
pub const ANNOTATIONS_ENTRY: &str = "annotations.xml";

const DEFAULT_VIDEO_NAME: &str = "video.mp4";

/// Task-level facts from `<meta>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CvatVideoMeta {
    pub mode: Option<String>,
    /// Number of frames (`<size>`).
    pub size: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Video file name (`<source>`).
    pub source: Option<String>,
}

/// Annotation mode of a CVAT document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvatMode {
    Image,
    Video,
}

#[derive(Debug, Default)]
struct RawBox {
    attrs: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
}

#[derive(Debug)]
struct RawTrack {
    id: i64,
    label: String,
    boxes: Vec<RawBox>,
}

#[derive(Debug, Default)]
struct ParsedDocument {
    meta: CvatVideoMeta,
    tracks: Vec<RawTrack>,
    images: usize,
    warnings: Vec<FormatWarning>,
}

/// Event-driven collector for tracks and task metadata.
#[derive(Default)]
struct DocumentParser {
    doc: ParsedDocument,
    path: Vec<String>,
    track: Option<RawTrack>,
    bbox: Option<RawBox>,
    attribute: Option<(String, String)>,
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn read_attributes(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>, FormatError> {
    let mut attrs = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| FormatError::Xml(err.into()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

impl DocumentParser {
    fn skip(&mut self, message: String) {
        log::warn!("{}", message);
        self.doc.warnings.push(FormatWarning::warning(message));
    }

    /// Handle an opening tag. Returns whether the element's children should
    /// be visited.
    fn open(&mut self, name: &str, e: &BytesStart<'_>) -> Result<bool, FormatError> {
        let parent = self.path.last().map(String::as_str);
        match (self.path.len(), parent) {
            (0, _) => Ok(true),
            (1, _) => match name {
                "version" | "meta" => Ok(true),
                "track" => {
                    let attrs = read_attributes(e)?;
                    let id = attrs
                        .get("id")
                        .ok_or_else(|| FormatError::missing_attribute("track", "id"))?;
                    let id = id.trim().parse().map_err(|_| {
                        FormatError::invalid_format(format!("Track id '{}' is not an integer", id))
                    })?;
                    let label = attrs
                        .get("label")
                        .cloned()
                        .ok_or_else(|| FormatError::missing_attribute("track", "label"))?;
                    self.track = Some(RawTrack {
                        id,
                        label,
                        boxes: Vec::new(),
                    });
                    Ok(true)
                }
                "image" => {
                    self.doc.images += 1;
                    Ok(false)
                }
                other => {
                    self.skip(format!("Skipping unsupported <{}> element", other));
                    Ok(false)
                }
            },
            (_, Some("track")) if self.track.is_some() => {
                if name == "box" {
                    self.bbox = Some(RawBox {
                        attrs: read_attributes(e)?,
                        attributes: BTreeMap::new(),
                    });
                    Ok(true)
                } else {
                    let id = self.track.as_ref().map_or(0, |t| t.id);
                    self.skip(format!(
                        "Skipping unsupported <{}> in track {} (only boxes are converted)",
                        name, id
                    ));
                    Ok(false)
                }
            }
            (_, Some("box")) if self.bbox.is_some() => {
                if name == "attribute" {
                    let attrs = read_attributes(e)?;
                    let attr_name = attrs
                        .get("name")
                        .cloned()
                        .ok_or_else(|| FormatError::missing_attribute("attribute", "name"))?;
                    self.attribute = Some((attr_name, String::new()));
                    Ok(true)
                } else {
                    log::debug!("Ignoring <{}> inside <box>", name);
                    Ok(false)
                }
            }
            _ => Ok(self.path.get(1).is_some_and(|p| p == "meta")),
        }
    }

    /// Handle a closing tag; `self.path` no longer contains the element.
    fn close(&mut self, name: &str) {
        let parent = self.path.last().map(String::as_str);
        match (name, parent) {
            ("attribute", Some("box")) => {
                if let (Some((key, value)), Some(bbox)) = (self.attribute.take(), &mut self.bbox) {
                    bbox.attributes.insert(key, value);
                }
            }
            ("box", Some("track")) => {
                if let (Some(bbox), Some(track)) = (self.bbox.take(), &mut self.track) {
                    track.boxes.push(bbox);
                }
            }
            ("track", _) if self.path.len() == 1 => {
                if let Some(track) = self.track.take() {
                    self.doc.tracks.push(track);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        let names: Vec<&str> = self.path.iter().map(String::as_str).collect();
        if names.ends_with(&["box", "attribute"]) {
            if let Some((_, value)) = self.attribute.as_mut() {
                value.push_str(text);
            }
            return;
        }
        if names.get(1) != Some(&"meta") {
            return;
        }

        let meta = &mut self.doc.meta;
        let number = || text.trim().parse::<u32>().ok().filter(|&v| v > 0);
        match names.as_slice() {
            [.., "task" | "job", "mode"] if meta.mode.is_none() => {
                meta.mode = Some(text.trim().to_string())
            }
            [.., "task" | "job", "size"] if meta.size.is_none() => meta.size = number(),
            [.., "task" | "job", "source"] if meta.source.is_none() => {
                meta.source = Some(text.trim().to_string())
            }
            [.., "task" | "job", "original_size", "width"] if meta.width.is_none() => {
                meta.width = number()
            }
            [.., "task" | "job", "original_size", "height"] if meta.height.is_none() => {
                meta.height = number()
            }
            _ => {}
        }
    }
}

fn parse_document(xml: &str) -> Result<ParsedDocument, FormatError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut parser = DocumentParser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e);
                if parser.open(&name, e)? {
                    parser.path.push(name);
                } else {
                    let end = e.to_end().into_owned();
                    reader
                        .read_to_end(end.name())
                        .map_err(FormatError::Xml)?;
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = element_name(e);
                if parser.open(&name, e)? {
                    parser.close(&name);
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                parser.path.pop();
                parser.close(&name);
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape()?;
                parser.text(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FormatError::Xml(e)),
            _ => {}
        }
    }

    Ok(parser.doc)
}

/// Detect whether a document holds video tracks or image annotations.
///
/// `<mode>` decides when present; otherwise the presence of `<track>` and
/// `<image>` elements does.
fn detect_mode(doc: &ParsedDocument) -> CvatMode {
    match doc.meta.mode.as_deref() {
        Some("interpolation") => return CvatMode::Video,
        Some("annotation") => return CvatMode::Image,
        _ => {}
    }
    match (!doc.tracks.is_empty(), doc.images > 0) {
        (true, false) => CvatMode::Video,
        (true, true) => {
            log::warn!("CVAT XML contains both <track> and <image> elements, treating as video");
            CvatMode::Video
        }
        _ => CvatMode::Image,
    }
}

fn box_number(raw: &RawBox, track: &RawTrack, name: &str) -> Result<f64, FormatError> {
    let value = raw
        .attrs
        .get(name)
        .ok_or_else(|| FormatError::missing_attribute("box", name))?;
    value.trim().parse().map_err(|_| {
        FormatError::invalid_format(format!(
            "Attribute {}='{}' of a box in track {} is not a number",
            name, value, track.id
        ))
    })
}

fn box_flag(raw: &RawBox, name: &str) -> bool {
    raw.attrs
        .get(name)
        .and_then(|v| parse_flag(v))
        .unwrap_or(false)
}

fn box_to_record(
    raw: &RawBox,
    track: &RawTrack,
    meta: &CvatVideoMeta,
    dimensions: (Option<u32>, Option<u32>),
) -> Result<VideoBBox, FormatError> {
    let frame = box_number(raw, track, "frame")?;
    let frame_number = if frame >= 0.0 && frame.fract() == 0.0 && frame <= f64::from(MAX_FRAME) {
        frame as u32
    } else {
        return Err(FormatError::InvalidFrame {
            frame: frame as i64,
            context: format!("CVAT track {}", track.id),
        });
    };

    let xtl = box_number(raw, track, "xtl")?;
    let ytl = box_number(raw, track, "ytl")?;
    let xbr = box_number(raw, track, "xbr")?;
    let ybr = box_number(raw, track, "ybr")?;

    let outside = box_flag(raw, "outside");
    let occluded = box_flag(raw, "occluded");
    let visibility = if outside {
        0.0
    } else if occluded {
        0.5
    } else {
        1.0
    };

    let z_order = raw
        .attrs
        .get("z_order")
        .and_then(|z| z.trim().parse().ok())
        .unwrap_or(0);

    let mut track_meta = TrackMeta {
        outside: Some(outside),
        z_order: Some(z_order),
        source_format: Some(SourceFormat::Cvat),
        ..TrackMeta::default()
    };
    if !raw.attributes.is_empty() {
        let attributes: serde_json::Map<String, serde_json::Value> = raw
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        track_meta
            .extra
            .insert(CVAT_ATTRIBUTES_KEY.to_string(), serde_json::Value::Object(attributes));
    }

    let mut ann = VideoBBox::new(
        track.id,
        frame_number,
        xtl,
        ytl,
        xbr - xtl,
        ybr - ytl,
        CoordinateStyle::Denormalized,
    )
    .with_category(track.label.clone())
    .with_visibility(visibility)
    .with_keyframe(box_flag(raw, "keyframe"))
    .with_meta(track_meta);

    ann.rotation = raw
        .attrs
        .get("rotation")
        .and_then(|r| r.trim().parse().ok())
        .unwrap_or(0.0);
    ann.video_width = dimensions.0;
    ann.video_height = dimensions.1;
    ann.filename = meta.source.clone();
    Ok(ann)
}

fn build_dataset(
    doc: ParsedDocument,
    options: &ImportOptions,
    reference: Option<&Path>,
) -> Result<VideoDataset, FormatError> {
    if detect_mode(&doc) == CvatMode::Image {
        return Err(FormatError::invalid_format(
            "CVAT document is in image (annotation) mode; only video tracks can be converted",
        ));
    }

    let meta = &doc.meta;
    let explicit = (
        options.video_width.or(meta.width),
        options.video_height.or(meta.height),
    );
    let has_boxes = doc.tracks.iter().any(|t| !t.boxes.is_empty());

    let dimensions = if has_boxes {
        let source_stem = meta
            .source
            .as_deref()
            .and_then(|s| Path::new(s).file_stem())
            .map(|s| s.to_string_lossy().to_string());
        let video_file = options.video_file.clone().or_else(|| {
            reference.and_then(|r| {
                find_video_sibling(r, source_stem.as_deref()).or_else(|| find_video_sibling(r, None))
            })
        });
        let (w, h) = resolve_dimensions(explicit, &[], video_file.as_deref(), options.prober())?;
        (Some(w), Some(h))
    } else {
        explicit
    };

    let mut annotations = Vec::new();
    for track in &doc.tracks {
        for raw in &track.boxes {
            annotations.push(box_to_record(raw, track, meta, dimensions)?);
        }
    }

    Ok(VideoDataset {
        video_width: dimensions.0,
        video_height: dimensions.1,
        seq_length: meta.size,
        video_name: meta.source.clone(),
        imported_from: Some("cvat_video".to_string()),
        warnings: doc.warnings,
        ..VideoDataset::from_annotations(annotations)
    })
}

/// Parse only the `<meta>` facts of a document.
pub fn parse_cvat_video_meta(xml: &str) -> Result<CvatVideoMeta, FormatError> {
    Ok(parse_document(xml)?.meta)
}

/// Load video tracks from XML text.
pub fn load_cvat_video_from_str(
    xml: &str,
    options: &ImportOptions,
) -> Result<VideoDataset, FormatError> {
    build_dataset(parse_document(xml)?, options, None)
}

/// Load video tracks from an XML file.
///
/// Missing dimensions are probed from a video next to the file.
pub fn load_cvat_video_from_file(
    path: &Path,
    options: &ImportOptions,
) -> Result<VideoDataset, FormatError> {
    let xml = std::fs::read_to_string(path)?;
    build_dataset(parse_document(&xml)?, options, Some(path))
}

/// Load video tracks from `annotations.xml` inside a CVAT export archive.
pub fn load_cvat_video_from_zip(
    path: &Path,
    options: &ImportOptions,
) -> Result<VideoDataset, FormatError> {
    let mut zip = archive::open_archive(path)?;
    let xml = archive::read_entry(&mut zip, ANNOTATIONS_ENTRY)?;
    build_dataset(parse_document(&xml)?, options, Some(path))
}

/// Document-level settings for export.
#[derive(Debug, Clone, Default)]
pub struct CvatVideoSettings {
    pub video_name: Option<String>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub seq_length: Option<u32>,
}

/// Rendered document.
#[derive(Debug, Clone)]
pub struct CvatVideoXml {
    pub xml: String,
    pub tracks: usize,
    pub boxes: usize,
}

fn xml_err<E: Into<quick_xml::Error>>(e: E) -> FormatError {
    FormatError::Xml(e.into())
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), FormatError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

fn attribute_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_box<W: Write>(writer: &mut Writer<W>, ann: &VideoBBox) -> Result<(), FormatError> {
    let outside = ann.is_outside();
    let occluded = ann.visibility < 1.0 && !outside;
    let flag = |b: bool| if b { "1" } else { "0" };

    let mut elem = BytesStart::new("box");
    elem.push_attribute(("frame", ann.frame_number.to_string().as_str()));
    elem.push_attribute(("keyframe", flag(ann.keyframe)));
    elem.push_attribute(("outside", flag(outside)));
    elem.push_attribute(("occluded", flag(occluded)));
    elem.push_attribute(("xtl", format!("{:.2}", ann.left).as_str()));
    elem.push_attribute(("ytl", format!("{:.2}", ann.top).as_str()));
    elem.push_attribute(("xbr", format!("{:.2}", ann.left + ann.width).as_str()));
    elem.push_attribute(("ybr", format!("{:.2}", ann.top + ann.height).as_str()));
    elem.push_attribute(("z_order", ann.meta.z_order.unwrap_or(0).to_string().as_str()));
    if ann.rotation != 0.0 {
        elem.push_attribute(("rotation", format!("{:.2}", ann.rotation).as_str()));
    }

    let attributes = ann
        .meta
        .extra
        .get(CVAT_ATTRIBUTES_KEY)
        .and_then(|v| v.as_object())
        .filter(|m| !m.is_empty());

    match attributes {
        None => writer.write_event(Event::Empty(elem)).map_err(xml_err)?,
        Some(attributes) => {
            writer.write_event(Event::Start(elem)).map_err(xml_err)?;
            for (name, value) in attributes {
                let mut attr = BytesStart::new("attribute");
                attr.push_attribute(("name", name.as_str()));
                writer.write_event(Event::Start(attr)).map_err(xml_err)?;
                writer
                    .write_event(Event::Text(BytesText::new(&attribute_text(value))))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new("attribute")))
                    .map_err(xml_err)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("box")))
                .map_err(xml_err)?;
        }
    }
    Ok(())
}

/// Render records of one video as a CVAT video document.
///
/// Records map 1:1 to boxes. A record whose Label Studio `enabled` flag is
/// explicitly off gets an `outside` box on the next frame, bounded by the
/// last frame of the sequence. Dimensions come from `settings`, then the
/// records; an empty record list falls back to 1920x1080.
pub fn cvat_video_to_xml(
    annotations: &[VideoBBox],
    settings: &CvatVideoSettings,
) -> Result<CvatVideoXml, FormatError> {
    let (width, height) = if annotations.is_empty() {
        (
            settings.video_width.unwrap_or(1920),
            settings.video_height.unwrap_or(1080),
        )
    } else {
        resolve_dimensions(
            (settings.video_width, settings.video_height),
            annotations,
            None,
            None,
        )?
    };

    let frames_count = max_frames_count(annotations);
    let limit = [
        settings.seq_length.filter(|&n| n > 0).map(|n| n - 1),
        frames_count.filter(|&n| n > 0).map(|n| n - 1),
    ]
    .into_iter()
    .flatten()
    .min();

    let mut tracks = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    for (key, track) in group_tracks(annotations) {
        let label = track
            .first()
            .map(|first| first.ensure_has_one_category().map(str::to_string))
            .transpose()?
            .unwrap_or_default();
        let mut boxes = Vec::with_capacity(track.len());
        for (i, ann) in track.iter().enumerate() {
            ann.ensure_has_one_category()?;
            let ann = ann
                .clone()
                .with_fallback_dimensions(Some(width), Some(height))
                .denormalized()?;
            let marker = boundary_marker(&ann, track.get(i + 1), limit);
            boxes.push(ann);
            boxes.extend(marker);
        }
        if !labels.contains(&label) {
            labels.push(label.clone());
        }
        tracks.push((key.track_id, label, boxes));
    }

    let max_frame = tracks
        .iter()
        .flat_map(|(_, _, boxes)| boxes.iter().map(|b| b.frame_number.saturating_add(1)))
        .max()
        .unwrap_or(1);
    let size = [Some(max_frame), frames_count, settings.seq_length]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(1);
    let video_name = settings
        .video_name
        .clone()
        .or_else(|| annotations.iter().find_map(|a| a.video_key().map(str::to_string)))
        .unwrap_or_else(|| DEFAULT_VIDEO_NAME.to_string());

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("annotations")))
        .map_err(xml_err)?;
    write_text_element(&mut writer, "version", "1.1")?;

    writer
        .write_event(Event::Start(BytesStart::new("meta")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("task")))
        .map_err(xml_err)?;
    write_text_element(&mut writer, "mode", "interpolation")?;
    write_text_element(&mut writer, "size", &size.to_string())?;
    writer
        .write_event(Event::Start(BytesStart::new("original_size")))
        .map_err(xml_err)?;
    write_text_element(&mut writer, "width", &width.to_string())?;
    write_text_element(&mut writer, "height", &height.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new("original_size")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("labels")))
        .map_err(xml_err)?;
    for label in &labels {
        writer
            .write_event(Event::Start(BytesStart::new("label")))
            .map_err(xml_err)?;
        write_text_element(&mut writer, "name", label)?;
        write_text_element(&mut writer, "type", "rectangle")?;
        writer
            .write_event(Event::End(BytesEnd::new("label")))
            .map_err(xml_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("labels")))
        .map_err(xml_err)?;
    write_text_element(&mut writer, "source", &video_name)?;
    writer
        .write_event(Event::End(BytesEnd::new("task")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("meta")))
        .map_err(xml_err)?;

    let mut box_count = 0;
    for (track_id, label, boxes) in &tracks {
        let mut elem = BytesStart::new("track");
        elem.push_attribute(("id", track_id.to_string().as_str()));
        elem.push_attribute(("label", label.as_str()));
        elem.push_attribute(("source", "manual"));
        writer.write_event(Event::Start(elem)).map_err(xml_err)?;
        for ann in boxes {
            write_box(&mut writer, ann)?;
            box_count += 1;
        }
        writer
            .write_event(Event::End(BytesEnd::new("track")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("annotations")))
        .map_err(xml_err)?;

    let mut xml = String::from_utf8(writer.into_inner())
        .map_err(|_| FormatError::invalid_format("Invalid UTF-8 in XML"))?;
    xml.push('\n');

    Ok(CvatVideoXml {
        xml,
        tracks: tracks.len(),
        boxes: box_count,
    })
}

/// Write one document to an `.xml` file.
pub fn export_cvat_video_to_file(
    annotations: &[VideoBBox],
    path: &Path,
    settings: &CvatVideoSettings,
) -> Result<CvatVideoXml, FormatError> {
    let doc = cvat_video_to_xml(annotations, settings)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, &doc.xml)?;
    log::info!("Exported {} CVAT boxes to {:?}", doc.boxes, path);
    Ok(doc)
}

/// Write one document as `annotations.xml` inside a ZIP archive.
pub fn export_cvat_video_to_zip(
    annotations: &[VideoBBox],
    path: &Path,
    settings: &CvatVideoSettings,
) -> Result<CvatVideoXml, FormatError> {
    let doc = cvat_video_to_xml(annotations, settings)?;
    archive::write_archive(
        path,
        &[(ANNOTATIONS_ENTRY.to_string(), doc.xml.clone().into_bytes())],
    )?;
    Ok(doc)
}

/// Write one `<video stem>.xml` per source video into `dir`.
///
/// A single `video_name` in `settings` cannot name several videos, so that
/// combination is rejected.
pub fn export_cvat_video_to_dir(
    annotations: &[VideoBBox],
    dir: &Path,
    settings: &CvatVideoSettings,
) -> Result<(Vec<PathBuf>, usize), FormatError> {
    let videos = group_videos(annotations);
    if let Some(name) = &settings.video_name {
        let sources: Vec<String> = videos.keys().flatten().cloned().collect();
        if sources.len() > 1 {
            return Err(FormatError::AmbiguousVideo {
                video_name: name.clone(),
                sources,
            });
        }
    }

    std::fs::create_dir_all(dir)?;
    let mut files = Vec::with_capacity(videos.len());
    let mut boxes = 0;
    for (video, records) in videos {
        let video_name = settings
            .video_name
            .clone()
            .or(video)
            .unwrap_or_else(|| DEFAULT_VIDEO_NAME.to_string());
        let stem = Path::new(&video_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "annotations".to_string());
        let path = dir.join(format!("{}.xml", stem));

        let per_video = CvatVideoSettings {
            video_name: Some(video_name),
            ..settings.clone()
        };
        boxes += export_cvat_video_to_file(&records, &path, &per_video)?.boxes;
        files.push(path);
    }
    Ok((files, boxes))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// CVAT video XML format.
///
/// Supports:
/// - Rectangle tracks with keyframe, outside and occluded flags
/// - Box `<attribute>` children and rotation
/// - `.xml` files, CVAT export archives and one file per video
///
/// Does not support:
/// - Image-mode documents
/// - Polygon, polyline, point and mask tracks (skipped with warning)
pub struct CvatVideoFormat;

impl VideoFormat for CvatVideoFormat {
    fn id(&self) -> &'static str {
        "cvat_video"
    }

    fn display_name(&self) -> &'static str {
        "CVAT for video (XML)"
    }

    fn extensions(&self) -> &[&'static str] {
        &["xml", "zip"]
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
        log::info!("Exporting CVAT video annotations to {:?}", path);
        let mut result = ExportResult::new();

        let mut settings = CvatVideoSettings {
            video_name: options.video_name.clone(),
            video_width: options.video_width.or(data.video_width),
            video_height: options.video_height.or(data.video_height),
            seq_length: options.seq_length.or(data.seq_length),
        };
        let single_file = has_extension(path, "xml") || has_extension(path, "zip");
        // Per-video documents resolve their own dimensions from their records
        if single_file && !data.annotations.is_empty() {
            let (w, h) = resolve_dimensions(
                (settings.video_width, settings.video_height),
                &data.annotations,
                options.video_file.as_deref(),
                options.prober(),
            )?;
            settings.video_width = settings.video_width.or(Some(w));
            settings.video_height = settings.video_height.or(Some(h));
        }

        let videos = data.source_videos();
        if single_file && videos.len() > 1 {
            result.add_warning(FormatWarning::warning(format!(
                "Writing tracks of {} videos into one document ({})",
                videos.len(),
                videos.join(", ")
            )));
        }
        if single_file && settings.video_name.is_none() && videos.len() != 1 {
            settings.video_name = data.video_name.clone();
        }

        if has_extension(path, "zip") {
            let doc = export_cvat_video_to_zip(&data.annotations, path, &settings)?;
            result.annotations_exported = doc.boxes;
            result.files_created.push(path.to_path_buf());
        } else if has_extension(path, "xml") {
            let doc = export_cvat_video_to_file(&data.annotations, path, &settings)?;
            result.annotations_exported = doc.boxes;
            result.files_created.push(path.to_path_buf());
        } else {
            let (files, boxes) = export_cvat_video_to_dir(&data.annotations, path, &settings)?;
            result.annotations_exported = boxes;
            result.files_created = files;
        }
        result.tracks_exported = data.track_count();

        log::info!(
            "CVAT video export complete: {} boxes, {} tracks",
            result.annotations_exported,
            result.tracks_exported
        );
        Ok(result)
    }

    fn import(&self, path: &Path, options: &ImportOptions) -> Result<VideoDataset, FormatError> {
        log::info!("Importing CVAT video annotations from {:?}", path);

        let data = if has_extension(path, "zip") {
            load_cvat_video_from_zip(path, options)?
        } else {
            load_cvat_video_from_file(path, options)?
        };

        log::info!(
            "CVAT video import complete: {} boxes, {} tracks",
            data.total_annotations(),
            data.track_count()
        );
        Ok(data)
    }
}
