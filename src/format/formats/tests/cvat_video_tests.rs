//! Tests for the CVAT video XML format.

use crate::format::dataset::VideoDataset;
use crate::format::error::FormatError;
use crate::format::formats::CvatVideoFormat;
use crate::format::formats::cvat_video::{
    CVAT_ATTRIBUTES_KEY, CvatVideoSettings, cvat_video_to_xml, export_cvat_video_to_dir,
    export_cvat_video_to_zip, load_cvat_video_from_str, load_cvat_video_from_zip,
};
use crate::format::traits::{ExportOptions, ImportOptions, VideoFormat};
use crate::format::video::{CoordinateStyle, SourceFormat, VideoBBox};

const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <task>
      <mode>interpolation</mode>
      <size>120</size>
      <original_size>
        <width>1920</width>
        <height>1080</height>
      </original_size>
      <source>clip.mp4</source>
    </task>
  </meta>
  <track id="0" label="person" source="manual">
    <box frame="0" keyframe="1" outside="0" occluded="0" xtl="100" ytl="150" xbr="150" ybr="270" z_order="2"/>
    <box frame="1" keyframe="1" outside="0" occluded="1" xtl="110" ytl="150" xbr="160" ybr="270" z_order="2"/>
    <box frame="2" keyframe="1" outside="1" occluded="0" xtl="110" ytl="150" xbr="160" ybr="270" z_order="2"/>
    <box frame="3" keyframe="1" outside="0" occluded="0" xtl="120" ytl="150" xbr="170" ybr="270" z_order="2"/>
  </track>
</annotations>
"#;

fn no_probe() -> ImportOptions {
    ImportOptions::new().probe(false)
}

fn pixel_box(track: i64, frame: u32) -> VideoBBox {
    VideoBBox::new(track, frame, 10.0, 20.0, 30.0, 40.0, CoordinateStyle::Denormalized)
        .with_category("person")
        .with_dimensions(1920, 1080)
}

fn box_count(xml: &str) -> usize {
    xml.matches("<box ").count()
}

#[test]
fn test_cvat_video_format_metadata() {
    let format = CvatVideoFormat;

    assert_eq!(format.id(), "cvat_video");
    assert_eq!(format.display_name(), "CVAT for video (XML)");
    assert!(format.extensions().contains(&"xml"));
    assert!(!format.is_dense(), "CVAT interpolates between keyframes itself");
}

#[test]
fn test_import_box_geometry() {
    let data = load_cvat_video_from_str(SAMPLE_XML, &no_probe()).unwrap();
    assert_eq!(data.total_annotations(), 4);
    assert_eq!(data.seq_length, Some(120));
    assert_eq!(data.video_name.as_deref(), Some("clip.mp4"));
    assert_eq!(data.video_width, Some(1920));

    let first = &data.annotations[0];
    assert_eq!(first.frame_number, 0);
    assert_eq!(first.track_id, 0);
    assert_eq!(first.left, 100.0);
    assert_eq!(first.top, 150.0);
    assert_eq!(first.width, 50.0);
    assert_eq!(first.height, 120.0);
    assert_eq!(first.coordinate_style, CoordinateStyle::Denormalized);
    assert!(first.keyframe);
    assert_eq!(first.meta.z_order, Some(2));
    assert_eq!(first.meta.outside, Some(false));
    assert_eq!(first.meta.source_format, Some(SourceFormat::Cvat));
    assert_eq!(first.filename.as_deref(), Some("clip.mp4"));
    assert!(first.categories.contains_key("person"));
}

#[test]
fn test_visibility_from_flags() {
    let data = load_cvat_video_from_str(SAMPLE_XML, &no_probe()).unwrap();
    let visibility: Vec<f64> = data.annotations.iter().map(|a| a.visibility).collect();
    assert_eq!(visibility, vec![1.0, 0.5, 0.0, 1.0]);
    assert!(data.annotations[2].is_outside());
}

#[test]
fn test_outside_wins_over_occluded() {
    let xml = r#"<annotations><meta><task><original_size><width>10</width><height>10</height></original_size></task></meta>
        <track id="1" label="a"><box frame="0" outside="1" occluded="1" xtl="0" ytl="0" xbr="1" ybr="1"/></track>
        </annotations>"#;
    let data = load_cvat_video_from_str(xml, &no_probe()).unwrap();
    assert_eq!(data.annotations[0].visibility, 0.0);
    // Missing keyframe attribute means not a keyframe
    assert!(!data.annotations[0].keyframe);
}

#[test]
fn test_outside_roundtrip() {
    let data = load_cvat_video_from_str(SAMPLE_XML, &no_probe()).unwrap();
    let doc = cvat_video_to_xml(&data.annotations, &CvatVideoSettings::default()).unwrap();
    assert_eq!(doc.boxes, 4);
    assert!(!doc.xml.contains(r#"outside="1" occluded="1""#));

    let back = load_cvat_video_from_str(&doc.xml, &no_probe()).unwrap();
    assert_eq!(back.total_annotations(), 4);
    for (a, b) in data.annotations.iter().zip(&back.annotations) {
        assert_eq!(a.frame_number, b.frame_number);
        assert_eq!(a.visibility, b.visibility);
        assert_eq!(a.meta.outside, b.meta.outside);
        assert!((a.left - b.left).abs() < 1e-6);
    }
}

#[test]
fn test_missing_box_attribute() {
    let xml = r#"<annotations><meta><task><original_size><width>10</width><height>10</height></original_size></task></meta>
        <track id="1" label="a"><box frame="0" ytl="0" xbr="1" ybr="1"/></track></annotations>"#;
    match load_cvat_video_from_str(xml, &no_probe()) {
        Err(FormatError::MissingAttribute { element, attribute }) => {
            assert_eq!(element, "box");
            assert_eq!(attribute, "xtl");
        }
        other => panic!("Expected MissingAttribute, got {:?}", other),
    }
}

#[test]
fn test_unsupported_elements_are_skipped() {
    let xml = r#"<annotations>
        <meta><task><mode>interpolation</mode><original_size><width>10</width><height>10</height></original_size></task></meta>
        <tag label="night" frame="0"/>
        <track id="1" label="a">
          <polygon frame="0" points="0,0;1,1;1,0"/>
          <box frame="0" xtl="0" ytl="0" xbr="1" ybr="1"/>
        </track>
        </annotations>"#;
    let data = load_cvat_video_from_str(xml, &no_probe()).unwrap();
    assert_eq!(data.total_annotations(), 1);
    assert_eq!(data.warnings.len(), 2);
    assert!(data.warnings[0].message.contains("<tag>"));
    assert!(data.warnings[1].message.contains("<polygon>"));
}

#[test]
fn test_image_mode_is_rejected() {
    let xml = r#"<annotations><image id="0" name="a.jpg" width="10" height="10"><box label="a" xtl="0" ytl="0" xbr="1" ybr="1"/></image></annotations>"#;
    assert!(matches!(
        load_cvat_video_from_str(xml, &no_probe()),
        Err(FormatError::InvalidFormat { .. })
    ));
}

#[test]
fn test_missing_dimensions() {
    let xml = r#"<annotations><track id="1" label="a"><box frame="0" xtl="0" ytl="0" xbr="1" ybr="1"/></track></annotations>"#;
    match load_cvat_video_from_str(xml, &no_probe()) {
        Err(FormatError::UnresolvedDimensions { missing, .. }) => {
            assert_eq!(missing, "video_width, video_height")
        }
        other => panic!("Expected UnresolvedDimensions, got {:?}", other),
    }

    let data = load_cvat_video_from_str(xml, &no_probe().dimensions(640, 480)).unwrap();
    assert_eq!(data.annotations[0].video_width, Some(640));
    assert_eq!(data.annotations[0].video_height, Some(480));
}

#[test]
fn test_frame_past_last_representable_is_invalid() {
    let xml = r#"<annotations><meta><task><original_size><width>10</width><height>10</height></original_size></task></meta>
        <track id="1" label="a"><box frame="4294967295" xtl="0" ytl="0" xbr="1" ybr="1"/></track></annotations>"#;
    assert!(matches!(
        load_cvat_video_from_str(xml, &no_probe()),
        Err(FormatError::InvalidFrame { frame: 4294967295, .. })
    ));
}

#[test]
fn test_export_at_last_frame() {
    let mut ann = pixel_box(1, u32::MAX - 1);
    ann.meta.ls_enabled = Some(false);
    let doc = cvat_video_to_xml(&[ann], &CvatVideoSettings::default()).unwrap();

    // The marker lands on u32::MAX and the size stops there
    assert_eq!(doc.boxes, 2);
    assert!(doc.xml.contains(r#"<box frame="4294967295" keyframe="1" outside="1""#));
    assert!(doc.xml.contains("<size>4294967295</size>"));
}

#[test]
fn test_negative_frame_is_invalid() {
    let xml = r#"<annotations><meta><task><original_size><width>10</width><height>10</height></original_size></task></meta>
        <track id="1" label="a"><box frame="-1" xtl="0" ytl="0" xbr="1" ybr="1"/></track></annotations>"#;
    assert!(matches!(
        load_cvat_video_from_str(xml, &no_probe()),
        Err(FormatError::InvalidFrame { frame: -1, .. })
    ));
}

#[test]
fn test_box_attributes_roundtrip() {
    let xml = r#"<annotations><meta><task><original_size><width>100</width><height>100</height></original_size></task></meta>
        <track id="4" label="car">
          <box frame="5" keyframe="1" xtl="0" ytl="0" xbr="10" ybr="10" rotation="12.5">
            <attribute name="color">red</attribute>
          </box>
        </track></annotations>"#;
    let data = load_cvat_video_from_str(xml, &no_probe()).unwrap();
    let ann = &data.annotations[0];
    assert_eq!(ann.rotation, 12.5);
    assert_eq!(ann.meta.extra[CVAT_ATTRIBUTES_KEY]["color"], "red");

    let doc = cvat_video_to_xml(&data.annotations, &CvatVideoSettings::default()).unwrap();
    assert!(doc.xml.contains(r#"<attribute name="color">red</attribute>"#));
    assert!(doc.xml.contains(r#"rotation="12.50""#));

    let back = load_cvat_video_from_str(&doc.xml, &no_probe()).unwrap();
    assert_eq!(back.annotations[0].meta.extra, ann.meta.extra);
}

#[test]
fn test_export_document_structure() {
    let doc = cvat_video_to_xml(
        &[
            pixel_box(7, 0).with_filename("walk.mp4"),
            pixel_box(7, 4).with_filename("walk.mp4"),
        ],
        &CvatVideoSettings {
            seq_length: Some(3),
            ..CvatVideoSettings::default()
        },
    )
    .unwrap();

    assert!(doc.xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
    assert!(doc.xml.contains("<version>1.1</version>"));
    assert!(doc.xml.contains("<mode>interpolation</mode>"));
    // max(frame) + 1 beats the declared sequence length
    assert!(doc.xml.contains("<size>5</size>"));
    assert!(doc.xml.contains("<width>1920</width>"));
    assert!(doc.xml.contains("<name>person</name>"));
    assert!(doc.xml.contains(r#"<track id="7" label="person" source="manual">"#));
    assert!(doc.xml.contains(
        r#"<box frame="0" keyframe="1" outside="0" occluded="0" xtl="10.00" ytl="20.00" xbr="40.00" ybr="60.00" z_order="0"/>"#
    ));
    assert!(doc.xml.contains("<source>walk.mp4</source>"));
    assert!(doc.xml.ends_with("</annotations>\n"));
    assert_eq!(doc.tracks, 1);
    assert_eq!(doc.boxes, 2);
}

#[test]
fn test_export_denormalizes_records() {
    let ann = VideoBBox::new(1, 0, 0.5, 0.5, 0.25, 0.25, CoordinateStyle::Normalized)
        .with_category("person");
    let doc = cvat_video_to_xml(
        &[ann],
        &CvatVideoSettings {
            video_width: Some(200),
            video_height: Some(100),
            ..CvatVideoSettings::default()
        },
    )
    .unwrap();
    assert!(doc.xml.contains(r#"xtl="100.00" ytl="50.00" xbr="150.00" ybr="75.00""#));
}

#[test]
fn test_boundary_marker_for_disabled_interpolation() {
    let mut curr = pixel_box(1, 9);
    curr.meta.ls_enabled = Some(false);
    let doc = cvat_video_to_xml(
        &[pixel_box(1, 0), curr, pixel_box(1, 99)],
        &CvatVideoSettings::default(),
    )
    .unwrap();

    assert_eq!(doc.boxes, 4);
    assert!(doc.xml.contains(r#"<box frame="10" keyframe="1" outside="1" occluded="0""#));

    let back = load_cvat_video_from_str(&doc.xml, &no_probe()).unwrap();
    let frames: Vec<u32> = back.annotations.iter().map(|a| a.frame_number).collect();
    assert_eq!(frames, vec![0, 9, 10, 99]);
    assert!(back.annotations[2].is_outside());
}

#[test]
fn test_boundary_marker_bounded_by_sequence() {
    let mut last = pixel_box(1, 9);
    last.meta.ls_enabled = Some(false);

    let bounded = cvat_video_to_xml(
        &[last.clone()],
        &CvatVideoSettings {
            seq_length: Some(10),
            ..CvatVideoSettings::default()
        },
    )
    .unwrap();
    assert_eq!(bounded.boxes, 1);

    let open = cvat_video_to_xml(&[last], &CvatVideoSettings::default()).unwrap();
    assert_eq!(open.boxes, 2);
}

#[test]
fn test_export_rejects_multiple_categories() {
    let ann = pixel_box(1, 0).with_category("car");
    assert!(matches!(
        cvat_video_to_xml(&[ann], &CvatVideoSettings::default()),
        Err(FormatError::MultipleCategories { count: 2, .. })
    ));
}

#[test]
fn test_empty_export_uses_default_dimensions() {
    let doc = cvat_video_to_xml(&[], &CvatVideoSettings::default()).unwrap();
    assert!(doc.xml.contains("<width>1920</width>"));
    assert!(doc.xml.contains("<height>1080</height>"));
    assert_eq!(box_count(&doc.xml), 0);
}

#[test]
fn test_zip_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("task.zip");

    let doc = export_cvat_video_to_zip(
        &[pixel_box(2, 0), pixel_box(2, 8)],
        &path,
        &CvatVideoSettings::default(),
    )
    .unwrap();
    assert_eq!(doc.boxes, 2);

    let data = load_cvat_video_from_zip(&path, &no_probe()).unwrap();
    assert_eq!(data.total_annotations(), 2);
    assert_eq!(data.annotations[1].frame_number, 8);
}

#[test]
fn test_directory_export_one_file_per_video() {
    let dir = tempfile::tempdir().unwrap();
    let anns = vec![
        pixel_box(1, 0).with_filename("a.mp4"),
        pixel_box(1, 0).with_filename("b.mp4"),
        pixel_box(2, 3).with_filename("b.mp4"),
    ];

    let (files, boxes) =
        export_cvat_video_to_dir(&anns, dir.path(), &CvatVideoSettings::default()).unwrap();
    assert_eq!(boxes, 3);
    assert_eq!(files, vec![dir.path().join("a.xml"), dir.path().join("b.xml")]);

    let b = std::fs::read_to_string(dir.path().join("b.xml")).unwrap();
    assert!(b.contains("<source>b.mp4</source>"));
    assert_eq!(box_count(&b), 2);
}

#[test]
fn test_directory_export_rejects_single_name_for_many_videos() {
    let dir = tempfile::tempdir().unwrap();
    let anns = vec![
        pixel_box(1, 0).with_filename("a.mp4"),
        pixel_box(1, 0).with_filename("b.mp4"),
    ];
    let settings = CvatVideoSettings {
        video_name: Some("merged.mp4".to_string()),
        ..CvatVideoSettings::default()
    };
    match export_cvat_video_to_dir(&anns, dir.path(), &settings) {
        Err(FormatError::AmbiguousVideo { video_name, sources }) => {
            assert_eq!(video_name, "merged.mp4");
            assert_eq!(sources, vec!["a.mp4", "b.mp4"]);
        }
        other => panic!("Expected AmbiguousVideo, got {:?}", other),
    }
}

#[test]
fn test_format_export_and_import_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("annotations.xml");
    let data = VideoDataset::from_annotations(vec![pixel_box(1, 0), pixel_box(1, 5)]);

    let result = CvatVideoFormat
        .export(&data, &path, &ExportOptions::new().video_name("walk.mp4").probe(false))
        .unwrap();
    assert_eq!(result.annotations_exported, 2);
    assert_eq!(result.files_created, vec![path.clone()]);

    let back = CvatVideoFormat.import(&path, &no_probe()).unwrap();
    assert_eq!(back.video_name.as_deref(), Some("walk.mp4"));
    assert_eq!(back.imported_from.as_deref(), Some("cvat_video"));
    assert_eq!(back.track_count(), 1);
}
