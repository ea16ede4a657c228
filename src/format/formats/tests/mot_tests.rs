//! Tests for the MOT format.

use crate::format::category::CategoryTable;
use crate::format::dataset::VideoDataset;
use crate::format::error::FormatError;
use crate::format::formats::MotFormat;
use crate::format::formats::mot::{
    MotContext, export_bbox_to_line, export_context, export_mot_to_zip, import_bbox_from_line,
    load_mot_from_dir, load_mot_from_str, load_mot_from_zip, render_mot,
};
use crate::format::probe::VideoProber;
use crate::format::probe::tests::FakeProber;
use crate::format::traits::{ExportOptions, ImportOptions, VideoFormat};
use crate::format::video::{CoordinateStyle, SourceFormat, VideoBBox};

fn context() -> MotContext {
    MotContext {
        categories: CategoryTable::from_pairs([(1, "person"), (2, "car")]),
        ..MotContext::new()
    }
    .with_dimensions(Some(1920), Some(1080))
}

fn pixel_box(track: i64, frame: u32, left: f64) -> VideoBBox {
    VideoBBox::new(track, frame, left, 10.0, 20.0, 40.0, CoordinateStyle::Denormalized)
        .with_category("person")
        .with_dimensions(1920, 1080)
}

fn first_fields(content: &str) -> Vec<u32> {
    content
        .lines()
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect()
}

#[test]
fn test_mot_format_metadata() {
    let format = MotFormat;

    assert_eq!(format.id(), "mot");
    assert_eq!(format.display_name(), "MOT (gt.txt)");
    assert!(format.extensions().contains(&"txt"));
    assert!(format.extensions().contains(&"zip"));
    assert!(format.is_dense(), "MOT needs one row per visible frame");
}

#[test]
fn test_frame_number_convention() {
    let mut ctx = context();
    for frame in [1_i64, 2, 7, 250] {
        let line = format!("{},1,10,20,30,40,1,1,1.0", frame);
        let ann = import_bbox_from_line(&line, 1, &ctx).unwrap();
        assert_eq!(i64::from(ann.frame_number), frame - 1);

        let exported = export_bbox_to_line(&ann, &mut ctx).unwrap();
        assert_eq!(
            exported.split(',').next().unwrap(),
            (ann.frame_number + 1).to_string()
        );
    }
}

#[test]
fn test_import_line_fields() {
    let ann = import_bbox_from_line("3,7,10.5,20,30,40,0,2,0.5", 1, &context()).unwrap();

    assert_eq!(ann.frame_number, 2);
    assert_eq!(ann.track_id, 7);
    assert_eq!(ann.left, 10.5);
    assert_eq!(ann.top, 20.0);
    assert_eq!(ann.width, 30.0);
    assert_eq!(ann.height, 40.0);
    assert_eq!(ann.visibility, 0.5);
    assert!(ann.keyframe);
    assert!(ann.meta.ignored);
    assert_eq!(ann.meta.outside, None);
    assert_eq!(ann.meta.source_format, Some(SourceFormat::Mot));
    assert_eq!(ann.coordinate_style, CoordinateStyle::Denormalized);
    assert_eq!(ann.video_width, Some(1920));
    assert_eq!(ann.categories.keys().collect::<Vec<_>>(), vec!["car"]);
}

#[test]
fn test_zero_visibility_is_outside() {
    let ann = import_bbox_from_line("1,1,0,0,10,10,1,1,0", 1, &context()).unwrap();
    assert_eq!(ann.meta.outside, Some(true));
    assert!(ann.is_outside());
}

#[test]
fn test_unknown_class_uses_default_category() {
    let ctx = context();
    let unknown = import_bbox_from_line("1,1,0,0,10,10,1,9,1", 1, &ctx).unwrap();
    assert!(unknown.categories.contains_key("object"));

    let negative = import_bbox_from_line("1,1,0,0,10,10,1,-1,1", 1, &ctx).unwrap();
    assert!(negative.categories.contains_key("object"));
}

#[test]
fn test_extra_fields_accepted() {
    let ann = import_bbox_from_line("1,1,0,0,10,10,1,1,1,-1", 1, &context()).unwrap();
    assert_eq!(ann.frame_number, 0);
}

#[test]
fn test_too_few_fields() {
    match import_bbox_from_line("1,1,0,0,10", 4, &context()) {
        Err(FormatError::MalformedLine {
            line_number, line, ..
        }) => {
            assert_eq!(line_number, 4);
            assert_eq!(line, "1,1,0,0,10");
        }
        other => panic!("Expected MalformedLine, got {:?}", other),
    }
}

#[test]
fn test_non_numeric_field() {
    let err = import_bbox_from_line("1,1,abc,0,10,10,1,1,1", 2, &context()).unwrap_err();
    match err {
        FormatError::MalformedLine { reason, .. } => {
            assert_eq!(reason, "x 'abc' is not a number")
        }
        other => panic!("Expected MalformedLine, got {:?}", other),
    }
}

#[test]
fn test_frame_past_last_representable_is_invalid() {
    let err = import_bbox_from_line("4294967296,1,0,0,10,10,1,1,1", 1, &context()).unwrap_err();
    assert!(matches!(err, FormatError::InvalidFrame { frame: 4294967296, .. }));

    let mut ctx = context();
    let ann = import_bbox_from_line("4294967295,1,0,0,10,10,1,1,1", 1, &ctx).unwrap();
    assert_eq!(ann.frame_number, u32::MAX - 1);
    let (content, rows) = render_mot(&[ann], &mut ctx).unwrap();
    assert_eq!(rows, 1);
    assert!(content.starts_with("4294967295,1,"));
    assert_eq!(ctx.seq_length, Some(u32::MAX));
}

#[test]
fn test_export_line_at_max_frame() {
    let line = export_bbox_to_line(&pixel_box(1, u32::MAX, 0.0), &mut context()).unwrap();
    assert!(line.starts_with("4294967296,1,"));
}

#[test]
fn test_frame_zero_is_invalid() {
    let err = import_bbox_from_line("0,1,0,0,10,10,1,1,1", 1, &context()).unwrap_err();
    assert!(matches!(err, FormatError::InvalidFrame { frame: 0, .. }));
}

#[test]
fn test_load_skips_comments_and_blank_lines() {
    let content = "# frame,track,...\n\n1,1,0,0,10,10,1,1,1\n  \n2,1,1,0,10,10,1,1,1\n";
    let anns = load_mot_from_str(content, &context()).unwrap();
    assert_eq!(anns.len(), 2);

    // Line numbers count every physical line
    let err = load_mot_from_str("# header\n\n1,2,3\n", &context()).unwrap_err();
    assert!(matches!(err, FormatError::MalformedLine { line_number: 3, .. }));
}

#[test]
fn test_line_roundtrip() {
    let mut ctx = context();
    let mut ann = VideoBBox::new(4, 11, 100.0, 150.0, 50.0, 120.0, CoordinateStyle::Denormalized)
        .with_category("car")
        .with_visibility(0.75);
    ann.meta.ignored = true;

    let line = export_bbox_to_line(&ann, &mut ctx).unwrap();
    assert_eq!(line, "12,4,100,150,50,120,0,2,0.75");

    let back = import_bbox_from_line(&line, 1, &ctx).unwrap();
    assert_eq!(back.frame_number, ann.frame_number);
    assert_eq!(back.track_id, ann.track_id);
    assert_eq!(back.left, ann.left);
    assert_eq!(back.top, ann.top);
    assert_eq!(back.width, ann.width);
    assert_eq!(back.height, ann.height);
    assert_eq!(back.visibility, ann.visibility);
    assert_eq!(back.meta.ignored, ann.meta.ignored);
}

#[test]
fn test_export_keeps_fractional_coordinates() {
    let mut ctx = context();
    let ann = VideoBBox::new(1, 0, 10.25, 3.0, 7.5, 2.0, CoordinateStyle::Denormalized)
        .with_category("person");
    assert_eq!(
        export_bbox_to_line(&ann, &mut ctx).unwrap(),
        "1,1,10.25,3,7.5,2,1,1,1.0"
    );
}

#[test]
fn test_export_denormalizes_with_context_dimensions() {
    let mut ctx = MotContext::new().with_dimensions(Some(200), Some(100));
    let ann = VideoBBox::new(1, 0, 0.5, 0.5, 0.25, 0.5, CoordinateStyle::Normalized)
        .with_category("person");
    assert_eq!(
        export_bbox_to_line(&ann, &mut ctx).unwrap(),
        "1,1,100,50,50,50,1,1,1.0"
    );
}

#[test]
fn test_export_outside_writes_zero_visibility() {
    let mut ctx = context();
    let mut ann = pixel_box(1, 0, 0.0);
    ann.meta.outside = Some(true);
    let line = export_bbox_to_line(&ann, &mut ctx).unwrap();
    assert!(line.ends_with(",0.0"));
}

#[test]
fn test_export_requires_one_category() {
    let mut ctx = context();
    let ann = pixel_box(1, 0, 0.0).with_category("car");
    assert!(matches!(
        export_bbox_to_line(&ann, &mut ctx),
        Err(FormatError::MultipleCategories { count: 2, .. })
    ));
}

#[test]
fn test_category_assignment_is_deterministic() {
    let mut ctx = MotContext::new();
    let bike = VideoBBox::new(1, 0, 0.0, 0.0, 1.0, 1.0, CoordinateStyle::Denormalized)
        .with_category("bike");
    let dog = VideoBBox::new(2, 0, 0.0, 0.0, 1.0, 1.0, CoordinateStyle::Denormalized)
        .with_category("dog");

    let first = render_mot(&[bike.clone(), dog.clone()], &mut ctx).unwrap().0;
    assert_eq!(ctx.categories.find("bike"), Some(1));
    assert_eq!(ctx.categories.find("dog"), Some(2));

    // Same context, same ids
    let second = render_mot(&[bike, dog], &mut ctx).unwrap().0;
    assert_eq!(first, second);
    assert_eq!(ctx.categories.len(), 2);
}

#[test]
fn test_densify_fills_exactly_the_gap() {
    let mut ctx = MotContext::new();
    let anns = vec![pixel_box(1, 0, 0.0), pixel_box(1, 4, 100.0)];

    let (content, rows) = render_mot(&anns, &mut ctx).unwrap();
    assert_eq!(rows, 5);
    assert_eq!(first_fields(&content), vec![1, 2, 3, 4, 5]);

    let lefts: Vec<f64> = content
        .lines()
        .map(|l| l.split(',').nth(2).unwrap().parse().unwrap())
        .collect();
    for (got, want) in lefts.iter().zip([0.0, 25.0, 50.0, 75.0, 100.0]) {
        assert!((got - want).abs() < 1e-6);
    }
    assert!(content.ends_with('\n'));
    assert_eq!(ctx.seq_length, Some(5));
}

#[test]
fn test_densify_keeps_gap_after_disabled_keyframe() {
    let mut ctx = MotContext::new();
    let mut anns = vec![
        pixel_box(1, 0, 0.0),
        pixel_box(1, 9, 9.0),
        pixel_box(1, 10, 10.0),
        pixel_box(1, 99, 99.0),
    ];
    anns[1].meta.ls_enabled = Some(false);
    anns[2].meta.outside = Some(true);
    anns[2].visibility = 0.0;

    let (content, _) = render_mot(&anns, &mut ctx).unwrap();
    let frames = first_fields(&content);
    assert!(frames.iter().all(|&f| f <= 11 || f >= 100));
    assert_eq!(frames.iter().filter(|&&f| f <= 11).count(), 11);
    assert_eq!(*frames.last().unwrap(), 100);
}

#[test]
fn test_rows_sorted_by_frame_then_track() {
    let mut ctx = MotContext::new();
    let anns = vec![pixel_box(2, 1, 0.0), pixel_box(1, 1, 0.0), pixel_box(2, 0, 0.0)];
    let (content, _) = render_mot(&anns, &mut ctx).unwrap();
    let keys: Vec<(u32, i64)> = content
        .lines()
        .map(|l| {
            let mut parts = l.split(',');
            (
                parts.next().unwrap().parse().unwrap(),
                parts.next().unwrap().parse().unwrap(),
            )
        })
        .collect();
    assert_eq!(keys, vec![(1, 2), (2, 1), (2, 2)]);
}

#[test]
fn test_extrapolates_to_seq_length() {
    let mut ctx = MotContext {
        seq_length: Some(6),
        ..MotContext::new()
    };
    let (content, rows) = render_mot(&[pixel_box(1, 2, 0.0)], &mut ctx).unwrap();
    assert_eq!(rows, 4);
    assert_eq!(first_fields(&content), vec![3, 4, 5, 6]);
    assert_eq!(ctx.seq_length, Some(6));
}

#[test]
fn test_empty_export_has_no_trailing_newline() {
    let mut ctx = MotContext::new();
    let (content, rows) = render_mot(&[], &mut ctx).unwrap();
    assert_eq!(content, "");
    assert_eq!(rows, 0);
}

#[test]
fn test_load_sequence_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("gt")).unwrap();
    std::fs::write(
        dir.path().join("gt").join("gt.txt"),
        "1,1,10,20,30,40,1,1,1\n2,1,12,20,30,40,1,2,1\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("gt").join("labels.txt"), "person\ncar\n").unwrap();
    std::fs::write(
        dir.path().join("seqinfo.ini"),
        "[Sequence]\nname=seq01\nframeRate=25\nseqLength=50\nimWidth=640\nimHeight=480\n",
    )
    .unwrap();

    let (anns, ctx) = load_mot_from_dir(dir.path(), &ImportOptions::new()).unwrap();
    assert_eq!(anns.len(), 2);
    assert_eq!(ctx.seq_name.as_deref(), Some("seq01"));
    assert_eq!(ctx.seq_length, Some(50));
    assert_eq!(anns[1].categories.keys().collect::<Vec<_>>(), vec!["car"]);
    assert_eq!(anns[0].video_width, Some(640));

    // Explicit dimensions win over seqinfo.ini
    let options = ImportOptions::new().dimensions(1920, 1080);
    let (anns, ctx) = load_mot_from_dir(dir.path(), &options).unwrap();
    assert_eq!(ctx.video_width, Some(1920));
    assert_eq!(anns[0].video_height, Some(1080));
}

#[test]
fn test_load_directory_without_gt() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_mot_from_dir(dir.path(), &ImportOptions::new()),
        Err(FormatError::MissingFile { .. })
    ));
}

#[test]
fn test_zip_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seq.zip");

    let mut ctx = MotContext {
        seq_name: Some("clip".to_string()),
        ..MotContext::new()
    }
    .with_dimensions(Some(1920), Some(1080));
    let anns = vec![pixel_box(3, 0, 0.0), pixel_box(3, 2, 20.0)];
    let rows = export_mot_to_zip(&anns, &mut ctx, &path).unwrap();
    assert_eq!(rows, 3);

    let (loaded, loaded_ctx) = load_mot_from_zip(&path, &ImportOptions::new()).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded_ctx.seq_name.as_deref(), Some("clip"));
    assert_eq!(loaded_ctx.seq_length, Some(3));
    assert_eq!(loaded_ctx.categories.find("person"), Some(1));
    assert!((loaded[1].left - 10.0).abs() < 1e-6);
}

#[test]
fn test_zip_with_sequence_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested.zip");
    crate::format::archive::write_archive(
        &path,
        &[(
            "seq01/gt/gt.txt".to_string(),
            b"5,2,0,0,10,10,1,1,1\n".to_vec(),
        )],
    )
    .unwrap();

    let (anns, _) = load_mot_from_zip(&path, &ImportOptions::new()).unwrap();
    assert_eq!(anns.len(), 1);
    assert_eq!(anns[0].frame_number, 4);
}

#[test]
fn test_format_export_and_import_directory() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("seq01");

    let data = VideoDataset::from_annotations(vec![pixel_box(1, 0, 0.0), pixel_box(1, 1, 5.0)])
        .with_dimensions(1920, 1080);
    let result = MotFormat
        .export(&data, &out, &ExportOptions::new().frame_rate(25.0).probe(false))
        .unwrap();
    assert_eq!(result.annotations_exported, 2);
    assert_eq!(result.tracks_exported, 1);
    assert_eq!(result.files_created.len(), 3);

    let seqinfo = std::fs::read_to_string(out.join("seqinfo.ini")).unwrap();
    assert!(seqinfo.contains("frameRate=25\n"));
    assert!(seqinfo.contains("imWidth=1920\n"));

    let back = MotFormat.import(&out, &ImportOptions::new()).unwrap();
    assert_eq!(back.total_annotations(), 2);
    assert_eq!(back.frame_rate, Some(25.0));
    assert_eq!(back.categories.find("person"), Some(1));
    assert_eq!(back.imported_from.as_deref(), Some("mot"));
}

#[test]
fn test_format_warns_about_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let mut ann = pixel_box(1, 0, 0.0);
    ann.rotation = 15.0;
    let data = VideoDataset::from_annotations(vec![ann]);

    let result = MotFormat
        .export(
            &data,
            &dir.path().join("gt.txt"),
            &ExportOptions::new().probe(false),
        )
        .unwrap();
    assert!(result.has_warnings());
    assert_eq!(result.warnings[0].track_id, Some(1));
}

#[test]
fn test_format_import_bare_file_reads_labels() {
    let dir = tempfile::tempdir().unwrap();
    let gt_dir = dir.path().join("gt");
    std::fs::create_dir_all(&gt_dir).unwrap();
    std::fs::write(gt_dir.join("gt.txt"), "1,1,0,0,10,10,1,2,1\n").unwrap();
    std::fs::write(gt_dir.join("labels.txt"), "person\ncar\n").unwrap();

    let data = MotFormat
        .import(&gt_dir.join("gt.txt"), &ImportOptions::new())
        .unwrap();
    assert!(data.annotations[0].categories.contains_key("car"));
}

#[test]
fn test_export_context_probes_sequence_length() {
    let data = VideoDataset::from_annotations(vec![pixel_box(1, 0, 0.0), pixel_box(1, 3, 30.0)]);
    let options = ExportOptions::new().video_file("clip.mp4");
    let prober = FakeProber::video(1920, 1080, 25.0, 10);

    let mut ctx = export_context(&data, &options, Some(&prober as &dyn VideoProber)).unwrap();
    assert_eq!(ctx.seq_length, Some(10));
    assert_eq!(ctx.frame_rate, 25.0);

    // Held through the last frame of the probed video
    let (content, rows) = render_mot(&data.annotations, &mut ctx).unwrap();
    assert_eq!(rows, 10);
    assert_eq!(first_fields(&content), (1..=10).collect::<Vec<u32>>());
}

#[test]
fn test_export_context_keeps_known_length() {
    let mut data = VideoDataset::from_annotations(vec![pixel_box(1, 0, 0.0)]);
    data.seq_length = Some(4);
    let options = ExportOptions::new().video_file("clip.mp4");
    let prober = FakeProber::video(1920, 1080, 25.0, 10);

    let ctx = export_context(&data, &options, Some(&prober as &dyn VideoProber)).unwrap();
    assert_eq!(ctx.seq_length, Some(4));

    let ctx = export_context(&data, &ExportOptions::new(), None).unwrap();
    assert_eq!(ctx.seq_length, Some(4));
    assert_eq!(ctx.frame_rate, 30.0);
}
