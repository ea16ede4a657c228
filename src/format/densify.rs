//! Frame densification and interpolation policy.
//!
//! Three notions of "a box persists across frames" meet here:
//!
//! - CVAT keeps sparse keyframes and interpolates between them until an
//!   `outside` box ends visibility.
//! - MOT has one row per visible frame and expresses absence only by
//!   omitting rows.
//! - Label Studio keeps sparse keyframes whose `enabled` flag says whether
//!   the UI should interpolate to the next keyframe.
//!
//! Every codec's export path reads the same two predicates,
//! [`VideoBBox::is_outside`] and [`interpolation_enabled`], so that a gap
//! that is hidden in one format stays hidden in every other.

use std::collections::BTreeMap;

use crate::format::video::{SourceFormat, VideoBBox};

/// Identity of a track: source video plus track id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackKey {
    pub video: Option<String>,
    pub track_id: i64,
}

impl TrackKey {
    pub fn of(ann: &VideoBBox) -> Self {
        Self {
            video: ann.video_key().map(str::to_string),
            track_id: ann.track_id,
        }
    }
}

/// Group records into tracks, each sorted by frame number.
///
/// Sorting is stable, so records sharing a frame keep their input order.
pub fn group_tracks(annotations: &[VideoBBox]) -> BTreeMap<TrackKey, Vec<VideoBBox>> {
    let mut tracks: BTreeMap<TrackKey, Vec<VideoBBox>> = BTreeMap::new();
    for ann in annotations {
        tracks.entry(TrackKey::of(ann)).or_default().push(ann.clone());
    }
    for track in tracks.values_mut() {
        track.sort_by_key(|a| a.frame_number);
    }
    tracks
}

/// Split records by source video, keeping input order inside each group.
pub fn group_videos(annotations: &[VideoBBox]) -> BTreeMap<Option<String>, Vec<VideoBBox>> {
    let mut videos: BTreeMap<Option<String>, Vec<VideoBBox>> = BTreeMap::new();
    for ann in annotations {
        videos
            .entry(ann.video_key().map(str::to_string))
            .or_default()
            .push(ann.clone());
    }
    videos
}

/// Whether the gap after `ann` should be filled by interpolation.
///
/// An explicit Label Studio `enabled` flag decides. Without one, MOT-sourced
/// rows are already dense, so a gap after them means the object was hidden;
/// every other source interpolates.
pub fn interpolation_enabled(ann: &VideoBBox) -> bool {
    match ann.meta.ls_enabled {
        Some(enabled) => enabled,
        None => ann.meta.source_format != Some(SourceFormat::Mot),
    }
}

/// Largest `ls_frames_count` carried by any record.
pub fn max_frames_count(annotations: &[VideoBBox]) -> Option<u32> {
    annotations
        .iter()
        .filter_map(|a| a.meta.ls_frames_count)
        .max()
}

/// Last frame a trailing segment may extend to.
///
/// `max(seq_length - 1, ls_frames_count - 1)` over whichever is known.
pub fn trailing_end_frame(seq_length: Option<u32>, annotations: &[VideoBBox]) -> Option<u32> {
    let from_seq = seq_length.filter(|&n| n > 0).map(|n| n - 1);
    let from_ls = max_frames_count(annotations)
        .filter(|&n| n > 0)
        .map(|n| n - 1);
    from_seq.max(from_ls)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Synthesize the record at `frame` between two records of one track.
///
/// `t` is the fraction of the way from `curr` to `next`. The result keeps
/// `curr`'s identity and flags, is not a keyframe and is never outside.
pub fn interpolate(curr: &VideoBBox, next: &VideoBBox, frame: u32, t: f64) -> VideoBBox {
    let mut ann = curr.clone();
    ann.frame_number = frame;
    ann.keyframe = false;
    ann.left = lerp(curr.left, next.left, t);
    ann.top = lerp(curr.top, next.top, t);
    ann.width = lerp(curr.width, next.width, t);
    ann.height = lerp(curr.height, next.height, t);
    ann.rotation = lerp(curr.rotation, next.rotation, t);
    ann.visibility = lerp(curr.visibility, next.visibility, t);
    ann.timestamp = match (curr.timestamp, next.timestamp) {
        (Some(a), Some(b)) => Some(lerp(a, b, t)),
        _ => None,
    };
    ann.meta.outside = None;
    ann.imported_id = None;
    ann
}

/// Constant-geometry copy of `ann` at a later frame.
fn hold(ann: &VideoBBox, frame: u32) -> VideoBBox {
    let mut held = ann.clone();
    held.frame_number = frame;
    held.keyframe = false;
    held.timestamp = None;
    held.imported_id = None;
    held
}

/// Expand one frame-sorted track into one row per frame of its visible span.
///
/// Every input record is kept. Gaps after a visible record whose
/// interpolation is enabled are filled linearly with `t = step / (gap + 1)`;
/// gaps after an outside record, or after one with interpolation disabled,
/// stay empty. After the last record, if it is visible and enabled, rows of
/// constant geometry are added up to `end_frame`.
pub fn densify_track(track: &[VideoBBox], end_frame: Option<u32>) -> Vec<VideoBBox> {
    let mut rows = Vec::with_capacity(track.len());

    for (curr, next) in track.iter().zip(track.iter().skip(1)) {
        rows.push(curr.clone());

        let gap = next.frame_number.saturating_sub(curr.frame_number).saturating_sub(1);
        if gap == 0 || curr.is_outside() || !interpolation_enabled(curr) {
            continue;
        }
        for step in 1..=gap {
            let t = f64::from(step) / f64::from(gap + 1);
            rows.push(interpolate(curr, next, curr.frame_number + step, t));
        }
    }

    if let Some(last) = track.last() {
        rows.push(last.clone());
        if let Some(end) = end_frame {
            if !last.is_outside() && interpolation_enabled(last) && end > last.frame_number {
                rows.extend((last.frame_number + 1..=end).map(|frame| hold(last, frame)));
            }
        }
    }

    rows
}

/// Densify every track and sort the rows by `(frame, track)`.
pub fn densify(annotations: &[VideoBBox], end_frame: Option<u32>) -> Vec<VideoBBox> {
    let mut rows: Vec<VideoBBox> = group_tracks(annotations)
        .values()
        .flat_map(|track| densify_track(track, end_frame))
        .collect();
    rows.sort_by_key(|a| (a.frame_number, a.track_id));
    log::debug!(
        "Densified {} records into {} rows",
        annotations.len(),
        rows.len()
    );
    rows
}

/// Label Studio `enabled` for a visible record, given the next record of its
/// track.
///
/// An explicit flag wins. MOT rows default to disabled. Otherwise the flag
/// is off when the next record is outside, or when it is the very next frame
/// and both are keyframes (nothing to interpolate).
pub fn infer_ls_enabled(curr: &VideoBBox, next: Option<&VideoBBox>) -> bool {
    if let Some(enabled) = curr.meta.ls_enabled {
        return enabled;
    }
    if curr.meta.source_format == Some(SourceFormat::Mot) {
        return false;
    }
    match next {
        Some(next) if next.is_outside() => false,
        Some(next) => {
            !(curr.frame_number.checked_add(1) == Some(next.frame_number)
                && curr.keyframe
                && next.keyframe)
        }
        None => true,
    }
}

/// Outside marker that ends an interpolation-disabled segment in CVAT.
///
/// Returned when `curr` explicitly disables interpolation and the next
/// record neither follows immediately nor is already outside. The marker
/// sits on `curr.frame_number + 1` and is dropped past `limit`.
pub fn boundary_marker(
    curr: &VideoBBox,
    next: Option<&VideoBBox>,
    limit: Option<u32>,
) -> Option<VideoBBox> {
    if curr.meta.ls_enabled != Some(false) || curr.is_outside() {
        return None;
    }
    if let Some(next) = next {
        if curr.frame_number.checked_add(1) == Some(next.frame_number) || next.is_outside() {
            return None;
        }
    }
    let frame = curr.frame_number.checked_add(1)?;
    if limit.is_some_and(|limit| frame > limit) {
        return None;
    }

    let mut marker = hold(curr, frame);
    marker.keyframe = true;
    marker.visibility = 0.0;
    marker.meta.outside = Some(true);
    marker.meta.ls_enabled = None;
    Some(marker)
}
