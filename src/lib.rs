//! trackconv - video tracking annotation converter
//!
//! Converts object-tracking annotations between MOT (`gt.txt`), CVAT for
//! video XML and Label Studio video JSON through one intermediate record
//! type, reconciling the three formats' notions of how a box persists
//! across frames.

pub mod config;
pub mod format;
