//! Unit tests for video annotation format implementations.
//!
//! These tests verify the correctness of format serialization, deserialization,
//! and conversions between formats through the shared record type.

mod cvat_video_tests;
mod mot_tests;
