//! Video annotation format implementations.

pub mod cvat_video;
pub mod label_studio_video;
pub mod mot;

#[cfg(test)]
mod tests;

pub use cvat_video::CvatVideoFormat;
pub use label_studio_video::LabelStudioVideoFormat;
pub use mot::MotFormat;
