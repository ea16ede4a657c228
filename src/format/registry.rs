//! Format registry for discovering and accessing video annotation formats.

use std::collections::HashMap;
use std::path::Path;

use crate::format::dataset::VideoDataset;
use crate::format::error::FormatError;
use crate::format::formats::{CvatVideoFormat, LabelStudioVideoFormat, MotFormat};
use crate::format::probe::find_video_sibling;
use crate::format::traits::{ExportOptions, ExportResult, ImportOptions, VideoFormat};

/// Registry of available video annotation formats.
///
/// All built-in formats are registered automatically on creation.
pub struct FormatRegistry {
    formats: HashMap<&'static str, Box<dyn VideoFormat>>,
}

impl FormatRegistry {
    /// Create a new registry with all built-in formats registered.
    pub fn new() -> Self {
        let mut registry = Self {
            formats: HashMap::new(),
        };

        registry.register(Box::new(MotFormat));
        registry.register(Box::new(CvatVideoFormat));
        registry.register(Box::new(LabelStudioVideoFormat));

        registry
    }

    /// Register a format implementation.
    pub fn register(&mut self, format: Box<dyn VideoFormat>) {
        self.formats.insert(format.id(), format);
    }

    /// Get a format by its ID.
    pub fn get(&self, id: &str) -> Option<&dyn VideoFormat> {
        self.formats.get(id).map(|f| f.as_ref())
    }

    /// Find formats by file extension.
    pub fn by_extension(&self, ext: &str) -> Vec<&dyn VideoFormat> {
        let ext = ext.trim_start_matches('.');
        let mut found: Vec<&dyn VideoFormat> = self
            .formats
            .values()
            .filter(|f| f.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .map(|f| f.as_ref())
            .collect();
        found.sort_by_key(|f| f.id());
        found
    }

    /// Get all registered formats.
    pub fn all(&self) -> Vec<&dyn VideoFormat> {
        self.formats.values().map(|f| f.as_ref()).collect()
    }

    /// Get all format IDs, sorted.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.formats.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn require(&self, id: &str) -> Result<&dyn VideoFormat, FormatError> {
        self.get(id).ok_or_else(|| {
            FormatError::invalid_format(format!(
                "Unknown format '{}' (available: {})",
                id,
                self.ids().join(", ")
            ))
        })
    }

    /// Import `input` as `from` and export it to `output` as `to`.
    ///
    /// When no video file is given for probing, a video next to `input`
    /// is used if one exists.
    pub fn convert(
        &self,
        from: &str,
        input: &Path,
        to: &str,
        output: &Path,
        import_options: &ImportOptions,
        export_options: &ExportOptions,
    ) -> Result<(VideoDataset, ExportResult), FormatError> {
        let source = self.require(from)?;
        let target = self.require(to)?;

        let mut import_options = import_options.clone();
        if import_options.video_file.is_none() {
            import_options.video_file = find_video_sibling(input, None);
        }
        let data = source.import(input, &import_options)?;

        let mut export_options = export_options.clone();
        if export_options.video_file.is_none() {
            export_options.video_file = import_options.video_file.clone();
        }
        let result = target.export(&data, output, &export_options)?;

        log::info!(
            "Converted {} {} records into {} ({} written)",
            data.total_annotations(),
            source.display_name(),
            target.display_name(),
            result.annotations_exported
        );
        Ok((data, result))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
