//! Caller-owned category table mapping integer class ids to names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::format::video::DEFAULT_CATEGORY;

/// Mapping between small integer class ids and category names.
///
/// The table is owned by the caller and handed to each export call. Names
/// seen for the first time during an export are assigned `max(id) + 1`, so
/// ids are 1-indexed when the table starts empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTable {
    entries: BTreeMap<u32, String>,

    /// Name returned for ids that are not in the table.
    #[serde(default = "default_category")]
    pub default_category: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            default_category: default_category(),
        }
    }

    /// Create a table from `(id, name)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (id, name) in pairs {
            table.insert(id, name);
        }
        table
    }

    /// Insert or replace a mapping.
    pub fn insert(&mut self, id: u32, name: impl Into<String>) {
        self.entries.insert(id, name.into());
    }

    /// Category name for a class id, or the default category.
    pub fn name(&self, id: u32) -> &str {
        self.entries
            .get(&id)
            .map(String::as_str)
            .unwrap_or(&self.default_category)
    }

    /// Look up the id of a name without assigning one.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    /// Id of a name, assigning the next unused id if it is new.
    pub fn class_id(&mut self, name: &str) -> u32 {
        if let Some(id) = self.find(name) {
            return id;
        }
        let id = self.entries.keys().next_back().map_or(1, |max| max + 1);
        log::debug!("Assigned class id {} to new category '{}'", id, name);
        self.entries.insert(id, name.to_string());
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.entries.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Parse `labels.txt`: line `n` names class id `n`.
    ///
    /// Blank lines are skipped but still consume their id.
    pub fn from_labels(content: &str) -> Self {
        let mut table = Self::new();
        for (idx, line) in content.lines().enumerate() {
            let name = line.trim();
            if !name.is_empty() {
                table.insert(idx as u32 + 1, name);
            }
        }
        table
    }

    /// Render `labels.txt`, one name per line in id order.
    ///
    /// Gaps in the id range are written as blank lines so ids survive a
    /// reload.
    pub fn to_labels(&self) -> String {
        let max = self.entries.keys().next_back().copied().unwrap_or(0);
        let mut out = String::new();
        for id in 1..=max {
            if let Some(name) = self.entries.get(&id) {
                out.push_str(name);
            }
            out.push('\n');
        }
        out
    }
}
