use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::netcdf::DecodedGrid;

/// Decoded files by remote file name. Published files never change, so a
/// decoded file stays valid for as long as it is inside the fetch window.
#[derive(Debug, Default)]
pub struct DecodedFileCache {
    files: HashMap<String, Arc<DecodedGrid>>,
}

impl DecodedFileCache {
    pub fn get(&self, name: &str) -> Option<Arc<DecodedGrid>> {
        self.files.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, grid: Arc<DecodedGrid>) {
        self.files.insert(name.into(), grid);
    }

    /// Drops every file not named in `keep`, returning how many went.
    pub fn retain_only(&mut self, keep: &HashSet<&str>) -> usize {
        let before = self.files.len();
        self.files.retain(|name, _| keep.contains(name.as_str()));
        before - self.files.len()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
