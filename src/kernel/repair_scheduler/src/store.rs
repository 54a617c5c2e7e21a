use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::TrackedFile;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingMeta {
    pub repair_path: PathBuf,
}

pub trait TrackingStore: Send + Sync {
    /// Files that are both known and tracked for repair.
    fn tracked_files(&self) -> Vec<Arc<TrackedFile>>;
    fn get_file(&self, name: &str) -> Option<Arc<TrackedFile>>;
    fn repair_path(&self, name: &str) -> Option<PathBuf>;
}

#[derive(Default)]
pub struct MemoryTrackingStore {
    files: RwLock<HashMap<String, Arc<TrackedFile>>>,
    tracking: RwLock<HashMap<String, TrackingMeta>>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, file: Arc<TrackedFile>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(file.name().to_string(), file);
    }

    pub fn remove_file(&self, name: &str) -> Option<Arc<TrackedFile>> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(name)
    }

    pub fn track(&self, name: &str, repair_path: PathBuf) {
        let mut tracking = self.tracking.write().unwrap_or_else(|e| e.into_inner());
        tracking.insert(name.to_string(), TrackingMeta { repair_path });
    }

    pub fn untrack(&self, name: &str) -> Option<TrackingMeta> {
        let mut tracking = self.tracking.write().unwrap_or_else(|e| e.into_inner());
        tracking.remove(name)
    }
}

impl TrackingStore for MemoryTrackingStore {
    fn tracked_files(&self) -> Vec<Arc<TrackedFile>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let tracking = self.tracking.read().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<Arc<TrackedFile>> = files
            .iter()
            .filter(|(name, _)| tracking.contains_key(*name))
            .map(|(_, file)| file.clone())
            .collect();
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    fn get_file(&self, name: &str) -> Option<Arc<TrackedFile>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.get(name).cloned()
    }

    fn repair_path(&self, name: &str) -> Option<PathBuf> {
        let tracking = self.tracking.read().unwrap_or_else(|e| e.into_inner());
        tracking.get(name).map(|meta| meta.repair_path.clone())
    }
}
