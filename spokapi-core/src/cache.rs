use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Duration;
use chrono::Local;
use indexmap::IndexMap;

use crate::models::Program;
use crate::models::WatchStatus;

struct CacheEntry {
    programs: Arc<Vec<Program>>,
    fetched_at: DateTime<Local>,
}

/// Programs of each source, in the order sources were first cached.
///
/// Each source's entry is swapped as a whole, so readers never observe a
/// half-written entry.
#[derive(Default)]
pub struct ProgramCache {
    entries: RwLock<IndexMap<String, CacheEntry>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn replace(&self, source_id: &str, programs: Vec<Program>, fetched_at: DateTime<Local>) {
        let entry = CacheEntry {
            programs: Arc::new(programs),
            fetched_at,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id.to_string(), entry);
    }

    /// Drops the entries of sources not contained in `source_ids`.
    pub fn retain_sources(&self, source_ids: &[String]) -> Vec<String> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<String> = entries
            .keys()
            .filter(|id| !source_ids.contains(id))
            .cloned()
            .collect();
        entries.retain(|id, _| source_ids.contains(id));
        removed
    }

    /// Drops the entries fetched before `now - max_age`.
    pub fn expire(&self, max_age: Duration, now: DateTime<Local>) -> Vec<String> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now - entry.fetched_at > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        entries.retain(|_, entry| now - entry.fetched_at <= max_age);
        removed
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<Vec<Program>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id)
            .map(|entry| entry.programs.clone())
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn snapshot(&self) -> Vec<Program> {
        // Clone the Arcs so that the lock isn't held while copying programs.
        let lists: Vec<Arc<Vec<Program>>> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.values().map(|entry| entry.programs.clone()).collect()
        };
        lists
            .iter()
            .flat_map(|programs| programs.iter().cloned())
            .collect()
    }

    pub fn snapshot_with(&self, status: &WatchStatus) -> Vec<Program> {
        let mut programs = self.snapshot();
        programs.iter_mut().for_each(|program| status.apply(program));
        programs
    }
}
