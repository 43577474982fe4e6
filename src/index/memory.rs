use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::index::{NameMatch, SymbolIndex, SymbolOccurrence, SymbolRole};

/// Index held entirely in memory. When loaded from a snapshot file, polling
/// for unit changes re-reads that file.
#[derive(Default)]
pub struct MemoryIndex {
    occurrences: RwLock<Vec<SymbolOccurrence>>,
    snapshot: Option<PathBuf>,
}

impl MemoryIndex {
    pub fn new(occurrences: Vec<SymbolOccurrence>) -> Self {
        Self {
            occurrences: RwLock::new(occurrences),
            snapshot: None,
        }
    }

    /// Loads a JSON array of occurrences.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let occurrences = read_snapshot(path)?;
        info!(
            "Loaded {} index occurrences from {:?}",
            occurrences.len(),
            path
        );
        Ok(Self {
            occurrences: RwLock::new(occurrences),
            snapshot: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<SymbolOccurrence>> {
        self.occurrences.read().unwrap_or_else(|e| e.into_inner())
    }

    fn filtered(&self, keep: impl Fn(&SymbolOccurrence) -> bool) -> Vec<SymbolOccurrence> {
        self.read().iter().filter(|o| keep(*o)).cloned().collect()
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<SymbolOccurrence>, IndexError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Canonical occurrences prefer the definition, then the declaration, then
/// whatever was recorded first.
fn canonical_rank(occurrence: &SymbolOccurrence) -> u8 {
    if occurrence.roles.contains(SymbolRole::DEFINITION) {
        0
    } else if occurrence.roles.contains(SymbolRole::DECLARATION) {
        1
    } else {
        2
    }
}

impl SymbolIndex for MemoryIndex {
    fn canonical_occurrences_matching(
        &self,
        pattern: &str,
        matching: NameMatch,
    ) -> Vec<SymbolOccurrence> {
        let occurrences = self.read();
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for occurrence in occurrences.iter() {
            let usr = occurrence.symbol.usr.as_str();
            if seen.contains(usr) || !matching.matches(&occurrence.symbol.name, pattern) {
                continue;
            }
            seen.insert(usr);
            let canonical = occurrences
                .iter()
                .filter(|o| o.symbol.usr == usr)
                .min_by_key(|o| canonical_rank(*o))
                .unwrap_or(occurrence);
            results.push(canonical.clone());
        }

        debug!("{} symbols match {:?}", results.len(), pattern);
        results
    }

    fn occurrences_of_usr(&self, usr: &str, roles: SymbolRole) -> Vec<SymbolOccurrence> {
        self.filtered(|o| o.symbol.usr == usr && o.roles.intersects(roles))
    }

    fn occurrences_related_to_usr(&self, usr: &str, roles: SymbolRole) -> Vec<SymbolOccurrence> {
        self.filtered(|o| {
            o.relations
                .iter()
                .any(|r| r.symbol.usr == usr && r.roles.intersects(roles))
        })
    }

    fn poll_for_unit_changes_and_wait(&self) {
        let Some(path) = &self.snapshot else {
            return;
        };
        match read_snapshot(path) {
            Ok(occurrences) => {
                debug!("Reloaded {} index occurrences", occurrences.len());
                *self.occurrences.write().unwrap_or_else(|e| e.into_inner()) = occurrences;
            }
            Err(e) => warn!("Failed to reload index snapshot {:?}: {}", path, e),
        }
    }
}
