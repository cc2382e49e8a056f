use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::ServiceScanner;
use crate::error::{Result, ScanError};
use crate::rules::RecommendationInfo;

/// Scanner key -> plugins registered under it. Built once at startup and
/// read-only while scanning.
#[derive(Default, Clone)]
pub struct ScannerRegistry {
    scanners: BTreeMap<String, Vec<Arc<dyn ServiceScanner>>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `scanner` to the list under `key`.
    pub fn register(&mut self, key: &str, scanner: Arc<dyn ServiceScanner>) {
        self.scanners
            .entry(key.to_lowercase())
            .or_default()
            .push(scanner);
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.scanners.keys().cloned().collect()
    }

    pub fn lookup(&self, key: &str) -> &[Arc<dyn ServiceScanner>] {
        self.scanners
            .get(&key.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolve user-selected keys. An empty selection means every key.
    pub fn resolve(&self, selected: &[String]) -> Result<Vec<(String, Arc<dyn ServiceScanner>)>> {
        let keys: Vec<String> = if selected.is_empty() {
            self.keys()
        } else {
            let mut keys = Vec::new();
            for key in selected.iter().map(|k| k.trim().to_lowercase()) {
                if key.is_empty() || keys.contains(&key) {
                    continue;
                }
                if !self.scanners.contains_key(&key) {
                    return Err(ScanError::UnknownScanner {
                        suggestion: self.suggest(&key),
                        key,
                    });
                }
                keys.push(key);
            }
            keys
        };

        Ok(keys
            .into_iter()
            .flat_map(|key| {
                self.lookup(&key)
                    .iter()
                    .map(move |s| (key.clone(), Arc::clone(s)))
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    fn suggest(&self, key: &str) -> Option<String> {
        self.scanners
            .keys()
            .map(|k| (levenshtein::levenshtein(key, k), k))
            .filter(|(distance, _)| *distance <= 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, k)| k.clone())
    }

    /// Every declared recommendation, sorted by id.
    pub fn recommendations(&self) -> BTreeMap<String, RecommendationInfo> {
        self.scanners
            .values()
            .flatten()
            .flat_map(|s| s.recommendations())
            .collect()
    }

    /// Check that recommendation ids are unique across the registry and carry
    /// one of their plugin's declared prefixes.
    ///
    /// The check is against `prefixes()`, not the registry key: plugins that
    /// share a key own their own prefixes (`asp` holds `app`, `func` and
    /// `logics`; `sql` also owns `sqldb`).
    pub fn validate(&self) -> Result<()> {
        let mut owners: HashMap<String, &'static str> = HashMap::new();
        for scanner in self.scanners.values().flatten() {
            for id in scanner.recommendations().into_keys() {
                let prefixed = scanner
                    .prefixes()
                    .iter()
                    .any(|p| id.starts_with(&format!("{p}-")));
                if !prefixed {
                    return Err(ScanError::Internal(format!(
                        "recommendation '{id}' of {} does not use prefixes {:?}",
                        scanner.name(),
                        scanner.prefixes()
                    )));
                }
                if let Some(other) = owners.insert(id.clone(), scanner.name()) {
                    return Err(ScanError::Internal(format!(
                        "recommendation '{id}' declared by both {other} and {}",
                        scanner.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.scanners
                    .iter()
                    .map(|(k, v)| (k, v.iter().map(|s| s.name()).collect::<Vec<_>>())),
            )
            .finish()
    }
}
