use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Maps the lower-cased text of an option to its canonical display text.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OptionEntry {
    pub lower: String,
    pub original: String,
}

/// Where the normalizer reads its entries and the option catalog from.
pub trait OptionSource {
    /// The entries stored so far.
    fn stored_entries(&self) -> Vec<OptionEntry>;
    /// The display texts of all the options of the reference catalog.
    fn catalog_values(&self) -> Vec<String>;
}

/// A fixed snapshot of stored entries and catalog options.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct StaticOptions {
    pub entries: Vec<OptionEntry>,
    pub catalog: Vec<String>,
}

impl OptionSource for StaticOptions {
    fn stored_entries(&self) -> Vec<OptionEntry> {
        self.entries.clone()
    }

    fn catalog_values(&self) -> Vec<String> {
        self.catalog.clone()
    }
}

/// Canonicalizes option texts, case-insensitively.
///
/// The entries are loaded and reconciled against the catalog on first use.
/// Entries created or updated since then are kept as pending changes until
/// the storage collects them with `take_changes`.
pub struct OptionDict {
    source: Box<dyn OptionSource>,
    data: BTreeMap<String, OptionEntry>,
    is_loaded: bool,
    changed: BTreeSet<String>,
}

impl OptionDict {
    pub fn new(source: Box<dyn OptionSource>) -> OptionDict {
        OptionDict {
            source,
            data: BTreeMap::new(),
            is_loaded: false,
            changed: BTreeSet::new(),
        }
    }

    /// A normalizer without any entry: every text is returned unchanged.
    pub fn empty() -> OptionDict {
        OptionDict::new(Box::new(StaticOptions::default()))
    }

    /// Drops the cached entries. The next call reloads them.
    pub fn clear(&mut self) {
        self.data.clear();
        self.changed.clear();
        self.is_loaded = false;
    }

    fn load(&mut self) {
        for entry in self.source.stored_entries() {
            self.data.insert(entry.lower.clone(), entry);
        }
        self.is_loaded = true;

        for value in self.source.catalog_values() {
            let lower = value.to_lowercase();
            match self.data.get_mut(&lower) {
                None => {
                    debug!("OptionDict::load: new entry {:?} -> {:?}", lower, value);
                    self.data.insert(
                        lower.clone(),
                        OptionEntry {
                            lower: lower.clone(),
                            original: value,
                        },
                    );
                    self.changed.insert(lower);
                }
                Some(entry) if entry.original != value => {
                    debug!(
                        "OptionDict::load: refreshing {:?}: {:?} -> {:?}",
                        lower, entry.original, value
                    );
                    entry.original = value;
                    self.changed.insert(lower);
                }
                Some(_) => {}
            }
        }
        info!(
            "OptionDict::load: {} entries, {} created or refreshed",
            self.data.len(),
            self.changed.len()
        );
    }

    fn ensure_loaded(&mut self) {
        if !self.is_loaded {
            self.load();
        }
    }

    /// Returns the canonical text for `name`, or `name` itself when the
    /// option is unknown. Unknown texts are not registered.
    pub fn normalize(&mut self, name: &str) -> String {
        self.ensure_loaded();
        match self.data.get(&name.to_lowercase()) {
            Some(entry) => entry.original.clone(),
            None => name.to_string(),
        }
    }

    /// Teaches a new option to the catalog. Known options are left untouched.
    pub fn register(&mut self, lower: &str, original: &str) {
        self.ensure_loaded();
        if !self.data.contains_key(lower) {
            self.data.insert(
                lower.to_string(),
                OptionEntry {
                    lower: lower.to_string(),
                    original: original.to_string(),
                },
            );
            self.changed.insert(lower.to_string());
        }
    }

    /// The entries created or refreshed since the last call.
    pub fn take_changes(&mut self) -> Vec<OptionEntry> {
        let changed = std::mem::take(&mut self.changed);
        changed
            .iter()
            .filter_map(|lower| self.data.get(lower).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lower: &str, original: &str) -> OptionEntry {
        OptionEntry {
            lower: lower.to_string(),
            original: original.to_string(),
        }
    }

    fn dict(entries: Vec<OptionEntry>, catalog: &[&str]) -> OptionDict {
        OptionDict::new(Box::new(StaticOptions {
            entries,
            catalog: catalog.iter().map(|s| s.to_string()).collect(),
        }))
    }

    #[test]
    fn normalize_is_case_insensitive() {
        let mut d = dict(vec![], &["Mechanism of Action"]);
        assert_eq!(d.normalize("mechanism OF action"), "Mechanism of Action");
        assert_eq!(d.normalize("Mechanism of Action"), "Mechanism of Action");
    }

    #[test]
    fn unknown_values_pass_through() {
        let mut d = dict(vec![], &["Age"]);
        assert_eq!(d.normalize("Something Else"), "Something Else");
        // Not registered by a lookup.
        let changes = d.take_changes();
        assert_eq!(changes, vec![entry("age", "Age")]);
    }

    #[test]
    fn reconcile_refreshes_casing() {
        let mut d = dict(
            vec![entry("age", "AGE"), entry("efficacy", "Efficacy")],
            &["Age", "Efficacy"],
        );
        assert_eq!(d.normalize("age"), "Age");
        assert_eq!(d.take_changes(), vec![entry("age", "Age")]);
        assert!(d.take_changes().is_empty());
    }

    #[test]
    fn register_only_adds_unknown() {
        let mut d = dict(vec![entry("age", "Age")], &[]);
        d.register("age", "AGE");
        d.register("price", "Price");
        assert_eq!(d.normalize("AGE"), "Age");
        assert_eq!(d.normalize("PRICE"), "Price");
        assert_eq!(d.take_changes(), vec![entry("price", "Price")]);
    }

    #[test]
    fn clear_reloads() {
        let mut d = dict(vec![], &["Age"]);
        d.register("price", "Price");
        assert_eq!(d.normalize("price"), "Price");
        d.clear();
        assert_eq!(d.normalize("price"), "price");
        assert_eq!(d.normalize("age"), "Age");
    }
}
