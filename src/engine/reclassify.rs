//! Batch reclassification of validation rules
//!
//! Utilities for backing-store rows that lack a validation rule or carry one
//! that no longer matches their stored value. Every known type's rule is
//! probed against the raw value with the engine's own validator, optionally
//! pre-filtered by per-type recognition heuristics, and matching rows are
//! persisted in bulk per rule.

use super::SettingsEngine;
use crate::error::Result;
use crate::model::Setting;
use log::{error, info};
use std::collections::HashMap;

/// One probe candidate: a type's name and the concrete rule it enforces.
struct Candidate<'a> {
    rule: String,
    recognize: &'a [String],
}

impl SettingsEngine {
    /// Re-probe rules for backing-store rows and persist the matches.
    ///
    /// Rows with an empty value are never touched. Rows that already carry a
    /// rule are skipped unless `rebase` forces re-probing, or `fix` is set
    /// and the current rule fails against the row's own value. When several
    /// candidate types match a value the last one declared wins, so
    /// configured types override the built-ins.
    ///
    /// Returns the number of rows whose rule was updated. Per-rule bulk
    /// writes that fail are logged and the remaining batches still run.
    pub fn recalculate_validation_rules(
        &self,
        rebase: bool,
        fix: bool,
        key: Option<&str>,
    ) -> Result<usize> {
        let rows: Vec<Setting> = match key {
            Some(key) => self.store.find(key)?.into_iter().collect(),
            None => self.store.all()?,
        };

        let candidates = self.candidates();
        let mut batches: HashMap<String, Vec<u64>> = HashMap::new();

        for row in &rows {
            if row.value.is_empty() {
                continue;
            }
            if !row.validation_rules.is_empty() {
                if !rebase && !fix {
                    continue;
                }
                if fix
                    && !rebase
                    && self
                        .validate_value(&row.key, &row.value, &row.validation_rules)
                        .is_ok()
                {
                    continue;
                }
            }

            if let Some(rule) = self.probe(&row.value, &candidates) {
                if rule != row.validation_rules {
                    batches.entry(rule).or_default().push(row.id);
                }
            }
        }

        let mut total = 0usize;
        for (rule, ids) in batches {
            match self.store.set_validation_rules(&ids, &rule) {
                Ok(n) => {
                    info!("assigned rule '{rule}' to {n} settings");
                    total += n;
                }
                Err(e) => error!("bulk rule assignment for '{rule}' failed: {e}"),
            }
        }
        Ok(total)
    }

    /// Re-probe every row, replacing existing rules too
    pub fn rebase_validation_rules(&self) -> Result<usize> {
        self.recalculate_validation_rules(true, false, None)
    }

    /// Re-probe only rows whose current rule fails their own value
    pub fn fix_validation_rules(&self) -> Result<usize> {
        self.recalculate_validation_rules(false, true, None)
    }

    /// Probe a single ruleless row by key
    pub fn set_validation_rules(&self, key: &str) -> Result<usize> {
        self.recalculate_validation_rules(false, false, Some(key))
    }

    /// Built-in types first, configured types after so they win the
    /// last-match tiebreak.
    fn candidates(&self) -> Vec<Candidate<'_>> {
        static NO_RECOGNIZE: [String; 0] = [];
        let mut candidates: Vec<Candidate<'_>> = ["string", "boolean", "numeric", "integer"]
            .into_iter()
            .map(|name| Candidate {
                rule: name.to_string(),
                recognize: &NO_RECOGNIZE,
            })
            .collect();
        for def in &self.config.types {
            candidates.push(Candidate {
                rule: def
                    .validate
                    .clone()
                    .unwrap_or_else(|| def.name.clone()),
                recognize: &def.recognize,
            });
        }
        candidates
    }

    fn probe(&self, value: &str, candidates: &[Candidate<'_>]) -> Option<String> {
        let mut best = None;
        for candidate in candidates {
            if !recognized(value, candidate.recognize) {
                continue;
            }
            if self.validate_value("", value, &candidate.rule).is_ok() {
                best = Some(candidate.rule.clone());
            }
        }
        best
    }
}

/// Apply `contains:`/`noContains:` heuristics; all must hold.
fn recognized(value: &str, heuristics: &[String]) -> bool {
    heuristics.iter().all(|h| match h.split_once(':') {
        Some(("contains", needle)) => value.contains(needle),
        Some(("noContains", needle)) => !value.contains(needle),
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognize_heuristics() {
        assert!(recognized("a;b", &["contains:;".into()]));
        assert!(!recognized("a,b", &["contains:;".into()]));
        assert!(recognized("a,b", &["noContains:;".into()]));
        assert!(recognized(
            "a;b",
            &["contains:;".into(), "noContains:,".into()]
        ));
        assert!(!recognized(
            "a;b,c",
            &["contains:;".into(), "noContains:,".into()]
        ));
    }
}
