use crate::error::{ManagerError, MigrationError};
use indexmap::IndexMap;
use std::fmt::Write as _;

/// Failures collected during one migration run.
///
/// Built empty at the start of a run and only appended to while it runs; callers
/// receive it read-only.
#[derive(Debug, Default)]
pub struct MigrationReport {
    failed_mods: IndexMap<String, ManagerError>,
    failed_tools: IndexMap<String, ManagerError>,
    other_errors: IndexMap<String, MigrationError>,
    migrated_mods: usize,
    migrated_tools: usize,
    merged_into_existing: bool,
    cancelled: bool,
}

impl MigrationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed_mods(&self) -> &IndexMap<String, ManagerError> {
        &self.failed_mods
    }

    pub fn failed_tools(&self) -> &IndexMap<String, ManagerError> {
        &self.failed_tools
    }

    pub fn other_errors(&self) -> &IndexMap<String, MigrationError> {
        &self.other_errors
    }

    pub fn migrated_mods(&self) -> usize {
        self.migrated_mods
    }

    pub fn migrated_tools(&self) -> usize {
        self.migrated_tools
    }

    /// The destination already existed and mods were merged into it.
    pub fn merged_into_existing(&self) -> bool {
        self.merged_into_existing
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn has_errors(&self) -> bool {
        !self.failed_mods.is_empty() || !self.failed_tools.is_empty() || !self.other_errors.is_empty()
    }

    /// Display names are not unique; a repeated name is recorded as `Name (2)`, `Name (3)`...
    pub(crate) fn record_mod_failure(&mut self, name: &str, error: ManagerError) {
        insert_unique(&mut self.failed_mods, name, error);
    }

    pub(crate) fn record_tool_failure(&mut self, name: &str, error: ManagerError) {
        insert_unique(&mut self.failed_tools, name, error);
    }

    pub(crate) fn record_other(&mut self, key: &str, error: MigrationError) {
        self.other_errors.insert(key.to_string(), error);
    }

    pub(crate) fn record_mod_migrated(&mut self) {
        self.migrated_mods += 1;
    }

    pub(crate) fn record_tool_migrated(&mut self) {
        self.migrated_tools += 1;
    }

    pub(crate) fn mark_merged_into_existing(&mut self) {
        self.merged_into_existing = true;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Per-item error detail grouped by category, one line per item.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} mod(s) and {} tool(s) migrated",
            self.migrated_mods, self.migrated_tools
        );
        if self.cancelled {
            out.push_str(" (cancelled)");
        }
        out.push('\n');

        let groups: [(&str, Vec<(&String, String)>); 3] = [
            (
                "Failed mods",
                self.failed_mods.iter().map(|(k, e)| (k, format!("[{}] {}", e.kind().code(), e))).collect(),
            ),
            (
                "Failed tools",
                self.failed_tools.iter().map(|(k, e)| (k, format!("[{}] {}", e.kind().code(), e))).collect(),
            ),
            (
                "Other errors",
                self.other_errors.iter().map(|(k, e)| (k, format!("[{}] {}", e.kind().code(), e))).collect(),
            ),
        ];

        for (title, entries) in groups {
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}:", title);
            for (name, message) in entries {
                let _ = writeln!(out, "  {}: {}", name, message);
            }
        }
        out
    }
}

fn insert_unique<E>(map: &mut IndexMap<String, E>, name: &str, error: E) {
    let mut key = name.to_string();
    let mut n = 2;
    while map.contains_key(&key) {
        key = format!("{} ({})", name, n);
        n += 1;
    }
    map.insert(key, error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_has_no_errors() {
        let report = MigrationReport::new();
        assert!(!report.has_errors());
        assert!(report.summary().starts_with("0 mod(s)"));
    }

    #[test]
    fn test_any_category_sets_has_errors() {
        let mut report = MigrationReport::new();
        report.record_tool_failure("xEdit", ManagerError::Other("boom".to_string()));
        assert!(report.has_errors());

        let mut report = MigrationReport::new();
        report.record_other("plugins.txt", MigrationError::Cancelled);
        assert!(report.has_errors());
    }

    #[test]
    fn test_summary_groups_by_category() {
        let mut report = MigrationReport::new();
        report.record_mod_migrated();
        report.record_mod_failure("Broken Mod", ManagerError::Other("bad".to_string()));

        let summary = report.summary();
        assert!(summary.contains("Failed mods:\n  Broken Mod: [manager.general] bad"));
        assert!(!summary.contains("Failed tools"));
    }

    #[test]
    fn test_same_name_failures_are_all_kept() {
        let mut report = MigrationReport::new();
        report.record_mod_failure("SkyUI", ManagerError::Other("first".to_string()));
        report.record_mod_failure("SkyUI", ManagerError::Other("second".to_string()));
        report.record_mod_failure("SkyUI", ManagerError::Other("third".to_string()));

        let keys: Vec<&str> = report.failed_mods().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["SkyUI", "SkyUI (2)", "SkyUI (3)"]);
        assert_eq!(report.failed_mods()["SkyUI (2)"].to_string(), "second");
    }
}
