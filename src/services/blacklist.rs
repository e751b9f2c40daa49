use camino::Utf8Path;
use once_cell::sync::Lazy;

static BLACKLIST_SOURCE: &str = include_str!("../../res/blacklist.txt");

static GLOBAL: Lazy<FileBlacklist> = Lazy::new(|| {
    let blacklist = FileBlacklist::parse(BLACKLIST_SOURCE);
    tracing::debug!("Loaded file blacklist with {} entries", blacklist.len());
    blacklist
});

/// Ordered list of file names that are never migrated between managers.
///
/// The process-wide list is parsed once on first access and shared read-only
/// afterwards. Membership checks ignore case.
#[derive(Debug, Clone)]
pub struct FileBlacklist {
    entries: Vec<String>,
    folded: Vec<String>,
}

impl FileBlacklist {
    /// The process-wide blacklist.
    pub fn global() -> &'static FileBlacklist {
        &GLOBAL
    }

    /// Parse a blacklist from text: one file name per line, `#` starts a comment.
    pub fn parse(source: &str) -> Self {
        let entries: Vec<String> = source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        let folded = entries.iter().map(|e| e.to_lowercase()).collect();
        Self { entries, folded }
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive check of a bare file name.
    pub fn contains(&self, file_name: &str) -> bool {
        let folded = file_name.to_lowercase();
        self.folded.iter().any(|entry| *entry == folded)
    }

    /// Check the final component of a (relative) path.
    pub fn is_blacklisted(&self, path: &Utf8Path) -> bool {
        path.file_name().is_some_and(|name| self.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_blacklist_contains_bookkeeping_files() {
        let blacklist = FileBlacklist::global();
        assert!(blacklist.contains(".gitignore"));
        assert!(blacklist.contains("meta.ini"));
        assert!(blacklist.contains("vortex.deployment.msgpack"));
    }

    #[test]
    fn test_global_blacklist_is_shared() {
        assert!(std::ptr::eq(FileBlacklist::global(), FileBlacklist::global()));
    }

    #[test]
    fn test_contains_ignores_case() {
        let blacklist = FileBlacklist::parse("Thumbs.db\n");
        assert!(blacklist.contains("thumbs.db"));
        assert!(blacklist.contains("THUMBS.DB"));
        assert!(!blacklist.contains("thumbs.db.bak"));
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let blacklist = FileBlacklist::parse("# header\n\n  a.txt  \nb.txt\n");
        assert_eq!(blacklist.entries(), &["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn test_is_blacklisted_checks_file_name_only() {
        let blacklist = FileBlacklist::parse("meta.ini\n");
        assert!(blacklist.is_blacklisted(Utf8Path::new("textures/META.ini")));
        assert!(!blacklist.is_blacklisted(Utf8Path::new("meta.ini/readme.txt")));
    }
}
