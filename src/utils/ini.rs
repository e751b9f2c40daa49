use crate::services::filesystem::write_if_changed;
use camino::Utf8Path;
use indexmap::IndexMap;
use std::fmt;
use std::fs;
use std::io;

/// Order-preserving INI document as written by Qt-based mod managers.
///
/// Keys before the first section header land in the unnamed section `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ini {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl Ini {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(source: &str) -> Self {
        let mut ini = Ini::new();
        let mut current = String::new();

        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = name.trim().to_string();
                ini.sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                ini.set(&current, key.trim(), value.trim());
            }
        }
        ini
    }

    pub fn load(path: &Utf8Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Load `path`, or an empty document if it does not exist yet.
    pub fn load_or_default(path: &Utf8Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(source) => Ok(Self::parse(&source)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    /// Write the document, leaving the file untouched if nothing changed.
    pub fn save(&self, path: &Utf8Path) -> io::Result<bool> {
        write_if_changed(path, &self.to_string())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.sections.get(name)
    }

    pub fn remove_section(&mut self, name: &str) -> Option<IndexMap<String, String>> {
        self.sections.shift_remove(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }
}

impl fmt::Display for Ini {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, entries) in &self.sections {
            if name.is_empty() && entries.is_empty() {
                continue;
            }
            if !first {
                writeln!(f)?;
            }
            first = false;
            if !name.is_empty() {
                writeln!(f, "[{}]", name)?;
            }
            for (key, value) in entries {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_keys() {
        let ini = Ini::parse(
            "; comment\n[General]\ngameName=Skyrim Special Edition\nmodid = 266\n\n\
             [installedFiles]\n1\\modid=266\n1\\fileid=1000\nsize=1\n",
        );
        assert_eq!(ini.get("General", "gameName"), Some("Skyrim Special Edition"));
        assert_eq!(ini.get("General", "modid"), Some("266"));
        assert_eq!(ini.get("installedFiles", "1\\fileid"), Some("1000"));
        assert_eq!(ini.get("General", "missing"), None);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let ini = Ini::parse("[Settings]\narguments=-a=1 -b=2\n");
        assert_eq!(ini.get("Settings", "arguments"), Some("-a=1 -b=2"));
    }

    #[test]
    fn test_display_preserves_order() {
        let mut ini = Ini::new();
        ini.set("General", "b", "2");
        ini.set("General", "a", "1");
        ini.set("Settings", "x", "y");
        assert_eq!(ini.to_string(), "[General]\nb=2\na=1\n\n[Settings]\nx=y\n");
        assert_eq!(Ini::parse(&ini.to_string()), ini);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("missing.ini");
        assert_eq!(Ini::load_or_default(&path).unwrap(), Ini::new());
    }
}
