use crate::error::ErrorKind;
use crate::services::blacklist::FileBlacklist;
use crate::services::filesystem;
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::fs;
use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Supported archive containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Rar,
    SevenZip,
    Zip,
}

/// Extension (lowercase, without dot) to format.
const FORMAT_REGISTRY: &[(&str, ArchiveFormat)] = &[
    ("rar", ArchiveFormat::Rar),
    ("7z", ArchiveFormat::SevenZip),
    ("zip", ArchiveFormat::Zip),
];

impl ArchiveFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_lowercase();
        FORMAT_REGISTRY
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, format)| *format)
    }

    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        path.extension().and_then(Self::from_extension)
    }
}

/// Errors from listing or extracting archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive format '{extension}' is not supported")]
    UnsupportedFormat { extension: String },

    #[error("archive {path} does not exist")]
    NotFound { path: Utf8PathBuf },

    #[error("archiver executable '{executable}' could not be started: {source}")]
    ArchiverNotFound {
        executable: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archiver exited with code {code:?} for {path}: {stderr}")]
    ProcessFailed {
        path: Utf8PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to read zip archive {path}: {source}")]
    Zip {
        path: Utf8PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    /// Missing external tooling, as opposed to a problem with one archive.
    pub fn is_environment(&self) -> bool {
        matches!(self, ArchiveError::ArchiverNotFound { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::UnsupportedFormat { .. } => ErrorKind::UnsupportedArchiveFormat,
            ArchiveError::ArchiverNotFound { .. } => ErrorKind::Environment,
            ArchiveError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Archive,
        }
    }
}

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive with `/` separators.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// The external archiving executable every extraction goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archiver {
    executable: Utf8PathBuf,
}

impl Archiver {
    pub fn new(executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// Open an archive, choosing the handler from its extension.
    pub fn load(&self, path: &Utf8Path) -> Result<Archive, ArchiveError> {
        load_archive(path, self)
    }

    fn run(&self, archive: &Utf8Path, args: &[String]) -> Result<String, ArchiveError> {
        tracing::debug!("Running {} {}", self.executable, args.join(" "));

        let output = Command::new(self.executable.as_std_path())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ArchiveError::ArchiverNotFound {
                executable: self.executable.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            tracing::warn!("{} reported for {}: {}", self.executable, archive, stderr);
        }

        if !output.status.success() {
            return Err(ArchiveError::ProcessFailed {
                path: archive.to_path_buf(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for Archiver {
    fn default() -> Self {
        Self::new("7z")
    }
}

/// Open `path` as an archive.
///
/// # Errors
/// [`ArchiveError::UnsupportedFormat`] for extensions missing from the registry.
pub fn load_archive(path: &Utf8Path, archiver: &Archiver) -> Result<Archive, ArchiveError> {
    let format = ArchiveFormat::from_path(path).ok_or_else(|| ArchiveError::UnsupportedFormat {
        extension: path.extension().unwrap_or_default().to_string(),
    })?;

    if !path.is_file() {
        return Err(ArchiveError::NotFound {
            path: path.to_path_buf(),
        });
    }

    Ok(Archive {
        path: path.to_path_buf(),
        format,
        archiver: archiver.clone(),
        entries: OnceCell::new(),
    })
}

/// A compressed mod package.
#[derive(Debug)]
pub struct Archive {
    path: Utf8PathBuf,
    format: ArchiveFormat,
    archiver: Archiver,
    entries: OnceCell<Vec<ArchiveEntry>>,
}

impl Archive {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Files in the archive (directories excluded). Listed once per archive value.
    pub fn entries(&self) -> Result<&[ArchiveEntry], ArchiveError> {
        self.entries
            .get_or_try_init(|| match self.format {
                ArchiveFormat::Zip => list_zip(&self.path),
                ArchiveFormat::Rar | ArchiveFormat::SevenZip => {
                    let listing = self.archiver.run(
                        &self.path,
                        &["l".to_string(), "-slt".to_string(), self.path.to_string()],
                    )?;
                    Ok(parse_slt_listing(&listing))
                }
            })
            .map(Vec::as_slice)
    }

    pub fn files(&self) -> Result<Vec<String>, ArchiveError> {
        Ok(self.entries()?.iter().map(|e| e.name.clone()).collect())
    }

    /// Sum of uncompressed sizes.
    pub fn uncompressed_size(&self) -> Result<u64, ArchiveError> {
        Ok(self.entries()?.iter().map(|e| e.size).sum())
    }

    /// Extract everything into `dest`. Without `full_paths` every file lands directly in
    /// `dest`.
    pub fn extract_all(&self, dest: &Utf8Path, full_paths: bool) -> Result<(), ArchiveError> {
        let args = self.base_args(if full_paths { "x" } else { "e" }, dest);
        self.archiver.run(&self.path, &args)?;
        Ok(())
    }

    /// Extract a single file.
    pub fn extract(&self, name: &str, dest: &Utf8Path, full_paths: bool) -> Result<(), ArchiveError> {
        let mut args = self.base_args(if full_paths { "x" } else { "e" }, dest);
        args.push("--".to_string());
        args.push(name.to_string());
        self.archiver.run(&self.path, &args)?;
        Ok(())
    }

    /// Extract several files at once through a list file next to the archive.
    ///
    /// The list file is removed on every exit path.
    pub fn extract_many(
        &self,
        names: &[String],
        dest: &Utf8Path,
        full_paths: bool,
    ) -> Result<(), ArchiveError> {
        let sidecar = SidecarFile::write(self.path.with_extension("txt"), names)?;
        let mut args = self.base_args(if full_paths { "x" } else { "e" }, dest);
        args.push(format!("@{}", sidecar.path()));
        self.archiver.run(&self.path, &args)?;
        Ok(())
    }

    /// Case-insensitive glob over the file list.
    ///
    /// `*` and `?` stay within one folder, `**` crosses folders. Matches are returned with
    /// their original casing.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>, ArchiveError> {
        let regex = glob_to_regex(pattern)?;
        Ok(self
            .entries()?
            .iter()
            .filter(|e| regex.is_match(&e.name.to_lowercase()))
            .map(|e| e.name.clone())
            .collect())
    }

    /// Extract everything and delete blacklisted files from the result.
    ///
    /// # Returns
    /// Relative paths of the files left in `dest`
    pub fn extract_filtered(
        &self,
        dest: &Utf8Path,
        blacklist: &FileBlacklist,
    ) -> Result<Vec<Utf8PathBuf>, ArchiveError> {
        self.extract_all(dest, true)?;

        let scanned = filesystem::list_files(dest).map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: io::Error::other(e.to_string()),
        })?;

        let mut kept = Vec::with_capacity(scanned.len());
        for relative in scanned {
            if blacklist.is_blacklisted(&relative) {
                let full = dest.join(&relative);
                fs::remove_file(&full).map_err(|source| ArchiveError::Io { path: full, source })?;
                tracing::debug!("Removed blacklisted file {} from {}", relative, self.path);
            } else {
                kept.push(relative);
            }
        }
        Ok(kept)
    }

    fn base_args(&self, command: &str, dest: &Utf8Path) -> Vec<String> {
        vec![
            command.to_string(),
            self.path.to_string(),
            format!("-o{}", dest),
            "-aoa".to_string(),
            "-y".to_string(),
        ]
    }
}

/// Newline-delimited list of names handed to the archiver as `@file`.
struct SidecarFile {
    path: Utf8PathBuf,
}

impl SidecarFile {
    fn write(path: Utf8PathBuf, names: &[String]) -> Result<Self, ArchiveError> {
        fs::write(&path, names.join("\n")).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }

    fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for SidecarFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove list file {}: {}", self.path, e);
        }
    }
}

fn list_zip(path: &Utf8Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let zip_err = |source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        entries.push(ArchiveEntry {
            name: entry.name().replace('\\', "/"),
            size: entry.size(),
        });
    }
    Ok(entries)
}

/// Parse the technical listing printed by `7z l -slt`.
fn parse_slt_listing(listing: &str) -> Vec<ArchiveEntry> {
    // Entries follow the "----------" separator, one "Key = Value" block per entry.
    let listing = listing.replace("\r\n", "\n");
    let Some((_, body)) = listing.split_once("----------") else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for block in body.split("\n\n") {
        let mut name = None;
        let mut size = 0;
        let mut is_dir = false;
        for line in block.lines() {
            let Some((key, value)) = line.split_once(" = ") else {
                continue;
            };
            match key.trim() {
                "Path" => name = Some(value.trim().replace('\\', "/")),
                "Size" => size = value.trim().parse().unwrap_or(0),
                "Folder" => is_dir |= value.trim() == "+",
                "Attributes" => is_dir |= value.trim().starts_with('D'),
                _ => {}
            }
        }
        if let Some(name) = name
            && !is_dir
        {
            entries.push(ArchiveEntry { name, size });
        }
    }
    entries
}

fn glob_to_regex(pattern: &str) -> Result<Regex, ArchiveError> {
    let folded = pattern.to_lowercase().replace('\\', "/");
    let mut regex = String::from("^");
    let mut chars = folded.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                regex.push_str(".*");
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|source| ArchiveError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}
