use crate::error::ErrorKind;
use crate::services::blacklist::FileBlacklist;
use crate::services::progress::{CancellationToken, ProgressReporter};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use thiserror::Error;
use walkdir::WalkDir;

/// Characters stripped from mod folder names.
const MOD_NAME_ILLEGAL: &[char] = &[
    ';', '<', '>', '\\', '/', '{', '}', '[', ']', '+', '=', '|', '*', '?', '&', ',', ':', '\'',
    '"', '`',
];

/// Characters no supported filesystem accepts inside a path component.
const PATH_ILLEGAL: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Errors from the merge engine.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to transfer {src} to {dst}: {source}")]
    Transfer {
        src: Utf8PathBuf,
        dst: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("merge cancelled")]
    Cancelled,
}

impl MergeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MergeError::Cancelled)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MergeError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Io,
        }
    }
}

/// Options controlling how files land in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Try a hardlink first, falling back to a copy per file.
    pub use_hardlinks: bool,
    /// Overwrite files that already exist in the destination.
    pub replace: bool,
}

/// How a single file reached the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Linked,
    Copied,
}

/// Counters for one merge call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub linked: usize,
    pub copied: usize,
    pub skipped_existing: usize,
    pub blacklisted: usize,
    pub bytes: u64,
}

impl MergeStats {
    pub fn transferred(&self) -> usize {
        self.linked + self.copied
    }
}

/// Merge `files` (relative to `src_root`) into `dst_root`.
///
/// Blacklisted files are skipped, every path component is cleaned, and an existing
/// destination file is either replaced or left untouched. Cancellation is checked before
/// each file; a file already being transferred always completes.
///
/// # Arguments
/// * `src_root` - Folder the relative paths are resolved against
/// * `files` - Relative paths of regular files to transfer
/// * `dst_root` - Destination mod folder (already named and clamped by the adapter)
/// * `options` - Hardlink and replace policy
/// * `blacklist` - Names that must never be transferred
/// * `progress` - Receives one update per processed file
/// * `cancel` - Cooperative stop flag
///
/// # Returns
/// Per-call counters
pub fn merge_files(
    src_root: &Utf8Path,
    files: &[Utf8PathBuf],
    dst_root: &Utf8Path,
    options: &MergeOptions,
    blacklist: &FileBlacklist,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<MergeStats, MergeError> {
    let mut stats = MergeStats::default();
    let total = files.len() as u64;

    for (index, relative) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!("Merge into {} cancelled after {} files", dst_root, index);
            return Err(MergeError::Cancelled);
        }

        if blacklist.is_blacklisted(relative) {
            tracing::debug!("Skipping blacklisted file {}", relative);
            stats.blacklisted += 1;
            progress.file(index as u64 + 1, total);
            continue;
        }

        let src = src_root.join(relative);
        let dst = dst_root.join(clean_relative_path(relative));

        if dst.exists() {
            if !options.replace {
                tracing::debug!("Keeping existing file {}", dst);
                stats.skipped_existing += 1;
                progress.file(index as u64 + 1, total);
                continue;
            }
            // A hardlinked destination shares data with the source; unlink before writing.
            fs::remove_file(&dst).map_err(|source| MergeError::Transfer {
                src: src.clone(),
                dst: dst.clone(),
                source,
            })?;
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|source| MergeError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let transfer =
            transfer_file(&src, &dst, options.use_hardlinks).map_err(|source| {
                MergeError::Transfer {
                    src: src.clone(),
                    dst: dst.clone(),
                    source,
                }
            })?;

        match transfer {
            Transfer::Linked => stats.linked += 1,
            Transfer::Copied => stats.copied += 1,
        }
        stats.bytes += fs::metadata(&dst).map(|m| m.len()).unwrap_or(0);
        progress.file(index as u64 + 1, total);
    }

    tracing::debug!(
        "Merged into {}: {} linked, {} copied, {} kept, {} blacklisted",
        dst_root,
        stats.linked,
        stats.copied,
        stats.skipped_existing,
        stats.blacklisted
    );

    Ok(stats)
}

/// Hardlink `src` to `dst` if requested, copying when linking is refused.
pub fn transfer_file(src: &Utf8Path, dst: &Utf8Path, use_hardlinks: bool) -> io::Result<Transfer> {
    transfer_file_with(src, dst, use_hardlinks, |s, d| fs::hard_link(s, d))
}

fn transfer_file_with<F>(
    src: &Utf8Path,
    dst: &Utf8Path,
    use_hardlinks: bool,
    link: F,
) -> io::Result<Transfer>
where
    F: FnOnce(&Utf8Path, &Utf8Path) -> io::Result<()>,
{
    if use_hardlinks {
        match link(src, dst) {
            Ok(()) => return Ok(Transfer::Linked),
            Err(e) => {
                tracing::debug!("Hardlink {} -> {} failed ({}), copying instead", src, dst, e);
            }
        }
    }
    fs::copy(src, dst)?;
    Ok(Transfer::Copied)
}

/// List regular files below `root` as sorted relative paths.
pub fn list_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, MergeError> {
    let scan_err = |source: io::Error| MergeError::Scan {
        path: root.to_path_buf(),
        source,
    };

    if !root.is_dir() {
        return Err(scan_err(io::Error::new(
            io::ErrorKind::NotFound,
            "folder does not exist",
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| scan_err(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root.as_std_path())
            .map_err(|e| scan_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let relative = Utf8PathBuf::from_path_buf(relative.to_path_buf()).map_err(|p| {
            scan_err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non UTF-8 path: {}", p.display()),
            ))
        })?;
        files.push(relative);
    }
    Ok(files)
}

/// Sum of the sizes of `files` below `root`. Missing files count as zero.
pub fn total_size(root: &Utf8Path, files: &[Utf8PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|f| fs::metadata(root.join(f)).ok())
        .map(|m| m.len())
        .sum()
}

/// Copy a directory tree, used for backups and profile files.
pub fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> Result<usize, MergeError> {
    let files = list_files(src)?;
    for relative in &files {
        let from = src.join(relative);
        let to = dst.join(relative);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|source| MergeError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(&from, &to).map_err(|source| MergeError::Transfer {
            src: from.clone(),
            dst: to.clone(),
            source,
        })?;
    }
    Ok(files.len())
}

/// Write `contents` unless the file already holds exactly those bytes.
///
/// # Returns
/// `true` if the file was written
pub fn write_if_changed(path: &Utf8Path, contents: &str) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path)
        && existing == contents.as_bytes()
    {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(true)
}

/// Copy `src` over `dst` unless both already hold the same bytes.
///
/// # Returns
/// `true` if `dst` was written
pub fn copy_if_changed(src: &Utf8Path, dst: &Utf8Path) -> io::Result<bool> {
    let contents = fs::read(src)?;
    if let Ok(existing) = fs::read(dst)
        && existing == contents
    {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dst, contents)?;
    Ok(true)
}

/// Remove characters that are illegal in mod folder names, then trailing dots and spaces.
pub fn clean_fs_string(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !MOD_NAME_ILLEGAL.contains(c) && !c.is_control())
        .collect();
    cleaned.trim().trim_end_matches(['.', ' ']).to_string()
}

/// Truncate to at most `limit` characters without splitting a character.
pub fn clamp_name(name: &str, limit: usize) -> String {
    let clamped: String = name.chars().take(limit).collect();
    clamped.trim_end_matches(['.', ' ']).to_string()
}

/// Folder name for a mod: cleaned, clamped, never empty.
pub fn mod_folder_name(name: &str, limit: usize) -> String {
    let folder = clamp_name(&clean_fs_string(name), limit);
    if folder.is_empty() {
        clamp_name("mod", limit.max(1))
    } else {
        folder
    }
}

fn clean_path_component(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .filter(|c| !PATH_ILLEGAL.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Clean every component of a relative path.
pub fn clean_relative_path(path: &Utf8Path) -> Utf8PathBuf {
    path.components()
        .map(|c| clean_path_component(c.as_str()))
        .collect()
}

/// Free space on one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpace {
    pub disk: String,
    pub available: u64,
}

/// Source of free-space information, queried once per run.
#[cfg_attr(test, mockall::automock)]
pub trait DiskSpaceProbe: Send + Sync {
    /// Free space of the volume that holds (or would hold) `path`.
    fn available_space(&self, path: &Utf8Path) -> Option<DiskSpace>;
}

/// Disk probe backed by the operating system's mount table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpaceProbe for SystemDiskSpace {
    fn available_space(&self, path: &Utf8Path) -> Option<DiskSpace> {
        let existing = nearest_existing_ancestor(path)?;
        let canonical = existing
            .as_std_path()
            .canonicalize()
            .unwrap_or_else(|_| existing.as_std_path().to_path_buf());

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let mut best_len = 0usize;
        let mut best = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if canonical.starts_with(mount) {
                let len = mount.as_os_str().len();
                if len >= best_len {
                    best_len = len;
                    best = Some(DiskSpace {
                        disk: mount.display().to_string(),
                        available: disk.available_space(),
                    });
                }
            }
        }
        best
    }
}

fn nearest_existing_ancestor(path: &Utf8Path) -> Option<&Utf8Path> {
    path.ancestors().find(|p| !p.as_str().is_empty() && p.exists())
}
