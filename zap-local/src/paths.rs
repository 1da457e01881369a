//! Named mount points shared by the scanner and the tool it drives.
//!
//! Container backends translate between a host path and the path the tool
//! sees. On the host backend both sides are the same directory, but callers
//! still go through the mapping so that the command construction does not
//! depend on where the tool runs.

use std::path::{Path, PathBuf};

use crate::error::ZapError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMap {
    pub name: String,
    pub host_path: PathBuf,
    pub logical_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathMapping {
    scanner: String,
    entries: Vec<PathMap>,
}

impl PathMapping {
    pub fn for_scanner<I, N, H, L>(scanner: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (N, H, L)>,
        N: Into<String>,
        H: Into<PathBuf>,
        L: Into<PathBuf>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, host_path, logical_path)| PathMap {
                name: name.into(),
                host_path: host_path.into(),
                logical_path: logical_path.into(),
            })
            .collect();
        Self {
            scanner: scanner.to_string(),
            entries,
        }
    }

    pub fn scanner(&self) -> &str {
        &self.scanner
    }

    pub fn entries(&self) -> &[PathMap] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Result<&PathMap, ZapError> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| ZapError::UnknownMapping {
                scanner: self.scanner.clone(),
                name: name.to_string(),
            })
    }

    pub fn host_path(&self, name: &str) -> Result<&Path, ZapError> {
        self.entry(name).map(|entry| entry.host_path.as_path())
    }

    pub fn logical_path(&self, name: &str) -> Result<&Path, ZapError> {
        self.entry(name).map(|entry| entry.logical_path.as_path())
    }

    /// Translates a tool-side path back to the host through the mount with
    /// the longest matching prefix.
    pub fn logical_to_host(&self, path: &Path) -> Option<PathBuf> {
        self.entries
            .iter()
            .filter_map(|entry| {
                path.strip_prefix(&entry.logical_path)
                    .ok()
                    .map(|rest| (entry, rest))
            })
            .max_by_key(|(entry, _)| entry.logical_path.components().count())
            .map(|(entry, rest)| {
                if rest.as_os_str().is_empty() {
                    entry.host_path.clone()
                } else {
                    entry.host_path.join(rest)
                }
            })
    }
}
