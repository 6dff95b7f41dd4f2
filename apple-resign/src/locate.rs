// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Finding signable bundles inside an extracted workspace.

use {
    crate::error::ResignError,
    log::debug,
    std::path::{Path, PathBuf},
    walkdir::{DirEntry, WalkDir},
};

/// Directory name some archivers use to store resource fork shadow copies.
pub const RESOURCE_FORK_DIR: &str = "__MACOSX";

/// The kind of bundle to search for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundleKind {
    /// An `.xcarchive` directory.
    Xcarchive,
    /// An `.ipa` file.
    Ipa,
}

impl BundleKind {
    /// The file name suffix identifying this kind, including the leading dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Xcarchive => ".xcarchive",
            Self::Ipa => ".ipa",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xcarchive => "xcarchive",
            Self::Ipa => "ipa",
        }
    }

    fn matches(&self, entry: &DirEntry) -> bool {
        let type_matches = match self {
            Self::Xcarchive => entry.file_type().is_dir(),
            Self::Ipa => entry.file_type().is_file(),
        };

        type_matches
            && entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(self.suffix())
    }
}

impl std::fmt::Display for BundleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_resource_fork_shadow(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == std::ffi::OsStr::new(RESOURCE_FORK_DIR))
}

/// Find bundles of `kind` anywhere beneath `dir`.
///
/// Matching is a case-insensitive file name suffix comparison. Results are in
/// directory traversal order and are absolute. Entries under resource fork
/// shadow directories are excluded. An empty result is not an error: callers
/// decide whether finding nothing is fatal.
pub fn find_bundles(dir: &Path, kind: BundleKind) -> Result<Vec<PathBuf>, ResignError> {
    let locator_error = |message: String| ResignError::Locator {
        dir: dir.to_path_buf(),
        message,
    };

    let dir = dir.canonicalize().map_err(|e| locator_error(e.to_string()))?;
    let mut res = vec![];

    let mut walker = WalkDir::new(&dir).min_depth(1).into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| locator_error(e.to_string()))?;

        if !kind.matches(&entry) {
            continue;
        }

        if entry.file_type().is_dir() {
            walker.skip_current_dir();
        }

        let rel = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
        if is_resource_fork_shadow(rel) {
            debug!("ignoring resource fork shadow {}", entry.path().display());
            continue;
        }

        debug!("found {} bundle {}", kind, entry.path().display());
        res.push(entry.into_path());
    }

    Ok(res)
}
