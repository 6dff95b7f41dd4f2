// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-run workspace directories and unique name generation.

use {
    crate::error::ResignError,
    log::info,
    std::{
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
    },
};

/// Name of the workspace subdirectory holding export and re-sign output.
pub const SIGNED_DIR: &str = "signed";

/// Produces opaque identifiers for workspace and delivery archive names.
pub trait IdGenerator: Send + Sync {
    /// Obtain a new identifier. Identifiers must be valid file names.
    fn next_id(&self) -> String;
}

/// Random identifiers from UUIDv4.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic identifiers of the form `<prefix><n>`.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicUsize,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl ToString) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicUsize::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        format!("{}{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// A directory owned by a single pipeline run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a new, uniquely named workspace under `parent`.
    ///
    /// `parent` is created if missing. The workspace directory itself must not
    /// exist: an existing directory is never reused.
    pub fn create(parent: &Path, ids: &dyn IdGenerator) -> Result<Self, ResignError> {
        std::fs::create_dir_all(parent)?;

        let root = parent.join(ids.next_id());

        match std::fs::create_dir(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ResignError::WorkspaceCollision(root));
            }
            Err(e) => return Err(e.into()),
        }

        // Downstream tools get absolute paths regardless of how parent was given.
        let root = root.canonicalize()?;
        info!("created workspace {}", root.display());

        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The directory receiving export and re-sign output.
    pub fn signed_dir(&self) -> PathBuf {
        self.root.join(SIGNED_DIR)
    }

    /// Path of the export options descriptor for xcarchive exports.
    pub fn export_options_path(&self) -> PathBuf {
        self.root.join("options.plist")
    }
}
