// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zip archive extraction and creation.
//!
//! Input archives, `.ipa` files and delivery archives are all zip files.
//! Unix permissions and symlinks are preserved in both directions since
//! application bundles rely on executable bits and framework symlinks.

use {
    crate::{
        error::ResignError,
        workspace::{IdGenerator, Workspace},
    },
    log::{debug, warn},
    std::{
        fs::File,
        io::{Read, Write},
        path::{Component, Path, PathBuf},
    },
    walkdir::WalkDir,
    zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter},
};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// An entry to place in a new archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveItem {
    /// Filesystem path of the file or directory to add.
    pub source: PathBuf,
    /// Name of the entry in the archive. Directories are added recursively
    /// beneath this name.
    pub name: String,
}

/// Decompresses and compresses zip-compatible archives.
pub trait Archiver: Send + Sync {
    /// Extract every entry of `archive` into `dest`, creating `dest` if needed.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ResignError>;

    /// Write a new archive at `output` holding `items`.
    fn compress(
        &self,
        output: &Path,
        items: &[ArchiveItem],
        comment: Option<&str>,
    ) -> Result<(), ResignError>;
}

/// [Archiver] implemented with the `zip` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ResignError> {
        extract_zip(archive, dest).map_err(|e| match e {
            e @ ResignError::Extraction { .. } => e,
            e => ResignError::Extraction {
                path: archive.to_path_buf(),
                message: e.to_string(),
            },
        })
    }

    fn compress(
        &self,
        output: &Path,
        items: &[ArchiveItem],
        comment: Option<&str>,
    ) -> Result<(), ResignError> {
        let fh = File::create(output)?;
        let mut zip = ZipWriter::new(fh);

        if let Some(comment) = comment {
            zip.set_comment(comment);
        }

        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for item in items {
            let base = item.source.as_path();

            for entry in WalkDir::new(base).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(std::io::Error::from)?;
                let path = entry.path();

                let rel = path.strip_prefix(base).map_err(|_| {
                    ResignError::Packaging(format!(
                        "{} is not under {}",
                        path.display(),
                        base.display()
                    ))
                })?;
                let name = if rel.as_os_str().is_empty() {
                    item.name.clone()
                } else {
                    format!(
                        "{}/{}",
                        item.name,
                        rel.to_string_lossy().replace('\\', "/")
                    )
                };

                let metadata = std::fs::symlink_metadata(path)?;

                if metadata.file_type().is_symlink() {
                    let target = std::fs::read_link(path)?;
                    zip.add_symlink(name, target.to_string_lossy(), options)?;
                } else if metadata.is_dir() {
                    zip.add_directory(format!("{}/", name), options)?;
                } else {
                    #[cfg(unix)]
                    let options = {
                        use std::os::unix::fs::PermissionsExt;
                        options.unix_permissions(metadata.permissions().mode())
                    };

                    zip.start_file(name, options)?;
                    let mut data = vec![];
                    File::open(path)?.read_to_end(&mut data)?;
                    zip.write_all(&data)?;
                }
            }
        }

        zip.finish()?;

        Ok(())
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ResignError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    std::fs::create_dir_all(dest)?;
    let root = dest.canonicalize()?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;

        let rel_path = if let Some(p) = entry.enclosed_name() {
            p.to_path_buf()
        } else {
            warn!("ignoring unsafe archive entry {}", entry.name());
            continue;
        };
        let dest_path = root.join(&rel_path);

        // Earlier symlink entries must not redirect later entries outside root.
        if !resolves_within(&root, &dest_path) {
            warn!(
                "ignoring archive entry {} leading outside {}",
                entry.name(),
                root.display()
            );
            continue;
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mode = entry.unix_mode();

        if mode.map(|m| m & S_IFMT == S_IFLNK).unwrap_or(false) {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;

            if !symlink_target_within(&rel_path, &target) {
                warn!(
                    "ignoring symlink {} pointing outside the archive: {}",
                    rel_path.display(),
                    target
                );
                continue;
            }

            debug!("extracting symlink {} -> {}", rel_path.display(), target);
            create_symlink(&dest_path, &target)?;
            continue;
        }

        let mut fh = File::create(&dest_path)?;
        std::io::copy(&mut entry, &mut fh)?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &dest_path,
                std::fs::Permissions::from_mode(mode & 0o7777),
            )?;
        }
    }

    Ok(())
}

/// Whether `path` stays under `root` once existing symlinks along it are followed.
///
/// `root` must be canonical.
fn resolves_within(root: &Path, path: &Path) -> bool {
    for ancestor in path.ancestors() {
        if ancestor.symlink_metadata().is_ok() {
            return ancestor
                .canonicalize()
                .map(|p| p.starts_with(root))
                .unwrap_or(false);
        }
    }

    false
}

/// Whether a symlink at `link`, relative to the extraction root, pointing at
/// `target` resolves under that root.
fn symlink_target_within(link: &Path, target: &str) -> bool {
    let mut depth = link
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count() as isize
        - 1;

    for component in Path::new(target).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }

    true
}

#[cfg(unix)]
fn create_symlink(path: &Path, target: &str) -> Result<(), ResignError> {
    if path.symlink_metadata().is_ok() {
        std::fs::remove_file(path)?;
    }

    std::os::unix::fs::symlink(target, path)?;

    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(path: &Path, target: &str) -> Result<(), ResignError> {
    warn!(
        "symlinks unsupported on this platform; writing {} as a file",
        path.display()
    );
    std::fs::write(path, target)?;

    Ok(())
}

/// Extract `archive` into a freshly created workspace under `workspace_root`.
pub fn extract_to_workspace(
    archiver: &dyn Archiver,
    archive: &Path,
    workspace_root: &Path,
    ids: &dyn IdGenerator,
) -> Result<Workspace, ResignError> {
    let workspace = Workspace::create(workspace_root, ids).map_err(|e| ResignError::Extraction {
        path: archive.to_path_buf(),
        message: format!("unable to create workspace: {}", e),
    })?;

    warn!(
        "extracting {} to {}",
        archive.display(),
        workspace.path().display()
    );
    archiver.extract(archive, workspace.path())?;

    Ok(workspace)
}
