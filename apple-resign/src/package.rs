// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creation of delivery archives.

use {
    crate::{
        archive::{ArchiveItem, Archiver},
        error::ResignError,
        workspace::IdGenerator,
    },
    log::warn,
    std::{
        collections::BTreeSet,
        path::{Path, PathBuf},
    },
};

/// Comment embedded in every delivery archive.
pub const DELIVERY_ARCHIVE_COMMENT: &str = "apple-resign delivery";

/// File extension of delivery archives.
pub const DELIVERY_ARCHIVE_EXTENSION: &str = "zip";

/// Compress `items` into a new delivery archive inside `dir`.
///
/// Relative items are resolved against `dir`. Each item is stored under its
/// file name; directories are stored recursively. The archive is named with a
/// fresh identifier from `ids`.
pub fn package_delivery(
    archiver: &dyn Archiver,
    dir: &Path,
    items: &[PathBuf],
    ids: &dyn IdGenerator,
) -> Result<PathBuf, ResignError> {
    let mut seen = BTreeSet::new();
    let mut entries = Vec::with_capacity(items.len());

    for item in items {
        let source = dir.join(item);

        let name = source
            .file_name()
            .ok_or_else(|| {
                ResignError::Packaging(format!("{} has no file name", item.display()))
            })?
            .to_string_lossy()
            .to_string();

        if !source.exists() {
            return Err(ResignError::Packaging(format!(
                "{} does not exist",
                source.display()
            )));
        }

        if !seen.insert(name.clone()) {
            return Err(ResignError::Packaging(format!(
                "multiple items named {}",
                name
            )));
        }

        entries.push(ArchiveItem { source, name });
    }

    let output = dir.join(format!("{}.{}", ids.next_id(), DELIVERY_ARCHIVE_EXTENSION));

    warn!(
        "packaging {} items into {}",
        entries.len(),
        output.display()
    );
    archiver
        .compress(&output, &entries, Some(DELIVERY_ARCHIVE_COMMENT))
        .map_err(|e| ResignError::Packaging(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{archive::ZipArchiver, workspace::SequentialIdGenerator},
        std::fs::File,
        zip::ZipArchive,
    };

    #[test]
    fn package_files_and_directories() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;
        let dir = td.path();

        std::fs::write(dir.join("App.ipa"), b"ipa")?;
        std::fs::create_dir_all(dir.join("signed/B"))?;
        std::fs::write(dir.join("signed/B/Other.ipa"), b"other")?;

        let ids = SequentialIdGenerator::new("delivery-");
        let output = package_delivery(
            &ZipArchiver,
            dir,
            &[PathBuf::from("App.ipa"), dir.join("signed/B")],
            &ids,
        )?;

        assert_eq!(output, dir.join("delivery-0.zip"));

        let mut zip = ZipArchive::new(File::open(&output)?)?;
        assert_eq!(zip.comment(), DELIVERY_ARCHIVE_COMMENT.as_bytes());

        let mut names = (0..zip.len())
            .map(|i| Ok(zip.by_index(i)?.name().to_string()))
            .collect::<Result<Vec<_>, ResignError>>()?;
        names.sort();
        assert_eq!(names, vec!["App.ipa", "B/", "B/Other.ipa"]);

        Ok(())
    }

    #[test]
    fn empty_delivery() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;

        let output = package_delivery(
            &ZipArchiver,
            td.path(),
            &[],
            &SequentialIdGenerator::new("empty"),
        )?;

        assert_eq!(ZipArchive::new(File::open(output)?)?.len(), 0);

        Ok(())
    }

    #[test]
    fn reject_bad_items() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;
        let dir = td.path();
        let ids = SequentialIdGenerator::new("d");

        assert!(matches!(
            package_delivery(&ZipArchiver, dir, &[PathBuf::from("missing.ipa")], &ids),
            Err(ResignError::Packaging(_))
        ));

        std::fs::create_dir_all(dir.join("a"))?;
        std::fs::create_dir_all(dir.join("b"))?;
        std::fs::write(dir.join("a/App.ipa"), b"")?;
        std::fs::write(dir.join("b/App.ipa"), b"")?;

        assert!(matches!(
            package_delivery(
                &ZipArchiver,
                dir,
                &[PathBuf::from("a/App.ipa"), PathBuf::from("b/App.ipa")],
                &ids
            ),
            Err(ResignError::Packaging(_))
        ));

        Ok(())
    }
}
