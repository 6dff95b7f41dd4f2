// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Re-signing of `.ipa` packages.

use {
    crate::{
        archive::{ArchiveItem, Archiver},
        error::ResignError,
        identity::{
            extract_signing_identifier_from_bundle, resolve_identifier_for_value, IdentityStore,
        },
        tool::Tool,
        workspace::Workspace,
    },
    log::{info, warn},
    std::path::{Path, PathBuf},
};

/// Name of the directory holding a bundle's code signature.
pub const CODE_SIGNATURE_DIR: &str = "_CodeSignature";

/// Interface to the code signing tool.
pub trait CodeSigner: Send + Sync {
    /// Obtain the tool's description of the existing signature on `bundle`.
    ///
    /// Unsigned bundles are not an error; the returned text just lacks
    /// authority information.
    fn display_signature(&self, bundle: &Path) -> Result<String, ResignError>;

    /// Sign `bundle` in place with the identity named by `identity`.
    fn sign(&self, identity: &str, bundle: &Path) -> Result<(), ResignError>;
}

/// [CodeSigner] backed by Apple's `codesign` tool.
#[derive(Clone, Debug)]
pub struct CodesignTool {
    program: String,
}

impl Default for CodesignTool {
    fn default() -> Self {
        Self::new("codesign")
    }
}

impl CodesignTool {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl CodeSigner for CodesignTool {
    fn display_signature(&self, bundle: &Path) -> Result<String, ResignError> {
        // codesign exits non-zero for unsigned code; that's a valid answer here.
        let output = Tool::new(&self.program)
            .args(["--display", "--verbose=2"])
            .arg(bundle)
            .output()?;

        Ok(output.combined())
    }

    fn sign(&self, identity: &str, bundle: &Path) -> Result<(), ResignError> {
        Tool::new(&self.program)
            .args(["--force", "--sign", identity])
            .arg(bundle)
            .run()?;

        Ok(())
    }
}

/// Find the `.app` directory inside an extracted `.ipa`.
pub fn find_payload_app(extracted: &Path) -> Result<PathBuf, ResignError> {
    let payload = extracted.join("Payload");

    if payload.is_dir() {
        let mut apps = std::fs::read_dir(&payload)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|p| {
                p.is_dir()
                    && p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("app"))
                        .unwrap_or(false)
            })
            .collect::<Vec<_>>();
        apps.sort();

        if let Some(app) = apps.into_iter().next() {
            return Ok(app);
        }
    }

    Err(ResignError::MissingAppBundle(extracted.to_path_buf()))
}

/// Re-sign a single `.ipa`, returning the path of the re-signed package.
///
/// `index` names the scratch directory under the workspace's signed
/// directory. The re-signed package keeps the original file name and ends up
/// at the top level of the workspace.
pub fn resign_ipa(
    workspace: &Workspace,
    index: usize,
    ipa: &Path,
    archiver: &dyn Archiver,
    signer: &dyn CodeSigner,
    identities: &dyn IdentityStore,
) -> Result<PathBuf, ResignError> {
    let file_name = ipa
        .file_name()
        .ok_or_else(|| ResignError::Extraction {
            path: ipa.to_path_buf(),
            message: "path has no file name".into(),
        })?
        .to_os_string();

    let scratch = workspace.signed_dir().join(index.to_string());
    warn!("extracting {} to {}", ipa.display(), scratch.display());
    archiver.extract(ipa, &scratch)?;

    let app = find_payload_app(&scratch)?;

    let authority = extract_signing_identifier_from_bundle(signer, &app)?;
    info!("existing signing authority: \"{}\"", authority);

    let identity = resolve_identifier_for_value(identities, &authority)?
        .ok_or_else(|| ResignError::NoMatchingIdentity(authority.clone()))?;

    let signature_dir = app.join(CODE_SIGNATURE_DIR);
    if signature_dir.exists() {
        info!("removing existing signature {}", signature_dir.display());
        std::fs::remove_dir_all(&signature_dir)?;
    }

    warn!("signing {} with identity {}", app.display(), identity);
    signer.sign(&identity, &app)?;

    let mut items = std::fs::read_dir(&scratch)?
        .map(|entry| {
            entry.map(|e| ArchiveItem {
                name: e.file_name().to_string_lossy().to_string(),
                source: e.path(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    items.sort_by(|a, b| a.name.cmp(&b.name));

    let staged = workspace.signed_dir().join(&file_name);
    archiver.compress(&staged, &items, None)?;

    let dest = workspace.path().join(&file_name);
    std::fs::rename(&staged, &dest)?;
    warn!("wrote re-signed package {}", dest.display());

    Ok(dest)
}

/// Re-sign every `.ipa` in `bundles`, one after another in the given order.
///
/// Returns the file names of the re-signed packages, which live at the top
/// level of the workspace. The first failure aborts the remaining bundles.
pub fn resign_ipas(
    workspace: &Workspace,
    bundles: &[PathBuf],
    archiver: &dyn Archiver,
    signer: &dyn CodeSigner,
    identities: &dyn IdentityStore,
) -> Result<Vec<String>, ResignError> {
    let mut produced = Vec::with_capacity(bundles.len());

    for (index, ipa) in bundles.iter().enumerate() {
        let dest = resign_ipa(workspace, index, ipa, archiver, signer, identities)?;

        produced.push(
            dest.file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
    }

    Ok(produced)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_app_lookup() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;

        assert!(matches!(
            find_payload_app(td.path()),
            Err(ResignError::MissingAppBundle(_))
        ));

        std::fs::create_dir_all(td.path().join("Payload"))?;
        std::fs::write(td.path().join("Payload/stray.app"), b"")?;
        assert!(matches!(
            find_payload_app(td.path()),
            Err(ResignError::MissingAppBundle(_))
        ));

        std::fs::create_dir_all(td.path().join("Payload/Example.app"))?;
        assert_eq!(
            find_payload_app(td.path())?,
            td.path().join("Payload/Example.app")
        );

        Ok(())
    }
}
