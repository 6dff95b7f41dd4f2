// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End to end re-signing pipelines.
//!
//! A pipeline run moves through the stages of [PipelineStage] in order.
//! Any stage may fail, which moves the run to [PipelineStage::Failed] and
//! ends it without a delivery archive.

use {
    crate::{
        archive::{extract_to_workspace, Archiver, ZipArchiver},
        error::ResignError,
        export::{export_xcarchives, Exporter, XcodebuildExporter},
        identity::{IdentityStore, SecurityIdentityStore},
        locate::{find_bundles, BundleKind},
        package::package_delivery,
        resign::{resign_ipas, CodeSigner, CodesignTool},
        workspace::{IdGenerator, UuidGenerator, Workspace},
    },
    log::{error, info, warn},
    std::{
        fmt::Display,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Stages of a pipeline run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineStage {
    Start,
    Extracted,
    Located,
    Processed,
    Packaged,
    Failed,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Extracted => "extracted",
            Self::Located => "located",
            Self::Processed => "processed",
            Self::Packaged => "packaged",
            Self::Failed => "failed",
        })
    }
}

/// Default parent directory for workspaces.
pub fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("apple-resign")
}

/// Re-signs uploaded archives and produces delivery archives.
///
/// External collaborators are held as trait objects so alternate tools (or
/// test doubles) can be substituted.
pub struct Resigner {
    workspace_root: PathBuf,
    archiver: Arc<dyn Archiver>,
    exporter: Arc<dyn Exporter>,
    signer: Arc<dyn CodeSigner>,
    identities: Arc<dyn IdentityStore>,
    ids: Arc<dyn IdGenerator>,
}

impl Resigner {
    /// Construct an instance using the system's Apple developer tools.
    pub fn system(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
            archiver: Arc::new(ZipArchiver),
            exporter: Arc::new(XcodebuildExporter::default()),
            signer: Arc::new(CodesignTool::default()),
            identities: Arc::new(SecurityIdentityStore::default()),
            ids: Arc::new(UuidGenerator),
        }
    }

    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    #[must_use]
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = exporter;
        self
    }

    #[must_use]
    pub fn with_code_signer(mut self, signer: Arc<dyn CodeSigner>) -> Self {
        self.signer = signer;
        self
    }

    #[must_use]
    pub fn with_identity_store(mut self, identities: Arc<dyn IdentityStore>) -> Self {
        self.identities = identities;
        self
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    fn enter(&self, stage: PipelineStage, workspace: Option<&Workspace>) {
        match workspace {
            Some(ws) => info!("pipeline stage {} ({})", stage, ws.path().display()),
            None => info!("pipeline stage {}", stage),
        }
    }

    fn extract(&self, archive: &Path) -> Result<Workspace, ResignError> {
        self.enter(PipelineStage::Start, None);
        let workspace = extract_to_workspace(
            self.archiver.as_ref(),
            archive,
            &self.workspace_root,
            self.ids.as_ref(),
        )?;
        self.enter(PipelineStage::Extracted, Some(&workspace));

        Ok(workspace)
    }

    fn locate(&self, workspace: &Workspace, kind: BundleKind) -> Result<Vec<PathBuf>, ResignError> {
        let bundles = find_bundles(workspace.path(), kind)?;

        if bundles.is_empty() {
            return Err(ResignError::NoBundlesFound {
                kind: kind.as_str(),
                dir: workspace.path().to_path_buf(),
            });
        }

        warn!("found {} {} bundles", bundles.len(), kind);
        self.enter(PipelineStage::Located, Some(workspace));

        Ok(bundles)
    }

    fn fail(&self, flow: &str, e: ResignError) -> ResignError {
        self.enter(PipelineStage::Failed, None);
        error!("{} signing failed: {}", flow, e);
        e
    }

    fn package(&self, workspace: &Workspace, items: &[PathBuf]) -> Result<PathBuf, ResignError> {
        let delivery = package_delivery(
            self.archiver.as_ref(),
            workspace.path(),
            items,
            self.ids.as_ref(),
        )?;
        self.enter(PipelineStage::Packaged, Some(workspace));

        Ok(delivery)
    }

    fn run_xcarchive(&self, archive: &Path) -> Result<PathBuf, ResignError> {
        let workspace = self.extract(archive)?;
        let bundles = self.locate(&workspace, BundleKind::Xcarchive)?;

        let produced = export_xcarchives(&workspace, &bundles, self.exporter.as_ref())?;
        if produced.is_empty() {
            return Err(ResignError::NoArtifactsProduced(bundles.len()));
        }
        self.enter(PipelineStage::Processed, Some(&workspace));

        self.package(&workspace, &produced)
    }

    /// Export and sign every `.xcarchive` in `archive`.
    ///
    /// `archive` must also carry the `options.plist` export options shared by
    /// all exports. Bundles whose export fails are left out of the delivery
    /// archive; the run fails only if nothing was produced or the export
    /// tool misbehaves. Failures are logged before being returned.
    pub fn sign_xcarchive(&self, archive: impl AsRef<Path>) -> Result<PathBuf, ResignError> {
        self.run_xcarchive(archive.as_ref()).map_err(|e| self.fail("xcarchive", e))
    }

    /// Re-sign every `.ipa` in `archive` with the valid identity matching its
    /// existing signature.
    ///
    /// Packages are processed one at a time. Any failure, including a
    /// package with no matching identity, fails the run.
    pub fn sign_ipa(&self, archive: impl AsRef<Path>) -> Result<PathBuf, ResignError> {
        self.run_ipa(archive.as_ref()).map_err(|e| self.fail("ipa", e))
    }

    fn run_ipa(&self, archive: &Path) -> Result<PathBuf, ResignError> {
        let workspace = self.extract(archive)?;
        let bundles = self.locate(&workspace, BundleKind::Ipa)?;

        let produced = resign_ipas(
            &workspace,
            &bundles,
            self.archiver.as_ref(),
            self.signer.as_ref(),
            self.identities.as_ref(),
        )?;
        self.enter(PipelineStage::Processed, Some(&workspace));

        let items = produced.into_iter().map(PathBuf::from).collect::<Vec<_>>();

        self.package(&workspace, &items)
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::workspace::SequentialIdGenerator};

    #[test]
    fn stage_names() {
        let stages = [
            PipelineStage::Start,
            PipelineStage::Extracted,
            PipelineStage::Located,
            PipelineStage::Processed,
            PipelineStage::Packaged,
            PipelineStage::Failed,
        ];

        assert_eq!(
            stages.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            vec!["start", "extracted", "located", "processed", "packaged", "failed"]
        );
    }

    #[test]
    fn failed_run_returns_stage_error() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;
        let resigner = Resigner::system(td.path().join("work"))
            .with_id_generator(Arc::new(SequentialIdGenerator::new("run-")));

        for res in [
            resigner.sign_ipa(td.path().join("missing.zip")),
            resigner.sign_xcarchive(td.path().join("missing.zip")),
        ] {
            assert!(matches!(res, Err(ResignError::Extraction { .. })));
        }

        Ok(())
    }
}
