// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    std::{path::PathBuf, process::ExitStatus},
    thiserror::Error,
};

/// Unified error type for re-signing operations.
#[derive(Debug, Error)]
pub enum ResignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("error extracting {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    #[error("workspace directory already exists: {}", .0.display())]
    WorkspaceCollision(PathBuf),

    #[error("error searching for bundles in {}: {message}", dir.display())]
    Locator { dir: PathBuf, message: String },

    #[error("no {kind} bundles found in {}", dir.display())]
    NoBundlesFound { kind: &'static str, dir: PathBuf },

    #[error("unable to run {tool}: {source}")]
    ToolSpawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolInvocation {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("unexpected tool output: {0}")]
    UnexpectedToolOutput(String),

    #[error("export options file not usable at {}: {message}", path.display())]
    MissingExportOptions { path: PathBuf, message: String },

    #[error("unable to start export workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no exports succeeded for {0} located bundles")]
    NoArtifactsProduced(usize),

    #[error("no .app bundle in Payload directory of {}", .0.display())]
    MissingAppBundle(PathBuf),

    #[error("no valid signing identity matches \"{0}\"")]
    NoMatchingIdentity(String),

    #[error("error resolving signing identities: {0}")]
    Resolution(String),

    #[error("error packaging delivery archive: {0}")]
    Packaging(String),

    #[error("credential {0} not found in keychain")]
    CredentialNotFound(String),

    #[error("credential lookup error: {0}")]
    Credential(String),
}
