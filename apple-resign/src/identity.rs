// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of code signing identities on the signing host.
//!
//! We never know ahead of time which keychain identity corresponds to the
//! party that originally signed a bundle. So resolution is indirect: the
//! `Authority` recorded in the bundle's existing signature is used as a
//! substring hint against the identities the host currently considers valid
//! for code signing. The identity list is queried fresh on every resolution.

use {
    crate::{error::ResignError, resign::CodeSigner, tool::Tool},
    log::{debug, info},
    std::{fmt::Display, path::Path},
};

/// A code signing identity known to the host trust store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningIdentity {
    /// SHA-1 fingerprint of the certificate. Accepted by `codesign --sign`.
    pub identifier: String,
    /// Human readable name. e.g. `Apple Distribution: Example Org (ABCDE12345)`.
    pub label: String,
}

impl Display for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} \"{}\"", self.identifier, self.label)
    }
}

impl SigningIdentity {
    /// Parse a single line of `security find-identity` output.
    ///
    /// Lines have the form `  1) <fingerprint> "<label>"`. Returns `None` for
    /// anything else, including the `N valid identities found` summary.
    pub fn from_find_identity_line(line: &str) -> Option<Self> {
        let line = line.trim();

        let (index, rest) = line.split_once(')')?;
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let (identifier, rest) = rest.trim_start().split_once(char::is_whitespace)?;
        if !identifier.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        let start = rest.find('"')?;
        let end = rest.rfind('"')?;
        if end <= start {
            return None;
        }

        Some(Self {
            identifier: identifier.to_string(),
            label: rest[start + 1..end].to_string(),
        })
    }
}

/// Parse the full output of `security find-identity`.
pub fn parse_find_identity_output(output: &str) -> Vec<SigningIdentity> {
    output
        .lines()
        .filter_map(SigningIdentity::from_find_identity_line)
        .collect()
}

/// Source of identities currently usable for code signing.
pub trait IdentityStore: Send + Sync {
    /// Query the identities valid for code signing right now.
    ///
    /// Order is whatever the underlying store reports.
    fn valid_identities(&self) -> Result<Vec<SigningIdentity>, ResignError>;
}

/// [IdentityStore] backed by the macOS `security` tool.
#[derive(Clone, Debug)]
pub struct SecurityIdentityStore {
    program: String,
}

impl Default for SecurityIdentityStore {
    fn default() -> Self {
        Self::new("security")
    }
}

impl SecurityIdentityStore {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl IdentityStore for SecurityIdentityStore {
    fn valid_identities(&self) -> Result<Vec<SigningIdentity>, ResignError> {
        let output = Tool::new(&self.program)
            .args(["find-identity", "-v", "-p", "codesigning"])
            .run()
            .map_err(|e| ResignError::Resolution(e.to_string()))?;

        let identities = parse_find_identity_output(&output.stdout);
        debug!("{} valid code signing identities", identities.len());

        Ok(identities)
    }
}

/// Find the identifier of the first valid identity containing `value`.
///
/// The match is a substring search over each identity's textual form
/// (`<fingerprint> "<label>"`). An empty `value` never matches.
pub fn resolve_identifier_for_value(
    store: &dyn IdentityStore,
    value: &str,
) -> Result<Option<String>, ResignError> {
    if value.is_empty() {
        return Ok(None);
    }

    let identity = store
        .valid_identities()?
        .into_iter()
        .find(|identity| identity.to_string().contains(value));

    if let Some(identity) = &identity {
        info!("resolved \"{}\" to identity {}", value, identity);
    }

    Ok(identity.map(|identity| identity.identifier))
}

/// Extract the first `Authority=` value from `codesign --display` output.
///
/// Returns an empty string if none is present, e.g. for unsigned code.
pub fn parse_signing_authority(output: &str) -> String {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Authority="))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Obtain the signing authority of a bundle's existing signature.
///
/// The value is only a hint for [resolve_identifier_for_value]. An empty
/// string means the bundle carries no usable signature.
pub fn extract_signing_identifier_from_bundle(
    signer: &dyn CodeSigner,
    bundle: &Path,
) -> Result<String, ResignError> {
    let output = signer.display_signature(bundle)?;

    Ok(parse_signing_authority(&output))
}
