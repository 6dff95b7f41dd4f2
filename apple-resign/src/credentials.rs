// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Secrets from the macOS keychain.

use {
    crate::{
        error::ResignError,
        tool::{Tool, ToolOutput},
    },
    log::{debug, warn},
    std::{collections::BTreeMap, path::Path},
};

/// Exit code `security` uses when an item could not be found.
const ERR_SEC_ITEM_NOT_FOUND: i32 = 44;

/// Source of named secrets.
pub trait CredentialStore: Send + Sync {
    /// Look up every name in `names` for `account`.
    ///
    /// Fails if any name cannot be found.
    fn lookup(
        &self,
        names: &[&str],
        account: &str,
    ) -> Result<BTreeMap<String, String>, ResignError>;
}

/// [CredentialStore] reading generic passwords with the `security` tool.
#[derive(Clone, Debug)]
pub struct KeychainCredentials {
    program: String,
}

impl Default for KeychainCredentials {
    fn default() -> Self {
        Self::new("security")
    }
}

impl KeychainCredentials {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl CredentialStore for KeychainCredentials {
    fn lookup(
        &self,
        names: &[&str],
        account: &str,
    ) -> Result<BTreeMap<String, String>, ResignError> {
        let mut res = BTreeMap::new();

        for name in names.iter().copied() {
            debug!("looking up keychain item {} for account {}", name, account);

            let output = Tool::new(&self.program)
                .args(["find-generic-password", "-a", account, "-s", name, "-w"])
                .output()?;

            res.insert(name.to_string(), interpret_lookup(name, &output)?);
        }

        Ok(res)
    }
}

fn interpret_lookup(name: &str, output: &ToolOutput) -> Result<String, ResignError> {
    if output.status.success() {
        Ok(output.stdout.trim_end_matches('\n').to_string())
    } else if output.status.code() == Some(ERR_SEC_ITEM_NOT_FOUND) {
        Err(ResignError::CredentialNotFound(name.to_string()))
    } else {
        Err(ResignError::Credential(format!(
            "looking up {}: {}",
            name,
            output.stderr.trim()
        )))
    }
}

/// Unlock `keychain` so `codesign` can use its private keys unattended.
pub fn unlock_keychain(security: &str, keychain: &Path, password: &str) -> Result<(), ResignError> {
    warn!("unlocking keychain {}", keychain.display());

    Tool::new(security)
        .arg("unlock-keychain")
        .arg("-p")
        .secret_arg(password)
        .arg(keychain)
        .run()?;

    Ok(())
}

#[cfg(all(test, unix))]
mod test {
    use {super::*, std::os::unix::process::ExitStatusExt, std::process::ExitStatus};

    fn output(code: i32, stdout: &str, stderr: &str) -> ToolOutput {
        ToolOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn lookup_found() -> Result<(), ResignError> {
        assert_eq!(
            interpret_lookup("signing-password", &output(0, "hunter2\n", ""))?,
            "hunter2"
        );

        Ok(())
    }

    #[test]
    fn lookup_missing() {
        let res = interpret_lookup(
            "signing-password",
            &output(
                44,
                "",
                "security: SecKeychainSearchCopyNext: The specified item could not be found in the keychain.\n",
            ),
        );
        assert!(matches!(
            res,
            Err(ResignError::CredentialNotFound(name)) if name == "signing-password"
        ));
    }

    #[test]
    fn lookup_other_failure() {
        assert!(matches!(
            interpret_lookup("signing-password", &output(1, "", "keychain locked\n")),
            Err(ResignError::Credential(msg)) if msg == "looking up signing-password: keychain locked"
        ));
    }
}
