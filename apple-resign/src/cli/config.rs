// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::error::ResignError,
    figment::{
        providers::{Env, Format, Serialized, Toml},
        Figment,
    },
    log::debug,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

/// Configuration file profile definition.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Directory under which per-run workspaces are created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Paths to external tools.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Keychain to unlock before signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keychain: Option<KeychainConfig>,
}

/// Locations of the external programs we drive.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xcodebuild: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codesign: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
}

impl ToolsConfig {
    pub fn xcodebuild(&self) -> &str {
        self.xcodebuild.as_deref().unwrap_or("xcodebuild")
    }

    pub fn codesign(&self) -> &str {
        self.codesign.as_deref().unwrap_or("codesign")
    }

    pub fn security(&self) -> &str {
        self.security.as_deref().unwrap_or("security")
    }
}

/// A keychain whose password lives in the credential store.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct KeychainConfig {
    /// Path to the keychain file.
    pub path: PathBuf,

    /// Account owning the password item.
    pub account: String,

    /// Name of the generic password item holding the keychain password.
    pub password_item: String,
}

/// Used to instantiate [Config] instances.
#[derive(Clone)]
pub struct ConfigBuilder {
    loader: Figment,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            loader: Figment::new(),
        }
    }
}

impl ConfigBuilder {
    /// Add the $XDG_CONFIG/apple-resign/apple-resign.toml user config file if it exists.
    pub fn with_user_config_file(mut self) -> Self {
        if let Some(base) = dirs::config_dir() {
            let p = base.join("apple-resign").join("apple-resign.toml");
            debug!("registering user config file: {}", p.display());

            self.loader = self.loader.merge(Toml::file(p).nested());
        }

        self
    }

    /// Merge a config file from `pwd`/apple-resign.toml.
    pub fn with_cwd_config_file(mut self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            let p = cwd.join("apple-resign.toml");
            debug!("registering cwd config file: {}", p.display());

            self.loader = self.loader.merge(Toml::file(p).nested());
        }

        self
    }

    /// Merge with environment variables.
    ///
    /// Must be called after [Self::profile()] to ensure environment variables
    /// are mapped to the current profile.
    pub fn with_env_prefix(mut self) -> Self {
        debug!("registering APPLE_RESIGN_ environment variable config source");
        // APPLE_RESIGN_TOOLS__CODESIGN -> tools.codesign, _ -> - within keys.
        let env = Env::prefixed("APPLE_RESIGN_")
            .split("__")
            .map(|key| key.as_str().replace('_', "-").into())
            .profile(self.loader.profile().to_string());

        self.loader = self.loader.merge(env);
        self
    }

    /// Add a TOML config file to this instance.
    pub fn toml_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        debug!("registering custom config file: {}", path.display());
        self.loader = self.loader.merge(Toml::file(path).nested());
        self
    }

    /// Add a TOML string config to this instance.
    pub fn toml_string(mut self, data: &str) -> Self {
        debug!("registering TOML string config data");
        self.loader = self.loader.merge(Toml::string(data).nested());
        self
    }

    /// Merge a [Config] struct into this builder
    pub fn with_config_struct(mut self, config: Config) -> Self {
        debug!("registering config struct");
        let serialized = Serialized::defaults(config).profile(self.loader.profile().to_string());

        self.loader = self.loader.merge(serialized);
        self
    }

    /// Load the named profile instead of the `[default]` profile.
    pub fn profile(mut self, profile: String) -> Self {
        self.loader = self.loader.select(profile);
        self
    }

    /// Obtain a config profile.
    pub fn config(self) -> Result<Config, ResignError> {
        Ok(self.loader.extract()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config() {
        let c = ConfigBuilder::default().config().unwrap();

        assert_eq!(c, Config::default());
        assert_eq!(c.tools.xcodebuild(), "xcodebuild");
        assert_eq!(c.tools.codesign(), "codesign");
        assert_eq!(c.tools.security(), "security");
    }

    #[test]
    fn full_config() {
        let c = ConfigBuilder::default()
            .toml_string(
                r#"
                [default]
                workspace-root = "/var/tmp/resign"

                [default.tools]
                xcodebuild = "/Applications/Xcode.app/Contents/Developer/usr/bin/xcodebuild"
                codesign = "/usr/bin/codesign"

                [default.keychain]
                path = "/Users/ci/signing.keychain-db"
                account = "ci"
                password-item = "signing-keychain-password"
                "#,
            )
            .config()
            .unwrap();

        assert_eq!(
            c,
            Config {
                workspace_root: Some("/var/tmp/resign".into()),
                tools: ToolsConfig {
                    xcodebuild: Some(
                        "/Applications/Xcode.app/Contents/Developer/usr/bin/xcodebuild".into()
                    ),
                    codesign: Some("/usr/bin/codesign".into()),
                    security: None,
                },
                keychain: Some(KeychainConfig {
                    path: "/Users/ci/signing.keychain-db".into(),
                    account: "ci".into(),
                    password_item: "signing-keychain-password".into(),
                }),
            }
        );
        assert_eq!(c.tools.security(), "security");
    }

    #[test]
    fn profiles() {
        let data = r#"
            [default]
            workspace-root = "/default"

            [release]
            workspace-root = "/release"
            "#;

        assert_eq!(
            ConfigBuilder::default()
                .toml_string(data)
                .config()
                .unwrap()
                .workspace_root,
            Some("/default".into())
        );
        assert_eq!(
            ConfigBuilder::default()
                .toml_string(data)
                .profile("release".into())
                .config()
                .unwrap()
                .workspace_root,
            Some("/release".into())
        );
    }

    #[test]
    fn struct_overrides_file() {
        let c = ConfigBuilder::default()
            .toml_string(
                r#"
                [default]
                workspace-root = "/from-file"
                "#,
            )
            .with_config_struct(Config {
                workspace_root: Some("/from-args".into()),
                ..Default::default()
            })
            .config()
            .unwrap();

        assert_eq!(c.workspace_root, Some("/from-args".into()));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(ConfigBuilder::default()
            .toml_string(
                r#"
                [default]
                workspace = "/typo"
                "#,
            )
            .config()
            .is_err());
    }
}
