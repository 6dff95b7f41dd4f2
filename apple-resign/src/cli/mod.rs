// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;

use {
    crate::{
        cli::config::{Config, ConfigBuilder},
        credentials::{unlock_keychain, CredentialStore, KeychainCredentials},
        error::ResignError,
        export::XcodebuildExporter,
        identity::{resolve_identifier_for_value, IdentityStore, SecurityIdentityStore},
        pipeline::{default_workspace_root, Resigner},
        resign::CodesignTool,
    },
    clap::{ArgAction, Args, Parser, Subcommand},
    log::LevelFilter,
    std::{path::PathBuf, sync::Arc},
};

const SIGN_XCARCHIVE_ABOUT: &str = "\
Export and sign the .xcarchive bundles inside a zip archive.

The input zip must contain one or more .xcarchive directories and an
options.plist export options file at its root. Each archive is exported
with `xcodebuild -exportArchive` using those options. All exports run
concurrently.

Archives whose export does not succeed are left out. Every successful
export is collected into a single delivery zip whose path is printed
on success.
";

const SIGN_IPA_ABOUT: &str = "\
Re-sign the .ipa packages inside a zip archive.

For each .ipa, the authority of the existing signature is matched against
the identities `security find-identity -v -p codesigning` reports as valid.
The first identity whose description contains the authority is used to
re-sign the application with `codesign`. Packages are processed one at a
time and keep their original file names.

If any package has no matching identity, nothing is delivered. Otherwise
the path of the delivery zip is printed.
";

/// Holds state to pass to CLI commands.
pub struct Context {
    pub config: Config,
}

impl Context {
    /// Construct a [Resigner] from config, unlocking the keychain if one is configured.
    fn resigner(&self) -> Result<Resigner, ResignError> {
        let c = &self.config;

        if let Some(keychain) = &c.keychain {
            let credentials = KeychainCredentials::new(c.tools.security());
            let secrets =
                credentials.lookup(&[keychain.password_item.as_str()], &keychain.account)?;
            let password = secrets
                .get(&keychain.password_item)
                .ok_or_else(|| ResignError::CredentialNotFound(keychain.password_item.clone()))?;

            unlock_keychain(c.tools.security(), &keychain.path, password)?;
        }

        let root = c
            .workspace_root
            .clone()
            .unwrap_or_else(default_workspace_root);

        Ok(Resigner::system(root)
            .with_exporter(Arc::new(XcodebuildExporter::new(c.tools.xcodebuild())))
            .with_code_signer(Arc::new(CodesignTool::new(c.tools.codesign())))
            .with_identity_store(Arc::new(SecurityIdentityStore::new(c.tools.security()))))
    }
}

pub trait CliCommand {
    /// Obtain the current command arguments normalized to a [Config] instance.
    fn as_config(&self) -> Result<Option<Config>, ResignError> {
        Ok(None)
    }

    /// Runs the command.
    fn run(&self, context: &Context) -> Result<(), ResignError>;
}

#[derive(Args)]
struct PipelineArgs {
    /// Directory under which the per-run workspace is created
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<PathBuf>,

    /// Path to the zip archive to process
    input_path: PathBuf,
}

impl PipelineArgs {
    fn as_config(&self) -> Config {
        Config {
            workspace_root: self.workspace_root.clone(),
            ..Default::default()
        }
    }
}

#[derive(Parser)]
struct SignXcarchive {
    #[command(flatten)]
    pipeline: PipelineArgs,
}

impl CliCommand for SignXcarchive {
    fn as_config(&self) -> Result<Option<Config>, ResignError> {
        Ok(Some(self.pipeline.as_config()))
    }

    fn run(&self, context: &Context) -> Result<(), ResignError> {
        let resigner = context.resigner()?;
        let delivery = resigner.sign_xcarchive(&self.pipeline.input_path)?;

        println!("{}", delivery.display());

        Ok(())
    }
}

#[derive(Parser)]
struct SignIpa {
    #[command(flatten)]
    pipeline: PipelineArgs,
}

impl CliCommand for SignIpa {
    fn as_config(&self) -> Result<Option<Config>, ResignError> {
        Ok(Some(self.pipeline.as_config()))
    }

    fn run(&self, context: &Context) -> Result<(), ResignError> {
        let resigner = context.resigner()?;
        let delivery = resigner.sign_ipa(&self.pipeline.input_path)?;

        println!("{}", delivery.display());

        Ok(())
    }
}

#[derive(Parser)]
struct ListIdentities {}

impl CliCommand for ListIdentities {
    fn run(&self, context: &Context) -> Result<(), ResignError> {
        let store = SecurityIdentityStore::new(context.config.tools.security());

        for identity in store.valid_identities()? {
            println!("{}", identity);
        }

        Ok(())
    }
}

#[derive(Parser)]
struct ResolveIdentity {
    /// Text to search for in the descriptions of valid identities
    value: String,
}

impl CliCommand for ResolveIdentity {
    fn run(&self, context: &Context) -> Result<(), ResignError> {
        let store = SecurityIdentityStore::new(context.config.tools.security());

        let identifier = resolve_identifier_for_value(&store, &self.value)?
            .ok_or_else(|| ResignError::NoMatchingIdentity(self.value.clone()))?;

        println!("{}", identifier);

        Ok(())
    }
}

#[derive(Subcommand)]
enum Subcommands {
    /// Print the code signing identities the host considers valid
    ListIdentities(ListIdentities),

    /// Print the identifier of the first valid identity containing a value
    ResolveIdentity(ResolveIdentity),

    /// Re-sign the .ipa packages in a zip archive
    #[command(long_about = SIGN_IPA_ABOUT)]
    SignIpa(SignIpa),

    /// Export and sign the .xcarchive bundles in a zip archive
    #[command(long_about = SIGN_XCARCHIVE_ABOUT)]
    SignXcarchive(SignXcarchive),
}

impl Subcommands {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Subcommands::ListIdentities(c) => c,
            Subcommands::ResolveIdentity(c) => c,
            Subcommands::SignIpa(c) => c,
            Subcommands::SignXcarchive(c) => c,
        }
    }
}

/// Re-sign Apple application archives with identities from the host keychain
#[derive(Parser)]
#[command(author, version, arg_required_else_help = true)]
struct Cli {
    /// Explicit configuration file to load.
    ///
    /// If provided, the default configuration files are not loaded, even
    /// if they exist.
    ///
    /// Can be specified multiple times. Files are loaded/merged in the order
    /// given.
    ///
    /// The special value `/dev/null` can be used to specify an empty/null
    /// config file. It can be used to short-circuit loading of default config
    /// files.
    #[arg(short = 'C', long = "config-file", global = true)]
    config_path: Vec<PathBuf>,

    /// Configuration profile to load.
    ///
    /// If not specified, the implicit "default" profile is loaded.
    #[arg(short = 'P', long, global = true)]
    profile: Option<String>,

    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

impl Cli {
    pub fn config_builder(&self) -> ConfigBuilder {
        let mut config = ConfigBuilder::default();

        config = if self.config_path.is_empty() {
            config.with_user_config_file().with_cwd_config_file()
        } else {
            for path in &self.config_path {
                if path.display().to_string() == "/dev/null" {
                    break;
                }

                config = config.toml_file(path);
            }

            config
        };

        if let Some(profile) = &self.profile {
            config = config.profile(profile.to_string());
        }

        // Environment variables override everything.
        config = config.with_env_prefix();

        config
    }
}

pub fn main_impl() -> Result<(), ResignError> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    let mut config_builder = cli.config_builder();

    let command = cli.command.as_cli_command();

    if let Some(config) = command.as_config()? {
        config_builder = config_builder.with_config_struct(config);
    }

    let config = config_builder.config()?;

    let context = Context { config };

    command.run(&context)
}
