// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Re-signing of Apple application archives.
//!
//! This crate takes zip archives uploaded by a build system and turns them
//! into delivery archives holding applications signed with identities from
//! the signing host's keychain. The heavy lifting is done by Apple's own
//! tools (`xcodebuild`, `codesign` and `security`), which this crate drives
//! as subprocesses.
//!
//! Two flows are supported:
//!
//! * `.xcarchive` bundles are exported with `xcodebuild -exportArchive`
//!   using an `options.plist` shipped alongside them. Exports run
//!   concurrently. (See [Resigner::sign_xcarchive].)
//! * `.ipa` packages have the authority of their existing signature matched
//!   against the identities the host considers valid and are re-signed with
//!   `codesign`. (See [Resigner::sign_ipa].)
//!
//! Every run gets its own [Workspace] directory. External collaborators sit
//! behind the [Archiver], [Exporter], [CodeSigner], [IdentityStore] and
//! [IdGenerator] traits so they can be swapped out.

mod archive;
pub use archive::*;
pub mod cli;
mod credentials;
pub use credentials::*;
mod error;
pub use error::*;
mod export;
pub use export::*;
mod identity;
pub use identity::*;
mod locate;
pub use locate::*;
mod package;
pub use package::*;
mod pipeline;
pub use pipeline::*;
mod resign;
pub use resign::*;
mod tool;
pub use tool::*;
mod workspace;
pub use workspace::*;
