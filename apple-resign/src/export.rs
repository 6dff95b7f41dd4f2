// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exporting signed applications from `.xcarchive` bundles.
//!
//! Exports are delegated to `xcodebuild -exportArchive`. Its textual output
//! is the only signal of what happened, so the success marker and the shape
//! of the first output line are treated as a fixed contract with the tool.

use {
    crate::{error::ResignError, tool::Tool, workspace::Workspace},
    log::{debug, info, warn},
    rayon::prelude::*,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
    },
};

/// Literal the export tool prints when an export succeeded.
pub const EXPORT_SUCCEEDED_MARKER: &str = "EXPORT SUCCEEDED";

/// Number of whitespace delimited tokens in the first line of a successful
/// export report. e.g. `Exported App to: /path/to/output`.
pub const EXPORT_REPORT_TOKENS: usize = 4;

/// Interface to the archive export tool.
pub trait Exporter: Send + Sync {
    /// Export `archive` into `export_dir` as instructed by `options`.
    ///
    /// Returns the tool's textual output whether or not the export succeeded.
    /// Errors are reserved for failing to run the tool at all.
    fn export(
        &self,
        archive: &Path,
        export_dir: &Path,
        options: &Path,
    ) -> Result<String, ResignError>;
}

/// [Exporter] backed by `xcodebuild`.
#[derive(Clone, Debug)]
pub struct XcodebuildExporter {
    program: String,
}

impl Default for XcodebuildExporter {
    fn default() -> Self {
        Self::new("xcodebuild")
    }
}

impl XcodebuildExporter {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Exporter for XcodebuildExporter {
    fn export(
        &self,
        archive: &Path,
        export_dir: &Path,
        options: &Path,
    ) -> Result<String, ResignError> {
        let output = Tool::new(&self.program)
            .arg("-exportArchive")
            .arg("-archivePath")
            .arg(archive)
            .arg("-exportPath")
            .arg(export_dir)
            .arg("-exportOptionsPlist")
            .arg(options)
            .output()?;

        Ok(output.combined())
    }
}

/// Interpret export tool output.
///
/// Returns `Ok(None)` if the output lacks the success marker. On success the
/// first line must have exactly [EXPORT_REPORT_TOKENS] tokens, the last of
/// which is the produced artifact path.
pub fn parse_export_output(output: &str) -> Result<Option<PathBuf>, ResignError> {
    if !output.contains(EXPORT_SUCCEEDED_MARKER) {
        return Ok(None);
    }

    let first_line = output.lines().next().unwrap_or_default();
    let tokens = first_line.split_whitespace().collect::<Vec<_>>();

    if tokens.len() != EXPORT_REPORT_TOKENS {
        return Err(ResignError::UnexpectedToolOutput(format!(
            "expected {} tokens in first line of successful export; got {}: {}",
            EXPORT_REPORT_TOKENS,
            tokens.len(),
            first_line
        )));
    }

    Ok(Some(PathBuf::from(tokens[EXPORT_REPORT_TOKENS - 1])))
}

/// Validate and describe the export options descriptor.
///
/// The descriptor must be a plist dictionary. Its `method` and `teamID` keys
/// are logged when present.
pub fn check_export_options(path: &Path) -> Result<(), ResignError> {
    let missing = |message: String| ResignError::MissingExportOptions {
        path: path.to_path_buf(),
        message,
    };

    if !path.is_file() {
        return Err(missing("file does not exist".into()));
    }

    let value = plist::Value::from_file(path).map_err(|e| missing(e.to_string()))?;
    let dict = value
        .as_dictionary()
        .ok_or_else(|| missing("not a dictionary".into()))?;

    for key in ["method", "teamID"] {
        if let Some(v) = dict.get(key).and_then(|v| v.as_string()) {
            info!("export options {}: {}", key, v);
        }
    }

    Ok(())
}

/// Directory names for each bundle's export output.
///
/// A bundle exports into a directory named after its file stem. Stems shared
/// by several bundles, compared case-insensitively, get the bundle's index
/// appended so concurrent exports never share a directory.
fn export_dir_names(bundles: &[PathBuf]) -> Vec<String> {
    let stems = bundles
        .iter()
        .map(|archive| {
            archive
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "export".into())
        })
        .collect::<Vec<_>>();

    let mut counts = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.to_lowercase()).or_insert(0usize) += 1;
    }

    stems
        .into_iter()
        .enumerate()
        .map(|(index, stem)| {
            if counts[&stem.to_lowercase()] > 1 {
                format!("{}-{}", stem, index)
            } else {
                stem
            }
        })
        .collect()
}

/// Export every `.xcarchive` in `bundles` concurrently.
///
/// Each bundle exports into its own directory under `<workspace>/signed`
/// using the workspace's shared export options. Exports run on a dedicated
/// thread pool with one thread per bundle. All exports run to
/// completion before results are examined. Bundles whose export did not
/// succeed are skipped. Failing to run the tool, or a malformed success
/// report, fails the batch.
///
/// Returns the produced artifact paths. Order is not meaningful.
pub fn export_xcarchives(
    workspace: &Workspace,
    bundles: &[PathBuf],
    exporter: &dyn Exporter,
) -> Result<Vec<PathBuf>, ResignError> {
    let options = workspace.export_options_path();
    check_export_options(&options)?;

    let signed_dir = workspace.signed_dir();
    std::fs::create_dir_all(&signed_dir)?;

    warn!("exporting {} archives", bundles.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(bundles.len().max(1))
        .build()?;

    let jobs = bundles
        .iter()
        .zip(export_dir_names(bundles))
        .map(|(archive, name)| (archive, signed_dir.join(name)))
        .collect::<Vec<_>>();

    let results = pool.install(|| {
        jobs.par_iter()
            .map(|(archive, export_dir)| {
                info!(
                    "exporting {} to {}",
                    archive.display(),
                    export_dir.display()
                );

                exporter.export(archive, export_dir, &options)
            })
            .collect::<Vec<_>>()
    });

    let mut produced = vec![];

    for (archive, result) in bundles.iter().zip(results) {
        match parse_export_output(&result?)? {
            Some(path) => {
                warn!("exported {} to {}", archive.display(), path.display());
                produced.push(path);
            }
            None => {
                debug!("export of {} did not succeed; skipping", archive.display());
            }
        }
    }

    Ok(produced)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::workspace::SequentialIdGenerator,
        indoc::indoc,
        std::sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    const EXPORT_OPTIONS: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <plist version="1.0">
        <dict>
            <key>method</key>
            <string>app-store</string>
        </dict>
        </plist>
    "#};

    #[test]
    fn parse_success() -> Result<(), ResignError> {
        let output = indoc! {"
            Exported App to: /tmp/ws/signed/App
            ** EXPORT SUCCEEDED **
        "};

        assert_eq!(
            parse_export_output(output)?,
            Some(PathBuf::from("/tmp/ws/signed/App"))
        );

        Ok(())
    }

    #[test]
    fn parse_failure_is_not_an_error() -> Result<(), ResignError> {
        let output = indoc! {"
            error: exportArchive: No signing certificate found
            ** EXPORT FAILED **
        "};

        assert_eq!(parse_export_output(output)?, None);
        assert_eq!(parse_export_output("")?, None);

        Ok(())
    }

    #[test]
    fn parse_malformed_success() {
        for output in [
            "Exported to: /tmp/out\n** EXPORT SUCCEEDED **\n",
            "Exported My App to: /tmp/out\n** EXPORT SUCCEEDED **\n",
            "EXPORT SUCCEEDED\n",
        ] {
            assert!(matches!(
                parse_export_output(output),
                Err(ResignError::UnexpectedToolOutput(_))
            ));
        }
    }

    #[test]
    fn export_options_validation() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("options.plist");

        assert!(matches!(
            check_export_options(&path),
            Err(ResignError::MissingExportOptions { .. })
        ));

        std::fs::write(&path, b"garbage")?;
        assert!(matches!(
            check_export_options(&path),
            Err(ResignError::MissingExportOptions { .. })
        ));

        std::fs::write(
            &path,
            indoc! {r#"
                <?xml version="1.0" encoding="UTF-8"?>
                <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
                <plist version="1.0">
                <dict>
                    <key>method</key>
                    <string>app-store</string>
                    <key>teamID</key>
                    <string>ABCDE12345</string>
                </dict>
                </plist>
            "#},
        )?;
        check_export_options(&path)?;

        Ok(())
    }

    #[test]
    fn export_dir_naming() {
        assert_eq!(
            export_dir_names(&[
                PathBuf::from("/ws/A.xcarchive"),
                PathBuf::from("/ws/My App.xcarchive"),
            ]),
            vec!["A", "My App"]
        );

        assert_eq!(
            export_dir_names(&[
                PathBuf::from("/ws/x/A.xcarchive"),
                PathBuf::from("/ws/B.xcarchive"),
                PathBuf::from("/ws/y/A.xcarchive"),
                PathBuf::from("/ws/a.XCArchive"),
            ]),
            vec!["A-0", "B", "A-2", "a-3"]
        );
    }

    /// Records export directories and how many exports overlapped.
    #[derive(Default)]
    struct RecordingExporter {
        export_dirs: Mutex<Vec<PathBuf>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl Exporter for RecordingExporter {
        fn export(
            &self,
            _archive: &Path,
            export_dir: &Path,
            _options: &Path,
        ) -> Result<String, ResignError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.export_dirs.lock().unwrap().push(export_dir.to_path_buf());

            std::thread::sleep(std::time::Duration::from_millis(300));
            self.active.fetch_sub(1, Ordering::SeqCst);

            Ok("** EXPORT FAILED **\n".into())
        }
    }

    fn workspace_with_options(td: &Path) -> Result<Workspace, ResignError> {
        let ws = Workspace::create(td, &SequentialIdGenerator::new("ws"))?;
        std::fs::write(ws.export_options_path(), EXPORT_OPTIONS)?;

        Ok(ws)
    }

    #[test]
    fn same_stem_bundles_export_to_distinct_directories() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;
        let ws = workspace_with_options(td.path())?;

        let exporter = RecordingExporter::default();
        let produced = export_xcarchives(
            &ws,
            &[
                ws.path().join("x/A.xcarchive"),
                ws.path().join("y/A.xcarchive"),
            ],
            &exporter,
        )?;
        assert!(produced.is_empty());

        let mut dirs = exporter.export_dirs.lock().unwrap().clone();
        dirs.sort();
        assert_eq!(
            dirs,
            vec![ws.signed_dir().join("A-0"), ws.signed_dir().join("A-1")]
        );

        Ok(())
    }

    #[test]
    fn all_exports_run_at_once() -> Result<(), ResignError> {
        let td = tempfile::tempdir()?;
        let ws = workspace_with_options(td.path())?;

        let bundles = (0..16)
            .map(|i| ws.path().join(format!("App{}.xcarchive", i)))
            .collect::<Vec<_>>();

        let exporter = RecordingExporter::default();
        export_xcarchives(&ws, &bundles, &exporter)?;

        assert_eq!(exporter.export_dirs.lock().unwrap().len(), 16);
        assert_eq!(exporter.max_active.load(Ordering::SeqCst), 16);

        Ok(())
    }
}
