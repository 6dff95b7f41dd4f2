// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Invocation of external command line tools.
//!
//! Every program this crate drives (`xcodebuild`, `codesign`, `security`)
//! is spawned through [Tool]. It captures output, converts spawn failures
//! and unsuccessful exits into [ResignError] values and keeps secrets out
//! of the log.

use {
    crate::error::ResignError,
    log::debug,
    std::{
        ffi::OsStr,
        process::{Command, ExitStatus},
    },
};

/// Captured result of running a [Tool].
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        let mut s = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }

        s
    }
}

/// An external program invocation under construction.
pub struct Tool {
    name: String,
    command: Command,
    display_args: Vec<String>,
}

impl Tool {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        let program = program.as_ref();

        Self {
            name: program.to_string_lossy().to_string(),
            command: Command::new(program),
            display_args: vec![],
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        let arg = arg.as_ref();
        self.display_args.push(arg.to_string_lossy().to_string());
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Add an argument whose value must not be logged.
    pub fn secret_arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.display_args.push("<redacted>".into());
        self.command.arg(arg);
        self
    }

    /// Run the program to completion without interpreting its exit status.
    pub fn output(&mut self) -> Result<ToolOutput, ResignError> {
        debug!("running {} {}", self.name, self.display_args.join(" "));

        let output = self
            .command
            .output()
            .map_err(|source| ResignError::ToolSpawn {
                tool: self.name.clone(),
                source,
            })?;

        let output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!("{} exited with {}", self.name, output.status);

        Ok(output)
    }

    /// Run the program and require a successful exit.
    pub fn run(&mut self) -> Result<ToolOutput, ResignError> {
        let output = self.output()?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(ResignError::ToolInvocation {
                tool: self.name.clone(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    #[test]
    fn captures_both_streams() -> Result<(), ResignError> {
        let output = Tool::new("sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2")
            .run()?;

        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.combined(), "out\nerr\n");

        Ok(())
    }

    #[test]
    fn unsuccessful_exit() {
        let res = Tool::new("sh").args(["-c", "echo nope 1>&2; exit 3"]).run();

        match res {
            Err(ResignError::ToolInvocation { tool, status, stderr }) => {
                assert_eq!(tool, "sh");
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.stdout)),
        }
    }

    #[test]
    fn output_ignores_status() -> Result<(), ResignError> {
        let output = Tool::new("sh").args(["-c", "echo partial; exit 1"]).output()?;
        assert!(!output.status.success());
        assert_eq!(output.stdout, "partial\n");

        Ok(())
    }

    #[test]
    fn missing_program() {
        assert!(matches!(
            Tool::new("/nonexistent/apple-resign-tool").output(),
            Err(ResignError::ToolSpawn { .. })
        ));
    }
}
