//! Child process helpers for the external tools the archiver drives
//! (`yt-dlp`, `ffmpeg`).
//!
//! Every command is created without a console window on Windows and is
//! killed when its handle is dropped, so a cancelled run never leaves an
//! orphaned child behind.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Suppress the console window a child process would open on Windows.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Probe an executable by running `<program> <version_arg>` and returning
/// the first line of its stdout.
///
/// Returns `None` when the program cannot be started or prints nothing.
pub fn probe_version(program: impl AsRef<OsStr>, version_arg: &str) -> Option<String> {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window().arg(version_arg);
    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
        .filter(|l| !l.is_empty())
}

#[cfg(feature = "tokio")]
mod runner {
    use std::ffi::OsStr;
    use std::process::Stdio;

    use tokio_util::sync::CancellationToken;
    use tracing::{debug, warn};

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) -> &mut Self {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
            self
        }
    }

    /// Create a `tokio::process::Command` that has no console window and is
    /// killed when dropped.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window().kill_on_drop(true);
        cmd
    }

    /// Result of [`run_cancellable`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProcessOutcome {
        /// The process ran to completion.
        Exited {
            /// Exit code, `None` when terminated by a signal.
            code: Option<i32>,
            stdout: String,
            stderr: String,
        },
        /// The token fired first; the child was killed.
        Cancelled,
    }

    impl ProcessOutcome {
        /// Whether the process exited with code 0.
        pub fn success(&self) -> bool {
            matches!(self, Self::Exited { code: Some(0), .. })
        }

        /// Captured stdout, empty for a cancelled run.
        pub fn stdout(&self) -> &str {
            match self {
                Self::Exited { stdout, .. } => stdout,
                Self::Cancelled => "",
            }
        }

        /// Captured stderr, empty for a cancelled run.
        pub fn stderr(&self) -> &str {
            match self {
                Self::Exited { stderr, .. } => stderr,
                Self::Cancelled => "",
            }
        }
    }

    /// Run a command to completion, capturing stdout and stderr, unless the
    /// cancellation token fires first.
    ///
    /// On cancellation the child is killed (the command is forced to
    /// `kill_on_drop`) and [`ProcessOutcome::Cancelled`] is returned.
    pub async fn run_cancellable(
        mut cmd: tokio::process::Command,
        cancellation_token: &CancellationToken,
    ) -> std::io::Result<ProcessOutcome> {
        if cancellation_token.is_cancelled() {
            return Ok(ProcessOutcome::Cancelled);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let pid = child.id();
        debug!(?pid, "Spawned child process");

        tokio::select! {
            _ = cancellation_token.cancelled() => {
                // Dropping the wait future drops the child, which kills it.
                debug!(?pid, "Child process cancelled");
                Ok(ProcessOutcome::Cancelled)
            }
            output = child.wait_with_output() => {
                let output = output?;
                let code = output.status.code();
                if code != Some(0) {
                    warn!(?pid, ?code, "Process exited with non-zero status");
                }
                Ok(ProcessOutcome::Exited {
                    code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}

#[cfg(feature = "tokio")]
pub use runner::{ProcessOutcome, run_cancellable, tokio_command};
