//! External test invocation types.

use crate::error::HARNESS_EXIT_CODE;
use camino::Utf8PathBuf;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::time::Duration;

/// Default test command: MoonBit's native test runner, verbose.
pub const DEFAULT_TEST_COMMAND: &[&str] = &["moon", "test", "--target", "native", "-v"];

/// A fully constructed external test invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub argv: Vec<String>,
    pub cwd: Utf8PathBuf,
    /// Variables added to the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Redirect stdout and stderr into this file instead of inheriting them.
    pub log: Option<Utf8PathBuf>,
}

/// Where the test process wrote its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum RunOutput {
    Inherited,
    LogFile(Utf8PathBuf),
}

/// Outcome of the external test process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Process exit code; `128 + n` when killed by signal `n`.
    pub exit_code: i32,
    pub signal: Option<i32>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub output: RunOutput,
}

impl RunResult {
    pub fn from_status(status: ExitStatus, duration: Duration, output: RunOutput) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt as _;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal: Option<i32> = None;

        let exit_code = match status.code() {
            Some(code) => code,
            None => signal.map(|s| 128 + s).unwrap_or(1),
        };
        Self {
            exit_code,
            signal,
            duration,
            output,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The test command exited with the code the harness reserves for its own
    /// failures; callers cannot tell the two apart from the status alone.
    pub fn collides_with_harness_exit(&self) -> bool {
        self.exit_code == i32::from(HARNESS_EXIT_CODE)
    }

    /// Exit code clamped into the range a process can report.
    pub fn process_exit_code(&self) -> u8 {
        u8::try_from(self.exit_code).unwrap_or(1)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
