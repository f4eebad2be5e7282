//! Port traits abstracting all I/O away from the orchestrator.

use crate::locator::{Candidate, CompilerProfile};
use crate::run::{RunResult, TestCommand};
use camino::Utf8Path;

/// Tries a candidate compiler against an instrumented probe program.
pub trait CompilerProbe {
    /// `Ok(())` when the candidate compiled the probe.
    fn probe(&self, candidate: &Candidate) -> anyhow::Result<()>;
}

/// Byte-level file access used by the snapshot ledger.
pub trait FilePort {
    fn read_file(&self, path: &Utf8Path) -> anyhow::Result<Vec<u8>>;
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()>;
}

/// Produces the inert object that replaces the runtime allocator.
pub trait ObjectBuilder {
    /// An object file without symbols, built by `profile`'s compiler.
    fn empty_object(&self, profile: &CompilerProfile) -> anyhow::Result<Vec<u8>>;
}

/// Runs the external test command to completion.
pub trait TestRunner {
    fn run(&self, command: &TestCommand) -> anyhow::Result<RunResult>;
}
