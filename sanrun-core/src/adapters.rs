//! Default filesystem- and process-backed port implementations.

use crate::locator::{Candidate, CompilerProfile, ToolchainFamily};
use crate::ports::{CompilerProbe, FilePort, ObjectBuilder, TestRunner};
use crate::run::{RunOutput, RunResult, TestCommand};
use crate::signals;
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

const PROBE_SOURCE: &str = "int main(void) { return 0; }\n";
const EMPTY_SOURCE: &str = "/* replaces the bundled runtime allocator */\n";

fn scratch_dir() -> anyhow::Result<(tempfile::TempDir, Utf8PathBuf)> {
    let td = tempfile::tempdir().context("create scratch dir")?;
    let dir = Utf8PathBuf::from_path_buf(td.path().to_path_buf())
        .map_err(|p| anyhow::anyhow!("non-UTF-8 temp dir: {}", p.display()))?;
    Ok((td, dir))
}

/// Run `compiler args...` in `cwd`; any non-zero exit is an error carrying stderr.
fn compile(compiler: &Utf8Path, args: &[String], cwd: &Utf8Path) -> anyhow::Result<()> {
    let out = Command::new(compiler.as_std_path())
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("spawn {compiler}"))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        anyhow::bail!("{compiler} exited with {}: {}", out.status, stderr.trim());
    }
    Ok(())
}

/// Compiles and links a trivial program with the instrumentation flag.
#[derive(Debug, Clone, Default)]
pub struct CcCompilerProbe;

impl CompilerProbe for CcCompilerProbe {
    fn probe(&self, candidate: &Candidate) -> anyhow::Result<()> {
        if !candidate.compiler.is_file() {
            anyhow::bail!("{} does not exist", candidate.compiler);
        }
        let (_td, dir) = scratch_dir()?;
        let src = dir.join("probe.c");
        let out = dir.join(if candidate.family == ToolchainFamily::Msvc {
            "probe.exe"
        } else {
            "probe"
        });
        fs::write(&src, PROBE_SOURCE)?;
        compile(&candidate.compiler, &candidate.family.probe_args(&src, &out), &dir)?;
        debug!(compiler = %candidate.compiler, "probe compiled");
        Ok(())
    }
}

/// Builds an object file with no symbols using the selected compiler.
#[derive(Debug, Clone, Default)]
pub struct CcObjectBuilder;

impl ObjectBuilder for CcObjectBuilder {
    fn empty_object(&self, profile: &CompilerProfile) -> anyhow::Result<Vec<u8>> {
        let (_td, dir) = scratch_dir()?;
        let src = dir.join("empty.c");
        let obj = dir.join(if profile.family == ToolchainFamily::Msvc {
            "empty.obj"
        } else {
            "empty.o"
        });
        fs::write(&src, EMPTY_SOURCE)?;
        compile(&profile.compiler, &profile.family.object_args(&src, &obj), &dir)?;
        Ok(fs::read(&obj)?)
    }
}

/// Plain filesystem reads and writes.
#[derive(Debug, Clone, Default)]
pub struct FsFilePort;

impl FilePort for FsFilePort {
    fn read_file(&self, path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("read {path}"))
    }

    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        fs::write(path, contents).with_context(|| format!("write {path}"))
    }
}

/// Spawns the test command and waits for it. Signals caught by a live
/// [`ForwardGuard`](crate::signals::ForwardGuard) are re-sent to the child.
#[derive(Debug, Clone, Default)]
pub struct ProcessTestRunner;

impl TestRunner for ProcessTestRunner {
    fn run(&self, command: &TestCommand) -> anyhow::Result<RunResult> {
        let (program, args) = command
            .argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty test command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&command.cwd).envs(&command.env);

        let output = match &command.log {
            Some(log) => {
                let (file, _) = fs::File::create(log)?.into_parts();
                let err = file.try_clone().with_context(|| format!("dup {log}"))?;
                cmd.stdout(file).stderr(err);
                RunOutput::LogFile(log.clone())
            }
            None => RunOutput::Inherited,
        };

        info!(argv = ?command.argv, cwd = %command.cwd, "running tests");
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {program}"))?;
        signals::set_child(child.id());
        let status = child.wait().with_context(|| format!("wait for {program}"));
        signals::clear_child();
        let status = status?;

        let result = RunResult::from_status(status, started.elapsed(), output);
        info!(
            exit_code = result.exit_code,
            signal = ?result.signal,
            duration_ms = result.duration.as_millis() as u64,
            "tests finished"
        );
        Ok(result)
    }
}
