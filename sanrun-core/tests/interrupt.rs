//! Termination signals during a run. Signal dispositions are process-wide,
//! so every test here holds `SERIAL`.

#![cfg(unix)]

use camino::Utf8PathBuf;
use pretty_assertions::assert_eq;
use sanrun_core::adapters::{FsFilePort, ProcessTestRunner};
use sanrun_core::locator::Candidate;
use sanrun_core::ports::{CompilerProbe, ObjectBuilder, TestRunner};
use sanrun_core::signals::{self, ForwardGuard};
use sanrun_core::{
    CompilerProfile, HarnessError, Orchestrator, Phase, Platform, RunResult, RunSettings,
    RunState, TestCommand,
};
use std::cell::Cell;
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

const LIB_JSON: &str = "{\n  \"native-stub\": [\"stub.c\"],\n  \"link\": {\n    \"native\": {\n      \"cc-link-flags\": \"-lm\"\n    }\n  }\n}\n";
const RUNTIME: &[u8] = b"\x7fELF-runtime-with-allocator";

struct AcceptAll;

impl CompilerProbe for AcceptAll {
    fn probe(&self, _candidate: &Candidate) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds the empty object, optionally receiving SIGTERM while doing so.
struct Builder {
    raise: bool,
}

impl ObjectBuilder for Builder {
    fn empty_object(&self, _profile: &CompilerProfile) -> anyhow::Result<Vec<u8>> {
        if self.raise {
            // SAFETY: raise(3) on the calling thread.
            unsafe {
                libc::raise(libc::SIGTERM);
            }
        }
        Ok(b"\x7fELF-empty".to_vec())
    }
}

#[derive(Default)]
struct CountingRunner {
    calls: Cell<usize>,
}

impl TestRunner for CountingRunner {
    fn run(&self, _command: &TestCommand) -> anyhow::Result<RunResult> {
        self.calls.set(self.calls.get() + 1);
        anyhow::bail!("test command should not start")
    }
}

struct Repo {
    _td: TempDir,
    root: Utf8PathBuf,
    lib: Utf8PathBuf,
    runtime: Utf8PathBuf,
}

fn repo() -> Repo {
    let td = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(td.path().canonicalize().unwrap()).unwrap();
    fs::create_dir_all(root.join("src/lib")).unwrap();
    fs::create_dir_all(root.join("moon-home/lib")).unwrap();
    let lib = root.join("src/lib/moon.pkg.json");
    let runtime = root.join("moon-home/lib/libmoonbitrun.o");
    fs::write(&lib, LIB_JSON).unwrap();
    fs::write(&runtime, RUNTIME).unwrap();
    fs::write(root.join("ar"), b"").unwrap();
    Repo {
        _td: td,
        root,
        lib,
        runtime,
    }
}

impl Repo {
    fn settings(&self, command: &[&str]) -> RunSettings {
        RunSettings {
            repo_root: self.root.clone(),
            command: command.iter().map(|s| s.to_string()).collect(),
            cc: Some(Utf8PathBuf::from("/usr/bin/cc")),
            ar: Some(self.root.join("ar")),
            runtime_object: Some(self.runtime.clone()),
            platform: Platform::Other,
            ..RunSettings::default()
        }
    }

    fn assert_pristine(&self) {
        assert_eq!(fs::read_to_string(&self.lib).unwrap(), LIB_JSON);
        assert_eq!(fs::read(&self.runtime).unwrap(), RUNTIME);
    }
}

fn current(sig: libc::c_int) -> libc::sighandler_t {
    // SAFETY: reads the disposition by swapping it out and straight back.
    unsafe {
        let prev = libc::signal(sig, libc::SIG_DFL);
        libc::signal(sig, prev);
        prev
    }
}

#[test]
fn nested_guards_restore_disposition_once() {
    let _serial = serial();
    let before = current(libc::SIGHUP);
    let outer = ForwardGuard::install();
    {
        let _inner = ForwardGuard::install();
    }
    assert_ne!(current(libc::SIGHUP), before);
    drop(outer);
    assert_eq!(current(libc::SIGHUP), before);
}

#[test]
fn signal_is_pending_only_while_guarded() {
    let _serial = serial();
    let guard = ForwardGuard::install();
    // SAFETY: the forwarding handler is installed and no child is registered.
    unsafe {
        libc::raise(libc::SIGHUP);
    }
    assert_eq!(signals::pending(), Some(libc::SIGHUP));
    drop(guard);
    assert_eq!(signals::pending(), None);
}

#[test]
fn signal_while_patched_stops_before_tests_and_restores() {
    let _serial = serial();
    let repo = repo();
    let runner = CountingRunner::default();
    let builder = Builder { raise: true };
    let mut orch = Orchestrator::new(&AcceptAll, &FsFilePort, &builder, &runner);

    let err = orch.run(&repo.settings(&["moon", "test"])).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Interrupted {
            signal: libc::SIGTERM,
            phase: Phase::Run
        }
    ));
    assert_eq!(err.exit_code(), 143);
    assert_eq!(runner.calls.get(), 0);
    repo.assert_pristine();

    let states = orch.states();
    assert!(states.contains(&RunState::AllocatorSuppressed));
    assert!(!states.contains(&RunState::Running));
    assert_eq!(states.last(), Some(&RunState::Restored));
}

#[test]
fn signal_during_tests_reaches_child_and_files_are_restored() {
    let _serial = serial();
    let repo = repo();
    let builder = Builder { raise: false };
    let mut orch = Orchestrator::new(&AcceptAll, &FsFilePort, &builder, &ProcessTestRunner);

    let outcome = orch
        .run(&repo.settings(&["sh", "-c", "kill -TERM $PPID; sleep 1"]))
        .unwrap();
    assert_eq!(outcome.result.signal, Some(libc::SIGTERM));
    assert_eq!(outcome.result.exit_code, 143);
    assert!(outcome.restore.is_clean());
    repo.assert_pristine();
}
