//! Run orchestration.
//!
//! A run has two halves. [`Orchestrator::plan`] resolves manifests, checks
//! the patch set, locates a compiler and builds the test environment; it never
//! writes. [`Orchestrator::execute`] snapshots, patches, suppresses the runtime
//! allocator and runs the tests, then restores everything whatever happened,
//! including a panic in the forward phase. From the snapshot until the
//! restore, SIGINT, SIGTERM and SIGHUP are caught: they go to the test
//! process when one is running, and otherwise stop the run before the next
//! step.

use crate::allocator::{AllocatorOverride, default_runtime_object};
use crate::env::{SUPPRESSIONS_FILE_NAME, sanitizer_env, validate_suppressions};
use crate::error::{HarnessError, HarnessResult, Phase};
use crate::ledger::{RestoreReport, SnapshotLedger};
use crate::locator::{self, CompilerProfile};
use crate::ports::{CompilerProbe, FilePort, ObjectBuilder, TestRunner};
use crate::run::{RunResult, TestCommand};
use crate::settings::RunSettings;
use crate::signals::{self, ForwardGuard};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use sanrun_manifest::{Manifest, PatchMode, PatchSet, discover_native, patch, render_diff};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    CompilerResolved,
    Snapshotted,
    Patched,
    AllocatorSuppressed,
    Running,
    Completed,
    Failed,
    Restored,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Init => "init",
            RunState::CompilerResolved => "compiler-resolved",
            RunState::Snapshotted => "snapshotted",
            RunState::Patched => "patched",
            RunState::AllocatorSuppressed => "allocator-suppressed",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Restored => "restored",
            RunState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Everything decided before the first write.
#[derive(Debug, Clone)]
pub struct Plan {
    pub repo_root: Utf8PathBuf,
    pub patch_set: PatchSet,
    pub profile: CompilerProfile,
    pub command: TestCommand,
    /// `None` when the allocator override is disabled.
    pub runtime_object: Option<Utf8PathBuf>,
}

impl Plan {
    /// Diffs the run would apply, computed in memory.
    pub fn preview(&self) -> HarnessResult<Vec<String>> {
        let flags = self.profile.flags();
        let mut diffs = Vec::new();
        for m in self.patch_set.manifests() {
            let mut m = m.clone();
            patch(&mut m, PatchMode::Enable, &flags)
                .map_err(|e| HarnessError::runtime(Phase::Patch, e.into()))?;
            let diff = render_diff(&m);
            if !diff.is_empty() {
                diffs.push(diff);
            }
        }
        Ok(diffs)
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    pub profile: CompilerProfile,
    pub patched: Vec<Utf8PathBuf>,
    pub restore: RestoreReport,
    pub states: Vec<RunState>,
}

/// Canonical repository root, or a config error.
pub fn repo_root(settings: &RunSettings) -> HarnessResult<Utf8PathBuf> {
    let root = fs::canonicalize(&settings.repo_root)
        .map_err(|e| HarnessError::Config(format!("repo root {}: {e}", settings.repo_root)))?;
    let root = Utf8PathBuf::from_path_buf(root)
        .map_err(|p| HarnessError::Config(format!("non-UTF-8 repo root: {}", p.display())))?;
    if !root.is_dir() {
        return Err(HarnessError::Config(format!("repo root is not a directory: {root}")));
    }
    Ok(root)
}

/// Load the requested manifests (or every native one) and check the
/// selection for consistency. Reads only.
pub fn resolve_patch_set(root: &Utf8Path, requested: &[Utf8PathBuf]) -> HarnessResult<PatchSet> {
    let discovered = discover_native(root)?;
    let selected = if requested.is_empty() {
        discovered.clone()
    } else {
        requested
            .iter()
            .map(|p| {
                let path = if p.is_absolute() { p.clone() } else { root.join(p) };
                Manifest::load(&path)
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    let set = PatchSet::select(selected, &discovered)?;
    if set.is_empty() {
        return Err(HarnessError::Config(format!(
            "no manifest under {root} declares native sources or link flags"
        )));
    }
    Ok(set)
}

fn interrupted(phase: Phase) -> HarnessResult<()> {
    match signals::pending() {
        Some(signal) => {
            warn!(signal, phase = %phase, "interrupted; restoring");
            Err(HarnessError::Interrupted { signal, phase })
        }
        None => Ok(()),
    }
}

pub struct Orchestrator<'a> {
    probe: &'a dyn CompilerProbe,
    files: &'a dyn FilePort,
    builder: &'a dyn ObjectBuilder,
    runner: &'a dyn TestRunner,
    states: Vec<RunState>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        probe: &'a dyn CompilerProbe,
        files: &'a dyn FilePort,
        builder: &'a dyn ObjectBuilder,
        runner: &'a dyn TestRunner,
    ) -> Self {
        Self {
            probe,
            files,
            builder,
            runner,
            states: Vec::new(),
        }
    }

    /// States entered so far, in order.
    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    fn enter(&mut self, state: RunState) {
        info!(state = %state, "run state");
        self.states.push(state);
    }

    /// Decide everything a run needs without touching a file.
    pub fn plan(&mut self, settings: &RunSettings) -> HarnessResult<Plan> {
        self.enter(RunState::Init);

        if settings.command.is_empty() {
            return Err(HarnessError::Config("test command is empty".to_string()));
        }
        if let Some(p) = &settings.suppressions
            && !p.is_absolute()
        {
            return Err(HarnessError::Config(format!(
                "suppressions path must be absolute: {p}"
            )));
        }

        let root = repo_root(settings)?;
        let patch_set = resolve_patch_set(&root, &settings.manifests)?;
        for m in patch_set.manifests() {
            info!(manifest = %m.location(), format = %m.format(), "selected");
        }

        let candidates = locator::candidates(settings.platform, settings.cc.as_deref());
        let archiver = settings
            .ar
            .clone()
            .or_else(|| locator::default_archiver(settings.platform));
        let profile = locator::locate(&candidates, archiver, self.probe)?;
        self.enter(RunState::CompilerResolved);

        let suppressions = settings
            .suppressions
            .clone()
            .unwrap_or_else(|| root.join(SUPPRESSIONS_FILE_NAME));
        if let Err(e) = validate_suppressions(&suppressions) {
            warn!(file = %suppressions, "could not check suppressions: {e:#}");
        }
        let env = sanitizer_env(&profile, Some(&suppressions))?;

        let runtime_object = if settings.allocator_override {
            let obj = settings.runtime_object.clone().or_else(default_runtime_object);
            if obj.is_none() {
                warn!("cannot determine the MoonBit home; allocator override skipped");
            }
            obj
        } else {
            info!("allocator override disabled");
            None
        };

        Ok(Plan {
            command: TestCommand {
                argv: settings.command.clone(),
                cwd: root.clone(),
                env,
                log: settings.log.clone(),
            },
            repo_root: root,
            patch_set,
            profile,
            runtime_object,
        })
    }

    /// Snapshot, patch, run, and always restore.
    pub fn execute(&mut self, mut plan: Plan) -> HarnessResult<RunOutcome> {
        let mut ledger = SnapshotLedger::new(self.files);
        let mut allocator = plan.runtime_object.clone().map(AllocatorOverride::new);

        let mut targets = plan.patch_set.paths();
        if let Some(a) = &allocator
            && a.is_present()
        {
            targets.push(a.runtime_object().to_path_buf());
        }
        ledger.capture(&targets)?;
        let signal_guard = ForwardGuard::install();
        self.enter(RunState::Snapshotted);

        let forward = catch_unwind(AssertUnwindSafe(|| {
            self.forward(&mut plan, &mut ledger, &mut allocator)
        }));
        if !matches!(forward, Ok(Ok(_))) {
            self.enter(RunState::Failed);
        }

        if let Some(a) = allocator.as_mut()
            && let Err(e) = a.unsuppress(&mut ledger)
        {
            error!("{e}");
        }
        let report = ledger.restore_all();
        drop(signal_guard);
        self.enter(RunState::Restored);

        let forward = match forward {
            Ok(r) => r,
            Err(panic) => {
                if !report.is_clean() {
                    error!(failed = report.failures.len(), "restore incomplete after panic");
                }
                resume_unwind(panic);
            }
        };

        let result = match forward {
            Ok(result) => result,
            Err(e) if report.is_clean() => return Err(e),
            Err(e) => {
                error!(phase = %e.phase(), "{e}");
                return Err(HarnessError::RestoreFailure {
                    failures: report.failures,
                    run: None,
                });
            }
        };
        if !report.is_clean() {
            return Err(HarnessError::RestoreFailure {
                failures: report.failures,
                run: Some(result),
            });
        }

        self.enter(RunState::Done);
        Ok(RunOutcome {
            result,
            profile: plan.profile,
            patched: plan.patch_set.paths(),
            restore: report,
            states: self.states.clone(),
        })
    }

    /// [`plan`](Self::plan) followed by [`execute`](Self::execute).
    pub fn run(&mut self, settings: &RunSettings) -> HarnessResult<RunOutcome> {
        let plan = self.plan(settings)?;
        self.execute(plan)
    }

    fn forward(
        &mut self,
        plan: &mut Plan,
        ledger: &mut SnapshotLedger<'a>,
        allocator: &mut Option<AllocatorOverride>,
    ) -> HarnessResult<RunResult> {
        interrupted(Phase::Patch)?;
        let flags = plan.profile.flags();
        for m in plan.patch_set.manifests_mut() {
            patch(m, PatchMode::Enable, &flags)
                .map_err(|e| HarnessError::runtime(Phase::Patch, e.into()))?;
            if !m.is_modified() {
                continue;
            }
            ledger
                .write(m.path(), m.render().as_bytes())
                .with_context(|| format!("write {}", m.path()))
                .map_err(|e| HarnessError::runtime(Phase::Patch, e))?;
            info!(manifest = %m.location(), "instrumented");
        }
        self.enter(RunState::Patched);

        if let Some(a) = allocator.as_mut() {
            interrupted(Phase::Allocator)?;
            a.suppress(ledger, self.builder, &plan.profile)?;
            if a.is_suppressed() {
                self.enter(RunState::AllocatorSuppressed);
            }
        }

        interrupted(Phase::Run)?;
        self.enter(RunState::Running);
        let result = self
            .runner
            .run(&plan.command)
            .map_err(|e| HarnessError::runtime(Phase::Run, e))?;
        self.enter(RunState::Completed);
        Ok(result)
    }
}
