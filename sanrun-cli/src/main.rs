mod config;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use config::{CliRunArgs, ConfigMerger};
use sanrun_core::adapters::{CcCompilerProbe, CcObjectBuilder, FsFilePort, ProcessTestRunner};
use sanrun_core::orchestrator::{self, Orchestrator};
use sanrun_core::{HarnessError, HarnessResult, Platform, RunSettings, locator};
use sanrun_manifest::NativeRole;
use std::io::IsTerminal as _;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sanrun",
    version,
    about = "Run MoonBit native tests under AddressSanitizer, then restore the checkout.",
    after_help = "Exit status: the test command's own status (128+n when it is killed by signal n). \
Failures of sanrun itself exit with 125, so a test command that exits 125 is \
indistinguishable by status alone; sanrun logs a warning when that happens."
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Instrument the native build, run the tests, restore every touched file.
    Run(RunArgs),
    /// Print the compiler profile a run would use, as JSON.
    Locate(LocateArgs),
    /// List the manifests a run would instrument.
    Scan(ScanArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Repository root (default: current directory).
    #[arg(long, default_value = ".")]
    repo_root: Utf8PathBuf,

    /// Manifest to instrument, relative to the repository root (repeatable).
    /// Default: every manifest with native sources or link flags.
    #[arg(long = "pkg")]
    packages: Vec<Utf8PathBuf>,

    /// Leave the runtime's bundled allocator in place.
    #[arg(long, default_value_t = false)]
    no_allocator_override: bool,

    /// Runtime object to replace (default: $MOON_HOME/lib/libmoonbitrun.o).
    #[arg(long)]
    runtime_object: Option<Utf8PathBuf>,

    /// Compiler to try first.
    #[arg(long, env = "SANRUN_CC")]
    cc: Option<Utf8PathBuf>,

    /// LeakSanitizer suppressions file (default: <repo_root>/.lsan-suppressions).
    #[arg(long)]
    suppressions: Option<Utf8PathBuf>,

    /// Write the test output to this file instead of the terminal.
    #[arg(long)]
    log: Option<Utf8PathBuf>,

    /// Print the manifest changes before running.
    #[arg(long, default_value_t = false)]
    show_diff: bool,

    /// Test command (default: moon test --target native -v).
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Debug, Parser)]
struct LocateArgs {
    /// Compiler to try first.
    #[arg(long, env = "SANRUN_CC")]
    cc: Option<Utf8PathBuf>,
}

#[derive(Debug, Parser)]
struct ScanArgs {
    /// Repository root (default: current directory).
    #[arg(long, default_value = ".")]
    repo_root: Utf8PathBuf,

    /// Manifest to check, relative to the repository root (repeatable).
    #[arg(long = "pkg")]
    packages: Vec<Utf8PathBuf>,

    /// Output format (text, json).
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();
    let res = match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Locate(args) => cmd_locate(args),
        Command::Scan(args) => cmd_scan(args),
    };
    match res {
        Ok(code) => code,
        Err(e) => {
            error!(phase = %e.phase(), "{e}");
            if let HarnessError::RestoreFailure { run: Some(run), .. } = &e {
                error!(exit_code = run.exit_code, "tests finished before the restore failed");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn absolute(path: Utf8PathBuf) -> HarnessResult<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let abs = std::path::absolute(&path)
        .map_err(|e| HarnessError::Config(format!("resolve {path}: {e}")))?;
    Utf8PathBuf::from_path_buf(abs)
        .map_err(|p| HarnessError::Config(format!("non-UTF-8 path: {}", p.display())))
}

fn cmd_run(args: RunArgs) -> HarnessResult<ExitCode> {
    let mut settings = RunSettings {
        repo_root: args.repo_root,
        ..RunSettings::default()
    };
    let root = orchestrator::repo_root(&settings)?;

    let file_config =
        config::load_or_default(&root).map_err(|e| HarnessError::Config(format!("{e:#}")))?;
    let cli = CliRunArgs {
        packages: args.packages,
        command: args.command,
        suppressions: args.suppressions.map(absolute).transpose()?,
        cc: args.cc,
        no_allocator_override: args.no_allocator_override,
        runtime_object: args.runtime_object.map(absolute).transpose()?,
    };
    let merged = ConfigMerger::new(file_config).merge_run_args(&root, &cli);
    debug!("merged config: {:?}", merged);

    settings.repo_root = root;
    settings.manifests = merged.packages;
    if !merged.command.is_empty() {
        settings.command = merged.command;
    }
    settings.allocator_override = merged.allocator_override;
    settings.runtime_object = merged.runtime_object;
    settings.suppressions = merged.suppressions;
    settings.cc = merged.cc;
    settings.ar = merged.ar;
    settings.log = args.log.map(absolute).transpose()?;
    settings.show_diff = args.show_diff;

    let (probe, files, builder, runner) =
        (CcCompilerProbe, FsFilePort, CcObjectBuilder, ProcessTestRunner);
    let mut orch = Orchestrator::new(&probe, &files, &builder, &runner);
    let plan = orch.plan(&settings)?;
    if settings.show_diff {
        for diff in plan.preview()? {
            eprint!("{diff}");
        }
    }

    let outcome = orch.execute(plan)?;
    if outcome.result.collides_with_harness_exit() {
        warn!(
            exit_code = outcome.result.exit_code,
            "the test command itself exited with sanrun's harness-failure code"
        );
    }
    info!(
        exit_code = outcome.result.exit_code,
        restored = outcome.restore.restored.len(),
        "done"
    );
    Ok(ExitCode::from(outcome.result.process_exit_code()))
}

fn cmd_locate(args: LocateArgs) -> HarnessResult<ExitCode> {
    let platform = Platform::current();
    let candidates = locator::candidates(platform, args.cc.as_deref());
    let profile = locator::locate(
        &candidates,
        locator::default_archiver(platform),
        &CcCompilerProbe,
    )?;
    let json = serde_json::to_string_pretty(&profile)
        .map_err(|e| HarnessError::runtime(sanrun_core::Phase::Locate, e.into()))?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_scan(args: ScanArgs) -> HarnessResult<ExitCode> {
    let settings = RunSettings {
        repo_root: args.repo_root,
        ..RunSettings::default()
    };
    let root = orchestrator::repo_root(&settings)?;
    let set = orchestrator::resolve_patch_set(&root, &args.packages)?;

    let rows: Vec<_> = set
        .manifests()
        .iter()
        .map(|m| {
            let mut roles = Vec::new();
            if m.declares_native_sources() {
                roles.push(NativeRole::Sources.to_string());
            }
            if m.has_link_flags() {
                roles.push(NativeRole::LinkFlags.to_string());
            }
            let rel = m.path().strip_prefix(&root).unwrap_or(m.path());
            (rel.to_string(), m.format().label(), roles)
        })
        .collect();

    match args.format {
        OutputFormat::Text => {
            for (path, format, roles) in &rows {
                println!("{path}\t{format}\t{}", roles.join(", "));
            }
        }
        OutputFormat::Json => {
            let items: Vec<_> = rows
                .iter()
                .map(|(path, format, roles)| {
                    serde_json::json!({ "path": path, "format": format, "roles": roles })
                })
                .collect();
            let json = serde_json::to_string_pretty(&items)
                .map_err(|e| HarnessError::runtime(sanrun_core::Phase::Resolve, e.into()))?;
            println!("{json}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
