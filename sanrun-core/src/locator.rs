//! Compiler discovery.
//!
//! Candidates are tried in platform order; the first one that compiles an
//! instrumented probe wins. The archiver comes from a fixed platform location,
//! not from the compiler's directory: Homebrew LLVM, for one, ships `clang`
//! without an `ar` next to it.

use crate::error::{HarnessError, HarnessResult, Phase};
use crate::ports::CompilerProbe;
use camino::{Utf8Path, Utf8PathBuf};
use sanrun_manifest::InstrumentationFlags;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Homebrew LLVM formulas, newest first.
const BREW_LLVM_FORMULAS: &[&str] = &["llvm", "llvm@19", "llvm@18", "llvm@15", "llvm@13"];
const BREW_FALLBACKS: &[&str] = &["/opt/homebrew/bin/brew", "/usr/local/bin/brew"];
const APPLE_CLANG: &str = "/usr/bin/clang";
const UNIX_ARCHIVER: &str = "/usr/bin/ar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Other,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
            Platform::Other => std::env::consts::OS,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolchainFamily {
    Gcc,
    Clang,
    AppleClang,
    Msvc,
}

impl ToolchainFamily {
    /// Best guess from the executable name.
    pub fn infer(compiler: &Utf8Path) -> Self {
        let name = compiler.file_stem().unwrap_or_default().to_ascii_lowercase();
        if name == "cl" {
            ToolchainFamily::Msvc
        } else if compiler == Utf8Path::new(APPLE_CLANG) {
            ToolchainFamily::AppleClang
        } else if name.contains("clang") {
            ToolchainFamily::Clang
        } else {
            ToolchainFamily::Gcc
        }
    }

    pub fn flags(self) -> InstrumentationFlags {
        match self {
            ToolchainFamily::Msvc => InstrumentationFlags::msvc(),
            _ => InstrumentationFlags::gnu(),
        }
    }

    /// LeakSanitizer ships with gcc and upstream clang, not with Apple clang or MSVC.
    pub fn default_leak_detection(self) -> bool {
        matches!(self, ToolchainFamily::Gcc | ToolchainFamily::Clang)
    }

    /// Arguments compiling and linking `src` into `out` with instrumentation.
    pub fn probe_args(self, src: &Utf8Path, out: &Utf8Path) -> Vec<String> {
        match self {
            ToolchainFamily::Msvc => vec![
                "/nologo".to_string(),
                "/fsanitize=address".to_string(),
                src.to_string(),
                format!("/Fe:{out}"),
            ],
            _ => vec![
                "-fsanitize=address".to_string(),
                src.to_string(),
                "-o".to_string(),
                out.to_string(),
            ],
        }
    }

    /// Arguments compiling `src` into the object file `out`, no instrumentation.
    pub fn object_args(self, src: &Utf8Path, out: &Utf8Path) -> Vec<String> {
        match self {
            ToolchainFamily::Msvc => vec![
                "/nologo".to_string(),
                "/c".to_string(),
                src.to_string(),
                format!("/Fo{out}"),
            ],
            _ => vec![
                "-c".to_string(),
                src.to_string(),
                "-o".to_string(),
                out.to_string(),
            ],
        }
    }
}

/// A compiler worth probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub compiler: Utf8PathBuf,
    pub family: ToolchainFamily,
    pub leak_detection: bool,
}

impl Candidate {
    pub fn new(compiler: impl Into<Utf8PathBuf>, family: ToolchainFamily) -> Self {
        Self {
            compiler: compiler.into(),
            family,
            leak_detection: family.default_leak_detection(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.compiler)
    }
}

/// The compiler/archiver pair selected for this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilerProfile {
    pub family: ToolchainFamily,
    pub compiler: Utf8PathBuf,
    pub archiver: Utf8PathBuf,
    pub supports_leak_detection: bool,
}

impl CompilerProfile {
    pub fn flags(&self) -> InstrumentationFlags {
        self.family.flags()
    }
}

/// Ordered candidates for `platform`. An explicit compiler, when given, is tried first.
pub fn candidates(platform: Platform, explicit: Option<&Utf8Path>) -> Vec<Candidate> {
    let mut out = Vec::new();

    if let Some(cc) = explicit {
        let resolved = if cc.is_absolute() {
            Some(cc.to_path_buf())
        } else {
            find_in_path(cc.as_str())
        };
        match resolved {
            Some(path) => {
                let family = ToolchainFamily::infer(&path);
                out.push(Candidate::new(path, family));
            }
            None => warn!(cc = %cc, "requested compiler not found on PATH"),
        }
    }

    match platform {
        Platform::MacOs => {
            for formula in BREW_LLVM_FORMULAS {
                if let Some(prefix) = brew_prefix(formula) {
                    out.push(Candidate::new(prefix.join("bin").join("clang"), ToolchainFamily::Clang));
                }
            }
            out.push(Candidate::new(APPLE_CLANG, ToolchainFamily::AppleClang));
        }
        Platform::Windows => {
            if let Some(cl) = find_in_path("cl.exe") {
                out.push(Candidate::new(cl, ToolchainFamily::Msvc));
            }
        }
        Platform::Linux | Platform::Other => {
            for (name, family) in [
                ("gcc", ToolchainFamily::Gcc),
                ("clang", ToolchainFamily::Clang),
                ("cc", ToolchainFamily::Gcc),
            ] {
                if let Some(path) = find_in_path(name) {
                    out.push(Candidate::new(path, family));
                }
            }
        }
    }

    let mut seen = std::collections::BTreeSet::new();
    out.retain(|c| seen.insert(c.compiler.clone()));
    out
}

/// The platform's archiver, when it is installed.
pub fn default_archiver(platform: Platform) -> Option<Utf8PathBuf> {
    match platform {
        Platform::Windows => find_in_path("lib.exe"),
        _ => {
            let ar = Utf8PathBuf::from(UNIX_ARCHIVER);
            ar.is_file().then_some(ar)
        }
    }
}

/// Probe `candidates` in order and pair the first success with `archiver`.
pub fn locate(
    candidates: &[Candidate],
    archiver: Option<Utf8PathBuf>,
    probe: &dyn CompilerProbe,
) -> HarnessResult<CompilerProfile> {
    let mut tried = Vec::new();
    let mut chosen = None;
    for candidate in candidates {
        match probe.probe(candidate) {
            Ok(()) => {
                chosen = Some(candidate.clone());
                break;
            }
            Err(e) => {
                debug!(compiler = %candidate, "probe failed: {e:#}");
                tried.push(candidate.compiler.to_string());
            }
        }
    }
    let Some(candidate) = chosen else {
        return Err(HarnessError::NoCapableCompiler { tried });
    };

    let archiver = archiver
        .filter(|ar| ar.is_absolute() && ar.is_file())
        .ok_or_else(|| {
            HarnessError::runtime(
                Phase::Locate,
                anyhow::anyhow!("archiver not found for {}", candidate.compiler),
            )
        })?;

    let profile = CompilerProfile {
        family: candidate.family,
        compiler: candidate.compiler,
        archiver,
        supports_leak_detection: candidate.leak_detection,
    };
    info!(
        compiler = %profile.compiler,
        archiver = %profile.archiver,
        leak_detection = profile.supports_leak_detection,
        "selected compiler"
    );
    Ok(profile)
}

pub(crate) fn find_in_path(prog: &str) -> Option<Utf8PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(prog);
        if cand.is_file() && is_executable(&cand) {
            if let Ok(p) = Utf8PathBuf::from_path_buf(cand) {
                return Some(p);
            }
        }
    }
    None
}

fn is_executable(path: &std::path::Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if let Ok(meta) = std::fs::metadata(path) {
            return meta.permissions().mode() & 0o111 != 0;
        }
        false
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn brew_executable() -> Option<Utf8PathBuf> {
    find_in_path("brew").or_else(|| {
        BREW_FALLBACKS
            .iter()
            .map(Utf8PathBuf::from)
            .find(|p| p.is_file())
    })
}

fn brew_prefix(formula: &str) -> Option<Utf8PathBuf> {
    let brew = brew_executable()?;
    let out = std::process::Command::new(brew.as_std_path())
        .args(["--prefix", formula])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let prefix = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if prefix.is_empty() {
        return None;
    }
    let prefix = Utf8PathBuf::from(prefix);
    prefix.join("bin").join("clang").is_file().then_some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Accepts only the listed compilers and records every probe.
    struct ScriptedProbe {
        accept: Vec<Utf8PathBuf>,
        seen: RefCell<Vec<Utf8PathBuf>>,
    }

    impl CompilerProbe for ScriptedProbe {
        fn probe(&self, candidate: &Candidate) -> anyhow::Result<()> {
            self.seen.borrow_mut().push(candidate.compiler.clone());
            if self.accept.contains(&candidate.compiler) {
                Ok(())
            } else {
                anyhow::bail!("rejected")
            }
        }
    }

    fn archiver() -> (tempfile::TempDir, Utf8PathBuf) {
        let td = tempfile::tempdir().unwrap();
        let ar = Utf8PathBuf::from_path_buf(td.path().join("ar")).unwrap();
        std::fs::write(&ar, b"").unwrap();
        (td, ar)
    }

    #[test]
    fn first_compiling_candidate_wins() {
        let (_td, ar) = archiver();
        let cands = vec![
            Candidate::new("/opt/llvm/bin/clang", ToolchainFamily::Clang),
            Candidate::new(APPLE_CLANG, ToolchainFamily::AppleClang),
        ];
        let probe = ScriptedProbe {
            accept: vec![Utf8PathBuf::from(APPLE_CLANG), Utf8PathBuf::from("/opt/llvm/bin/clang")],
            seen: RefCell::new(vec![]),
        };
        let profile = locate(&cands, Some(ar.clone()), &probe).unwrap();
        assert_eq!(profile.compiler, Utf8PathBuf::from("/opt/llvm/bin/clang"));
        assert_eq!(profile.archiver, ar);
        assert!(profile.supports_leak_detection);
        assert_eq!(probe.seen.borrow().len(), 1);
    }

    #[test]
    fn leak_detection_follows_the_chosen_candidate() {
        let (_td, ar) = archiver();
        let cands = vec![
            Candidate::new("/opt/llvm/bin/clang", ToolchainFamily::Clang),
            Candidate::new(APPLE_CLANG, ToolchainFamily::AppleClang),
        ];
        let probe = ScriptedProbe {
            accept: vec![Utf8PathBuf::from(APPLE_CLANG)],
            seen: RefCell::new(vec![]),
        };
        let profile = locate(&cands, Some(ar), &probe).unwrap();
        assert_eq!(profile.family, ToolchainFamily::AppleClang);
        assert!(!profile.supports_leak_detection);
    }

    #[test]
    fn no_candidate_is_fatal() {
        let (_td, ar) = archiver();
        let cands = vec![Candidate::new("/usr/bin/gcc", ToolchainFamily::Gcc)];
        let probe = ScriptedProbe {
            accept: vec![],
            seen: RefCell::new(vec![]),
        };
        let err = locate(&cands, Some(ar), &probe).unwrap_err();
        match err {
            HarnessError::NoCapableCompiler { tried } => assert_eq!(tried, vec!["/usr/bin/gcc"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_archiver_is_a_locate_error() {
        let cands = vec![Candidate::new("/usr/bin/gcc", ToolchainFamily::Gcc)];
        let probe = ScriptedProbe {
            accept: vec![Utf8PathBuf::from("/usr/bin/gcc")],
            seen: RefCell::new(vec![]),
        };
        let err = locate(&cands, Some(Utf8PathBuf::from("relative/ar")), &probe).unwrap_err();
        assert_eq!(err.phase(), Phase::Locate);
    }

    #[test]
    fn family_inference() {
        assert_eq!(ToolchainFamily::infer(Utf8Path::new("C:/VS/bin/cl.exe")), ToolchainFamily::Msvc);
        assert_eq!(ToolchainFamily::infer(Utf8Path::new(APPLE_CLANG)), ToolchainFamily::AppleClang);
        assert_eq!(ToolchainFamily::infer(Utf8Path::new("/opt/llvm/bin/clang-18")), ToolchainFamily::Clang);
        assert_eq!(ToolchainFamily::infer(Utf8Path::new("/usr/bin/gcc-13")), ToolchainFamily::Gcc);
    }

    #[test]
    fn explicit_absolute_compiler_comes_first() {
        let cands = candidates(Platform::Linux, Some(Utf8Path::new("/custom/bin/clang")));
        assert_eq!(cands[0].compiler, Utf8PathBuf::from("/custom/bin/clang"));
        assert_eq!(cands[0].family, ToolchainFamily::Clang);
    }

    #[test]
    fn msvc_probe_args_use_slash_flags() {
        let args = ToolchainFamily::Msvc.probe_args(Utf8Path::new("p.c"), Utf8Path::new("p.exe"));
        assert_eq!(args, vec!["/nologo", "/fsanitize=address", "p.c", "/Fe:p.exe"]);
    }
}
