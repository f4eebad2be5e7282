//! Snapshot/rollback ledger.
//!
//! Every file the harness is about to change is captured here first. Writes to
//! captured files go through [`SnapshotLedger::write`] so nothing is mutated
//! without a snapshot behind it. Restoration writes the captured bytes back
//! verbatim and checks the result against the recorded hash.

use crate::error::{FileFailure, HarnessError, HarnessResult, Phase};
use crate::ports::FilePort;
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// One captured file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    path: Utf8PathBuf,
    bytes: Vec<u8>,
    sha256: String,
    restored: bool,
}

impl SnapshotEntry {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

/// What [`SnapshotLedger::restore_all`] put back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<Utf8PathBuf>,
    pub failures: Vec<FileFailure>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SnapshotLedger<'a> {
    files: &'a dyn FilePort,
    entries: Vec<SnapshotEntry>,
    finished: bool,
}

impl<'a> SnapshotLedger<'a> {
    pub fn new(files: &'a dyn FilePort) -> Self {
        Self {
            files,
            entries: Vec::new(),
            finished: false,
        }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// Read every path, then record them all. If any read fails nothing is
    /// recorded. Paths already in the ledger keep their first snapshot.
    pub fn capture<P: AsRef<Utf8Path>>(&mut self, paths: &[P]) -> HarnessResult<()> {
        if self.finished {
            return Err(HarnessError::runtime(
                Phase::Snapshot,
                anyhow::anyhow!("ledger already restored"),
            ));
        }

        let mut staged: Vec<SnapshotEntry> = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if !path.is_absolute() {
                return Err(HarnessError::runtime(
                    Phase::Snapshot,
                    anyhow::anyhow!("snapshot path must be absolute: {path}"),
                ));
            }
            if self.contains(path) || staged.iter().any(|e| e.path == path) {
                continue;
            }
            let bytes = self
                .files
                .read_file(path)
                .with_context(|| format!("capture {path}"))
                .map_err(|e| HarnessError::runtime(Phase::Snapshot, e))?;
            staged.push(SnapshotEntry {
                path: path.to_path_buf(),
                sha256: sha256_hex(&bytes),
                bytes,
                restored: false,
            });
        }

        for entry in &staged {
            debug!(path = %entry.path, sha256 = %entry.sha256, "captured");
        }
        self.entries.extend(staged);
        Ok(())
    }

    /// Overwrite a captured file. Uncaptured paths are refused.
    pub fn write(&mut self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.path == path)
            .ok_or_else(|| anyhow::anyhow!("refusing to write {path}: not captured"))?;
        if self.finished {
            anyhow::bail!("refusing to write {path}: ledger already restored");
        }
        self.files.write_file(path, contents)?;
        entry.restored = false;
        Ok(())
    }

    fn put_back(files: &dyn FilePort, entry: &SnapshotEntry) -> anyhow::Result<()> {
        files.write_file(&entry.path, &entry.bytes)?;
        let now = files
            .read_file(&entry.path)
            .context("re-read after restore")?;
        let sha = sha256_hex(&now);
        if sha != entry.sha256 {
            anyhow::bail!("content hash mismatch after restore ({sha} != {})", entry.sha256);
        }
        Ok(())
    }

    /// Restore a single captured file ahead of [`restore_all`](Self::restore_all).
    pub fn restore_one(&mut self, path: &Utf8Path) -> anyhow::Result<()> {
        let files = self.files;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.path == path)
            .ok_or_else(|| anyhow::anyhow!("{path} was never captured"))?;
        if entry.restored {
            return Ok(());
        }
        Self::put_back(files, entry).with_context(|| format!("restore {path}"))?;
        entry.restored = true;
        debug!(path = %path, "restored");
        Ok(())
    }

    /// Restore everything not yet restored, newest capture first. Every path
    /// is attempted even after a failure. Runs once; later calls are no-ops.
    pub fn restore_all(&mut self) -> RestoreReport {
        let mut report = RestoreReport::default();
        if self.finished {
            return report;
        }
        self.finished = true;

        let files = self.files;
        for entry in self.entries.iter_mut().rev() {
            if entry.restored {
                report.restored.push(entry.path.clone());
                continue;
            }
            match Self::put_back(files, entry) {
                Ok(()) => {
                    entry.restored = true;
                    report.restored.push(entry.path.clone());
                }
                Err(e) => {
                    error!(path = %entry.path, "restore failed: {e:#}");
                    report.failures.push(FileFailure {
                        path: entry.path.clone(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }
        info!(
            restored = report.restored.len(),
            failed = report.failures.len(),
            "snapshot restored"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Default)]
    struct MemFiles {
        files: RefCell<BTreeMap<Utf8PathBuf, Vec<u8>>>,
        deny_write: RefCell<BTreeSet<Utf8PathBuf>>,
        writes: RefCell<Vec<Utf8PathBuf>>,
    }

    impl MemFiles {
        fn with(files: &[(&str, &str)]) -> Self {
            let m = MemFiles::default();
            for (p, c) in files {
                m.files
                    .borrow_mut()
                    .insert(Utf8PathBuf::from(*p), c.as_bytes().to_vec());
            }
            m
        }

        fn text(&self, p: &str) -> String {
            String::from_utf8(self.files.borrow()[Utf8Path::new(p)].clone()).unwrap()
        }
    }

    impl FilePort for MemFiles {
        fn read_file(&self, path: &Utf8Path) -> anyhow::Result<Vec<u8>> {
            self.files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file: {path}"))
        }

        fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
            self.writes.borrow_mut().push(path.to_path_buf());
            if self.deny_write.borrow().contains(path) {
                anyhow::bail!("permission denied");
            }
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }
    }

    #[test]
    fn capture_is_all_or_nothing() {
        let files = MemFiles::with(&[("/r/a", "A")]);
        let mut ledger = SnapshotLedger::new(&files);
        assert!(ledger.capture(&["/r/a", "/r/missing"]).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn relative_paths_are_refused() {
        let files = MemFiles::with(&[("a", "A")]);
        let mut ledger = SnapshotLedger::new(&files);
        let err = ledger.capture(&["a"]).unwrap_err();
        assert_eq!(err.phase(), Phase::Snapshot);
    }

    #[test]
    fn first_capture_wins() {
        let files = MemFiles::with(&[("/r/a", "A")]);
        let mut ledger = SnapshotLedger::new(&files);
        ledger.capture(&["/r/a"]).unwrap();
        ledger.write(Utf8Path::new("/r/a"), b"patched").unwrap();
        ledger.capture(&["/r/a"]).unwrap();
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.entries()[0].bytes(), b"A");
    }

    #[test]
    fn uncaptured_writes_are_refused() {
        let files = MemFiles::with(&[("/r/a", "A")]);
        let mut ledger = SnapshotLedger::new(&files);
        assert!(ledger.write(Utf8Path::new("/r/a"), b"x").is_err());
        assert_eq!(files.text("/r/a"), "A");
    }

    #[test]
    fn restore_all_puts_back_bytes_in_reverse_order() {
        let files = MemFiles::with(&[("/r/a", "A"), ("/r/b", "B")]);
        let mut ledger = SnapshotLedger::new(&files);
        ledger.capture(&["/r/a", "/r/b"]).unwrap();
        ledger.write(Utf8Path::new("/r/a"), b"a2").unwrap();
        ledger.write(Utf8Path::new("/r/b"), b"b2").unwrap();
        files.writes.borrow_mut().clear();

        let report = ledger.restore_all();
        assert!(report.is_clean());
        assert_eq!(files.text("/r/a"), "A");
        assert_eq!(files.text("/r/b"), "B");
        assert_eq!(
            *files.writes.borrow(),
            vec![Utf8PathBuf::from("/r/b"), Utf8PathBuf::from("/r/a")]
        );
    }

    #[test]
    fn restore_all_attempts_every_path() {
        let files = MemFiles::with(&[("/r/a", "A"), ("/r/b", "B"), ("/r/c", "C")]);
        let mut ledger = SnapshotLedger::new(&files);
        ledger.capture(&["/r/a", "/r/b", "/r/c"]).unwrap();
        for p in ["/r/a", "/r/b", "/r/c"] {
            ledger.write(Utf8Path::new(p), b"x").unwrap();
        }
        files.deny_write.borrow_mut().insert(Utf8PathBuf::from("/r/b"));

        let report = ledger.restore_all();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, Utf8PathBuf::from("/r/b"));
        assert_eq!(files.text("/r/a"), "A");
        assert_eq!(files.text("/r/c"), "C");
        assert_eq!(files.text("/r/b"), "x");
    }

    #[test]
    fn restore_all_runs_once() {
        let files = MemFiles::with(&[("/r/a", "A")]);
        let mut ledger = SnapshotLedger::new(&files);
        ledger.capture(&["/r/a"]).unwrap();
        assert_eq!(ledger.restore_all().restored.len(), 1);
        files.writes.borrow_mut().clear();
        assert_eq!(ledger.restore_all(), RestoreReport::default());
        assert!(files.writes.borrow().is_empty());
    }

    #[test]
    fn restore_one_is_not_repeated_by_restore_all() {
        let files = MemFiles::with(&[("/r/a", "A"), ("/r/b", "B")]);
        let mut ledger = SnapshotLedger::new(&files);
        ledger.capture(&["/r/a", "/r/b"]).unwrap();
        ledger.write(Utf8Path::new("/r/a"), b"x").unwrap();
        ledger.restore_one(Utf8Path::new("/r/a")).unwrap();
        assert_eq!(files.text("/r/a"), "A");
        files.writes.borrow_mut().clear();

        let report = ledger.restore_all();
        assert_eq!(report.restored.len(), 2);
        assert_eq!(*files.writes.borrow(), vec![Utf8PathBuf::from("/r/b")]);
    }
}
