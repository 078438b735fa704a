//! Working-copy reconciliation against the version-control backend
//!
//! `RevisionManager` keeps the local configuration checkout consistent
//! with the SCM: it classifies the backend's status entries into a
//! `WorkingCopyStatus`, drives add/update/remove to a fixed point, and
//! answers "has this path changed" queries for selective generation.
//!
//! The backend itself is a trait; `SvnBackend` is the thin `svn` CLI
//! adapter. With no backend configured every mutating operation degrades
//! to a logged no-op, so the tool stays usable on an unversioned tree.

use crate::error::{VentError, VentResult};
use crate::models::WorkingCopyStatus;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Reconciliation passes before giving up on a fixed point
const MAX_SYNC_PASSES: usize = 10;

/// State of one entry in the backend's structured diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmEntryState {
    /// Present locally, unknown to the backend
    Unversioned,
    /// Scheduled for addition
    Added,
    /// Tracked but missing from the working copy
    Missing,
    /// Scheduled for deletion
    Deleted,
    /// Content differs from the backend
    Modified,
}

#[derive(Debug, Clone)]
pub struct ScmEntry {
    pub path: PathBuf,
    pub state: ScmEntryState,
    pub is_dir: bool,
}

/// Version-control backend contract
pub trait ScmBackend {
    fn status(&self) -> VentResult<Vec<ScmEntry>>;
    fn add(&self, path: &Path) -> VentResult<()>;
    fn remove(&self, path: &Path) -> VentResult<()>;
    /// Check out the given revision (or HEAD); returns the resulting revision
    fn update(&self, revision: Option<u64>) -> VentResult<u64>;
    /// Commit the working copy; returns the new revision
    fn commit(&self, message: &str) -> VentResult<u64>;
    fn head_revision(&self) -> VentResult<u64>;
}

/// `svn` command-line adapter
pub struct SvnBackend {
    working_copy: PathBuf,
    command: String,
}

impl SvnBackend {
    pub fn new(working_copy: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            working_copy: working_copy.into(),
            command: command.into(),
        }
    }

    fn run(&self, args: &[&str]) -> VentResult<String> {
        let output = Command::new(&self.command)
            .args(args)
            .current_dir(&self.working_copy)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VentError::Scm(format!(
                "{} {} failed: {}",
                self.command,
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Extract the revision number from `svn update`/`svn commit` output
    fn parse_revision(output: &str) -> Option<u64> {
        output
            .split_whitespace()
            .filter_map(|token| token.trim_end_matches('.').parse::<u64>().ok())
            .next_back()
    }
}

impl ScmBackend for SvnBackend {
    fn status(&self) -> VentResult<Vec<ScmEntry>> {
        let output = self.run(&["status"])?;
        let mut entries = Vec::new();
        for line in output.lines() {
            if line.len() < 2 {
                continue;
            }
            let state = match line.as_bytes()[0] {
                b'?' => ScmEntryState::Unversioned,
                b'A' => ScmEntryState::Added,
                b'!' => ScmEntryState::Missing,
                b'D' => ScmEntryState::Deleted,
                b'M' => ScmEntryState::Modified,
                _ => continue,
            };
            let rel = line[1..].trim();
            let path = self.working_copy.join(rel);
            let is_dir = path.is_dir();
            entries.push(ScmEntry { path, state, is_dir });
        }
        Ok(entries)
    }

    fn add(&self, path: &Path) -> VentResult<()> {
        self.run(&["add", "--depth=empty", &path.to_string_lossy()])
            .map(|_| ())
    }

    fn remove(&self, path: &Path) -> VentResult<()> {
        self.run(&["remove", "--force", &path.to_string_lossy()])
            .map(|_| ())
    }

    fn update(&self, revision: Option<u64>) -> VentResult<u64> {
        let rev_arg = revision
            .map(|r| r.to_string())
            .unwrap_or_else(|| "HEAD".to_string());
        let output = self.run(&["update", "-r", &rev_arg])?;
        Self::parse_revision(&output)
            .ok_or_else(|| VentError::Scm(format!("cannot parse update output: {output}")))
    }

    fn commit(&self, message: &str) -> VentResult<u64> {
        let output = self.run(&["commit", "-m", message])?;
        // an empty commit produces no revision line; fall back to HEAD
        match Self::parse_revision(&output) {
            Some(rev) => Ok(rev),
            None => self.head_revision(),
        }
    }

    fn head_revision(&self) -> VentResult<u64> {
        let output = self.run(&["info", "--show-item", "revision"])?;
        output
            .trim()
            .parse::<u64>()
            .map_err(|_| VentError::Scm(format!("cannot parse revision: {output}")))
    }
}

/// Exact directory-containment test
///
/// `dir` contains `path` iff `path` equals `dir` or continues with a path
/// separator immediately after it: `/a` contains `/a`, `/a/` and `/a/b`,
/// but not `/ab` or `/a.b`.
pub fn is_in_dir(dir: &Path, path: &Path) -> bool {
    let dir = dir.to_string_lossy();
    let dir = dir.strip_suffix('/').unwrap_or(&dir);
    let path = path.to_string_lossy();
    let path = path.strip_suffix('/').unwrap_or(&path);

    match path.strip_prefix(dir) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Reconciles the working copy and answers change queries
pub struct RevisionManager {
    backend: Option<Box<dyn ScmBackend>>,
    working_copy: PathBuf,
    general_dir: String,
    /// Pinned deploy revision; `None` means HEAD
    target_revision: Option<u64>,
    /// Effective revision being deployed this run
    deploy_revision: u64,
    force: bool,
    cached: Option<WorkingCopyStatus>,
}

impl RevisionManager {
    pub fn new(
        backend: Option<Box<dyn ScmBackend>>,
        working_copy: impl Into<PathBuf>,
        general_dir: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            working_copy: working_copy.into(),
            general_dir: general_dir.into(),
            target_revision: None,
            deploy_revision: 0,
            force: false,
            cached: None,
        }
    }

    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Pin the revision to deploy instead of HEAD
    pub fn set_target_revision(&mut self, revision: Option<u64>) {
        self.target_revision = revision;
        if let Some(rev) = revision {
            self.deploy_revision = rev;
        }
    }

    pub fn deploy_revision(&self) -> u64 {
        self.deploy_revision
    }

    fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Whether an unversioned entry should be brought under version control
    fn is_tracked_path(&self, entry: &ScmEntry) -> bool {
        if entry.is_dir {
            return true;
        }
        let in_general = is_in_dir(&self.working_copy.join(&self.general_dir), &entry.path);
        match entry.path.extension().and_then(|e| e.to_str()) {
            Some("py") => in_general,
            Some("xml") => !in_general,
            _ => false,
        }
    }

    fn is_removed_kind(entry: &ScmEntry) -> bool {
        entry.is_dir
            || entry
                .path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "xml")
                .unwrap_or(false)
    }

    /// Classified working-copy status, cached until invalidated
    pub fn status(&mut self) -> VentResult<&WorkingCopyStatus> {
        if self.cached.is_none() {
            let mut status = WorkingCopyStatus::default();
            if let Some(backend) = &self.backend {
                for entry in backend.status()? {
                    match entry.state {
                        ScmEntryState::Unversioned => {
                            if self.is_tracked_path(&entry) {
                                status.to_add.push(entry.path);
                            }
                        }
                        ScmEntryState::Added => status.added.push(entry.path),
                        ScmEntryState::Missing => status.to_remove.push(entry.path),
                        ScmEntryState::Deleted => {
                            if Self::is_removed_kind(&entry) {
                                status.removed.push(entry.path);
                            } else {
                                status.to_remove.push(entry.path);
                            }
                        }
                        ScmEntryState::Modified => status.modified.push(entry.path),
                    }
                }
            }
            self.cached = Some(status);
        }
        Ok(self.cached.as_ref().unwrap_or(&EMPTY_STATUS))
    }

    /// Drive add/update/remove until the working copy reaches a fixed point
    ///
    /// Removals deliberately run after the update: updating first would
    /// restore locally-missing files that we are about to remove.
    pub fn sync(&mut self) -> VentResult<()> {
        if self.backend.is_none() {
            warn!("no revision control backend configured, skipping sync");
            return Ok(());
        }

        for pass in 0..MAX_SYNC_PASSES {
            let status = self.status()?.clone();
            if status.is_synced() {
                debug!(passes = pass, "working copy reconciled");
                return Ok(());
            }

            if let Some(backend) = &self.backend {
                for path in &status.to_add {
                    backend.add(path)?;
                }
                self.deploy_revision = backend.update(self.target_revision)?;
                for path in &status.to_remove {
                    backend.remove(path)?;
                }
            }
            self.invalidate();
        }

        Err(VentError::Scm(format!(
            "working copy did not reconcile after {MAX_SYNC_PASSES} passes"
        )))
    }

    /// Commit the working copy; returns the new revision (0 if unconfigured)
    pub fn commit(&mut self) -> VentResult<u64> {
        let Some(backend) = &self.backend else {
            warn!("no revision control backend configured, skipping commit");
            return Ok(0);
        };
        let message = format!(
            "configuration generated on {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let revision = backend.commit(&message)?;
        if self.target_revision.is_none() {
            self.deploy_revision = revision;
        }
        self.invalidate();
        Ok(revision)
    }

    /// Check out the pinned revision (or HEAD)
    pub fn update(&mut self) -> VentResult<u64> {
        let Some(backend) = &self.backend else {
            warn!("no revision control backend configured, skipping update");
            return Ok(0);
        };
        let revision = backend.update(self.target_revision)?;
        self.deploy_revision = revision;
        self.invalidate();
        Ok(revision)
    }

    /// Head revision of the backend (0 if unconfigured)
    pub fn last_revision(&self) -> VentResult<u64> {
        match &self.backend {
            Some(backend) => backend.head_revision(),
            None => Ok(0),
        }
    }

    /// Whether this exact path changed since the last deployment
    pub fn file_changed(&mut self, path: &Path) -> VentResult<bool> {
        if self.force {
            return Ok(true);
        }
        Ok(self.status()?.changed_paths().any(|p| p == path))
    }

    /// Whether anything under this directory changed
    pub fn dir_changed(&mut self, dir: &Path) -> VentResult<bool> {
        if self.force {
            return Ok(true);
        }
        Ok(self.status()?.changed_paths().any(|p| is_in_dir(dir, p)))
    }

    /// Pre-flight for the pipeline: refuse to time-travel over local edits
    pub fn prepare(&mut self) -> VentResult<()> {
        if self.target_revision.is_some() && self.status()?.has_local_changes() {
            return Err(VentError::Scm(
                "cannot deploy a pinned revision over local modifications; \
                 commit or revert the working copy first"
                    .to_string(),
            ));
        }
        self.sync()
    }
}

static EMPTY_STATUS: WorkingCopyStatus = WorkingCopyStatus {
    to_add: Vec::new(),
    added: Vec::new(),
    to_remove: Vec::new(),
    removed: Vec::new(),
    modified: Vec::new(),
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory backend: status entries returned pass by pass, operations
    /// recorded on a shared call log
    struct MockBackend {
        /// status entries returned per call; the last one repeats
        passes: Mutex<Vec<Vec<ScmEntry>>>,
        calls: Arc<Mutex<Vec<String>>>,
        head: u64,
    }

    impl MockBackend {
        fn new(passes: Vec<Vec<ScmEntry>>, head: u64) -> Self {
            Self {
                passes: Mutex::new(passes),
                calls: Arc::new(Mutex::new(Vec::new())),
                head,
            }
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ScmBackend for MockBackend {
        fn status(&self) -> VentResult<Vec<ScmEntry>> {
            let mut passes = self.passes.lock().unwrap();
            if passes.len() > 1 {
                Ok(passes.remove(0))
            } else {
                Ok(passes.first().cloned().unwrap_or_default())
            }
        }

        fn add(&self, path: &Path) -> VentResult<()> {
            self.log(format!("add {}", path.display()));
            Ok(())
        }

        fn remove(&self, path: &Path) -> VentResult<()> {
            self.log(format!("remove {}", path.display()));
            Ok(())
        }

        fn update(&self, revision: Option<u64>) -> VentResult<u64> {
            self.log(format!("update {:?}", revision));
            Ok(revision.unwrap_or(self.head))
        }

        fn commit(&self, _message: &str) -> VentResult<u64> {
            self.log("commit".to_string());
            Ok(self.head + 1)
        }

        fn head_revision(&self) -> VentResult<u64> {
            Ok(self.head)
        }
    }

    fn entry(path: &str, state: ScmEntryState, is_dir: bool) -> ScmEntry {
        ScmEntry {
            path: PathBuf::from(path),
            state,
            is_dir,
        }
    }

    fn manager(passes: Vec<Vec<ScmEntry>>) -> RevisionManager {
        RevisionManager::new(
            Some(Box::new(MockBackend::new(passes, 41))),
            "/conf",
            "general",
        )
    }

    #[test]
    fn is_in_dir_boundary_cases() {
        assert!(!is_in_dir(Path::new("/a"), Path::new("/ab")));
        assert!(is_in_dir(Path::new("/a"), Path::new("/a/b")));
        assert!(is_in_dir(Path::new("/a/"), Path::new("/a")));
        assert!(!is_in_dir(Path::new("/a"), Path::new("/a.b")));
        assert!(is_in_dir(Path::new("/a"), Path::new("/a")));
        assert!(is_in_dir(Path::new("/a"), Path::new("/a/b/")));
    }

    #[test]
    fn status_classification() {
        let mut mgr = manager(vec![vec![
            entry("/conf/hosts/new.xml", ScmEntryState::Unversioned, false),
            entry("/conf/hosts/sub", ScmEntryState::Unversioned, true),
            entry("/conf/general/hook.py", ScmEntryState::Unversioned, false),
            entry("/conf/hosts/hook.py", ScmEntryState::Unversioned, false),
            entry("/conf/general/old.xml", ScmEntryState::Unversioned, false),
            entry("/conf/notes.txt", ScmEntryState::Unversioned, false),
            entry("/conf/hosts/added.xml", ScmEntryState::Added, false),
            entry("/conf/hosts/gone.xml", ScmEntryState::Missing, false),
            entry("/conf/hosts/dead.xml", ScmEntryState::Deleted, false),
            entry("/conf/hosts/deaddir", ScmEntryState::Deleted, true),
            entry("/conf/general/dead.py", ScmEntryState::Deleted, false),
            entry("/conf/hosts/edited.xml", ScmEntryState::Modified, false),
        ]]);

        let status = mgr.status().unwrap();
        // unversioned: directories and xml outside general are tracked,
        // py only under general, xml under general and .txt are not
        assert_eq!(
            status.to_add,
            vec![
                PathBuf::from("/conf/hosts/new.xml"),
                PathBuf::from("/conf/hosts/sub"),
                PathBuf::from("/conf/general/hook.py"),
            ]
        );
        assert_eq!(status.added, vec![PathBuf::from("/conf/hosts/added.xml")]);
        // missing locally and scm-deleted non-xml both end up in to_remove
        assert_eq!(
            status.to_remove,
            vec![
                PathBuf::from("/conf/hosts/gone.xml"),
                PathBuf::from("/conf/general/dead.py"),
            ]
        );
        // scm-deleted xml files and directories are "removed"
        assert_eq!(
            status.removed,
            vec![
                PathBuf::from("/conf/hosts/dead.xml"),
                PathBuf::from("/conf/hosts/deaddir"),
            ]
        );
        assert_eq!(status.modified, vec![PathBuf::from("/conf/hosts/edited.xml")]);
    }

    #[test]
    fn sync_reaches_fixed_point_and_orders_operations() {
        let backend = MockBackend::new(
            vec![
                vec![
                    entry("/conf/hosts/new.xml", ScmEntryState::Unversioned, false),
                    entry("/conf/hosts/gone.xml", ScmEntryState::Missing, false),
                ],
                vec![],
            ],
            41,
        );
        let calls = backend.calls.clone();
        let mut mgr = RevisionManager::new(Some(Box::new(backend)), "/conf", "general");
        mgr.sync().unwrap();

        // add, then update, then remove: update first would resurrect the
        // missing file
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[
                "add /conf/hosts/new.xml".to_string(),
                "update None".to_string(),
                "remove /conf/hosts/gone.xml".to_string(),
            ]
        );
    }

    #[test]
    fn sync_is_idempotent_on_clean_copy() {
        let mut mgr = manager(vec![vec![]]);
        mgr.sync().unwrap();
        assert!(mgr.status().unwrap().is_empty());
        mgr.sync().unwrap();
        assert!(mgr.status().unwrap().is_empty());
    }

    #[test]
    fn sync_gives_up_after_bounded_passes() {
        // backend always reports the same unversioned file
        let mut mgr = manager(vec![vec![entry(
            "/conf/hosts/stuck.xml",
            ScmEntryState::Unversioned,
            false,
        )]]);
        let err = mgr.sync().unwrap_err();
        assert!(err.to_string().contains("did not reconcile"));
    }

    #[test]
    fn sync_without_backend_is_a_noop() {
        let mut mgr = RevisionManager::new(None, "/conf", "general");
        mgr.sync().unwrap();
        assert_eq!(mgr.last_revision().unwrap(), 0);
        assert_eq!(mgr.commit().unwrap(), 0);
    }

    #[test]
    fn prepare_rejects_pinned_revision_over_local_edits() {
        let mut mgr = manager(vec![vec![entry(
            "/conf/hosts/edited.xml",
            ScmEntryState::Modified,
            false,
        )]]);
        mgr.set_target_revision(Some(40));
        let err = mgr.prepare().unwrap_err();
        assert!(err.to_string().contains("local modifications"));
    }

    #[test]
    fn prepare_syncs_when_head_requested() {
        let mut mgr = manager(vec![
            vec![entry(
                "/conf/hosts/edited.xml",
                ScmEntryState::Modified,
                false,
            )],
        ]);
        // modified-only status is already synced; prepare succeeds
        mgr.prepare().unwrap();
        assert_eq!(mgr.deploy_revision(), 0);
    }

    #[test]
    fn file_and_dir_changed_queries() {
        let mut mgr = manager(vec![vec![
            entry("/conf/hosts/edited.xml", ScmEntryState::Modified, false),
            entry("/conf/hosts/added.xml", ScmEntryState::Added, false),
        ]]);
        assert!(mgr.file_changed(Path::new("/conf/hosts/edited.xml")).unwrap());
        assert!(!mgr.file_changed(Path::new("/conf/hosts/other.xml")).unwrap());
        assert!(mgr.dir_changed(Path::new("/conf/hosts")).unwrap());
        assert!(!mgr.dir_changed(Path::new("/conf/general")).unwrap());
        assert!(!mgr.dir_changed(Path::new("/conf/host")).unwrap());

        mgr.set_force(true);
        assert!(mgr.file_changed(Path::new("/conf/hosts/other.xml")).unwrap());
        assert!(mgr.dir_changed(Path::new("/conf/general")).unwrap());
    }

    #[test]
    fn commit_records_effective_revision_when_not_pinned() {
        let mut mgr = manager(vec![vec![]]);
        let rev = mgr.commit().unwrap();
        assert_eq!(rev, 42);
        assert_eq!(mgr.deploy_revision(), 42);

        let mut pinned = manager(vec![vec![]]);
        pinned.set_target_revision(Some(40));
        pinned.commit().unwrap();
        assert_eq!(pinned.deploy_revision(), 40);
    }

    #[test]
    fn svn_parse_revision() {
        assert_eq!(
            SvnBackend::parse_revision("Updated to revision 128."),
            Some(128)
        );
        assert_eq!(
            SvnBackend::parse_revision("Committed revision 129."),
            Some(129)
        );
        assert_eq!(SvnBackend::parse_revision("nothing here"), None);
    }
}
