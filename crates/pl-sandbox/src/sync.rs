//! Copy-mode file sync between host and sandbox.
//!
//! `push` copies the project tree wholesale into the sandbox; `pull` scans
//! the sandbox workspace and mirrors matching files back under the project
//! root. The candidate list is recomputed from scratch on every pass, so a
//! pull is idempotent but not incremental. During interactive sessions a
//! single background worker pulls quietly on a fixed interval; it is
//! cancelled and awaited before the final end-of-session pull so two passes
//! never write the same host files at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pl_sandbox_core::{Error, FileAccessMode, Result, SandboxBackend};
use tokio_util::sync::CancellationToken;

/// File patterns worth carrying back to the host: sources the user edited
/// in-sandbox plus the output formats the demo modules produce.
pub const SYNC_PATTERNS: &[&str] = &[
    "*.py", "*.txt", "*.md", "*.json", "*.csv", "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg",
    "*.html", "*.pdf",
];

/// Path substrings that are never synced, applied identically on every
/// pass: version-control internals, bytecode caches, temp and runtime
/// paths.
pub const SKIP_SUBSTRINGS: &[&str] = &[".git/", "__pycache__/", ".pyc", "/tmp/", "/opt/conda/"];

/// Interval between background pulls during an interactive session.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// Result of one pull pass. New files are tracked so they can be announced;
/// updates stay silent to keep background syncs out of the user's terminal.
/// The new-vs-updated distinction is a host-side existence check at copy
/// time and is best-effort.
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub files_copied: usize,
    pub new_files: Vec<PathBuf>,
    pub failures: usize,
}

/// Bidirectional copy engine over one sandbox backend.
#[derive(Clone)]
pub struct SyncEngine {
    backend: Arc<dyn SandboxBackend>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self { backend }
    }

    /// Whether a sandbox path is excluded from sync.
    pub fn should_skip(path: &str) -> bool {
        SKIP_SUBSTRINGS.iter().any(|skip| path.contains(skip))
    }

    /// Map an absolute sandbox path to its mirror location on the host:
    /// `(relative path, absolute host path)`. Paths outside the workspace
    /// root are not mirrored.
    pub fn host_destination(
        workspace_root: &str,
        project_root: &Path,
        sandbox_path: &str,
    ) -> Option<(PathBuf, PathBuf)> {
        let prefix = format!("{}/", workspace_root.trim_end_matches('/'));
        let rel = sandbox_path.strip_prefix(&prefix)?;
        if rel.is_empty() {
            return None;
        }
        let rel = PathBuf::from(rel);
        let host = project_root.join(&rel);
        Some((rel, host))
    }

    /// Host -> sandbox: wholesale copy of the project tree. No-op in mount
    /// mode.
    pub async fn push(&self) -> Result<()> {
        if self.backend.file_access() != FileAccessMode::Copy {
            return Ok(());
        }
        if !self.backend.instance_exists().await {
            return Err(Error::sync("the sandbox does not exist; run 'pl env setup' first"));
        }
        println!("Syncing files to the sandbox...");
        self.backend.copy_in().await
    }

    /// Sandbox -> host: scan, filter, mirror. No-op in mount mode. Copy
    /// failures for individual files are counted and logged but do not
    /// abort the pass.
    pub async fn pull(&self, quiet: bool) -> Result<SyncReport> {
        if self.backend.file_access() != FileAccessMode::Copy {
            return Ok(SyncReport::default());
        }
        if !self.backend.instance_exists().await {
            return Err(Error::sync("the sandbox does not exist; nothing to sync from"));
        }

        let patterns: Vec<String> = SYNC_PATTERNS.iter().map(|p| p.to_string()).collect();
        let candidates = self.backend.list_workspace_files(&patterns).await?;

        let workspace_root = self.backend.workspace_root().to_string();
        let project_root = self.backend.layout().project_root.clone();
        let mut report = SyncReport::default();

        for sandbox_path in candidates {
            let sandbox_path = sandbox_path.trim();
            if sandbox_path.is_empty() || Self::should_skip(sandbox_path) {
                continue;
            }
            let Some((rel, host)) =
                Self::host_destination(&workspace_root, &project_root, sandbox_path)
            else {
                continue;
            };

            let is_new = !host.exists();
            if let Some(parent) = host.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!(path = %host.display(), error = %e, "cannot create sync directory");
                    report.failures += 1;
                    continue;
                }
            }

            match self.backend.copy_out(sandbox_path, &host).await {
                Ok(()) => {
                    report.files_copied += 1;
                    if is_new {
                        if !quiet {
                            println!("New file: {}", rel.display());
                        }
                        report.new_files.push(rel);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = sandbox_path, error = %e, "file copy failed");
                    report.failures += 1;
                }
            }
        }

        if !quiet && !report.new_files.is_empty() {
            println!("Synced {} new file(s) from the sandbox", report.new_files.len());
        }
        Ok(report)
    }

    /// Background worker for interactive sessions: pull quietly on a fixed
    /// interval until the token is cancelled. Errors are logged at debug
    /// level only, to keep the user's terminal clean.
    pub async fn pull_periodically(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(SYNC_INTERVAL) => {
                    if let Err(e) = self.pull(true).await {
                        tracing::debug!(error = %e, "background sync pass failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_sandbox_core::ProjectLayout;
    use pl_sandbox_mock::MockBackend;

    fn engine_over(mock: MockBackend) -> (SyncEngine, Arc<MockBackend>) {
        let mock = Arc::new(mock);
        (SyncEngine::new(mock.clone()), mock)
    }

    fn mock_with_project(root: &Path) -> MockBackend {
        let mock = MockBackend::new(ProjectLayout::rooted_at(root));
        mock.state().exists = true;
        mock
    }

    #[test]
    fn deny_list_filters_by_substring_regardless_of_extension() {
        assert!(SyncEngine::should_skip("/workspace/.git/hooks/pre-commit.py"));
        assert!(SyncEngine::should_skip("/workspace/lib/__pycache__/mod.py"));
        assert!(SyncEngine::should_skip("/workspace/a.pyc"));
        assert!(SyncEngine::should_skip("/opt/conda/lib/site.py"));
        assert!(!SyncEngine::should_skip("/workspace/practice/basic/001.py"));
    }

    #[test]
    fn host_destination_mirrors_relative_paths() {
        let (rel, host) = SyncEngine::host_destination(
            "/workspace",
            Path::new("/proj"),
            "/workspace/practice/basic/001.py",
        )
        .unwrap();
        assert_eq!(rel, PathBuf::from("practice/basic/001.py"));
        assert_eq!(host, PathBuf::from("/proj/practice/basic/001.py"));
    }

    #[test]
    fn host_destination_rejects_paths_outside_the_workspace() {
        assert!(SyncEngine::host_destination("/workspace", Path::new("/proj"), "/etc/passwd")
            .is_none());
        assert!(
            SyncEngine::host_destination("/workspace", Path::new("/proj"), "/workspace/").is_none()
        );
    }

    #[tokio::test]
    async fn pull_copies_matching_files_and_reports_new_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = mock_with_project(tmp.path());
        mock.state()
            .files
            .insert("/workspace/notes.md".into(), b"# notes".to_vec());
        mock.state()
            .files
            .insert("/workspace/out/plot.png".into(), vec![1, 2, 3]);
        let (engine, _mock) = engine_over(mock);

        let report = engine.pull(false).await.unwrap();

        assert_eq!(report.files_copied, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(report.new_files.len(), 2);
        assert_eq!(
            std::fs::read(tmp.path().join("notes.md")).unwrap(),
            b"# notes"
        );
        assert_eq!(std::fs::read(tmp.path().join("out/plot.png")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn pull_twice_is_idempotent_and_reports_no_new_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = mock_with_project(tmp.path());
        mock.state()
            .files
            .insert("/workspace/script.py".into(), b"print('hi')".to_vec());
        let (engine, _mock) = engine_over(mock);

        let first = engine.pull(false).await.unwrap();
        let after_first = std::fs::read(tmp.path().join("script.py")).unwrap();
        let second = engine.pull(false).await.unwrap();
        let after_second = std::fs::read(tmp.path().join("script.py")).unwrap();

        assert_eq!(first.new_files.len(), 1);
        assert_eq!(second.new_files.len(), 0);
        assert_eq!(second.files_copied, 1);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn pull_never_copies_denied_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = mock_with_project(tmp.path());
        mock.state()
            .files
            .insert("/workspace/.git/config.md".into(), b"internal".to_vec());
        mock.state()
            .files
            .insert("/workspace/keep.md".into(), b"keep".to_vec());
        let (engine, _mock) = engine_over(mock);

        let report = engine.pull(true).await.unwrap();

        assert_eq!(report.files_copied, 1);
        assert!(!tmp.path().join(".git/config.md").exists());
        assert!(tmp.path().join("keep.md").exists());
    }

    #[tokio::test]
    async fn pull_counts_individual_copy_failures_without_aborting() {
        let tmp = tempfile::tempdir().unwrap();
        // A plain file where a sync directory must go makes that one copy
        // fail while the rest of the pass proceeds.
        std::fs::write(tmp.path().join("blocked"), b"in the way").unwrap();
        let mock = mock_with_project(tmp.path());
        mock.state()
            .files
            .insert("/workspace/blocked/out.md".into(), b"unreachable".to_vec());
        mock.state()
            .files
            .insert("/workspace/good.md".into(), b"ok".to_vec());
        let (engine, _mock) = engine_over(mock);

        let report = engine.pull(true).await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.files_copied, 1);
        assert!(tmp.path().join("good.md").exists());
    }

    #[tokio::test]
    async fn push_and_pull_are_no_ops_in_mount_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockBackend::new(ProjectLayout::rooted_at(tmp.path()))
            .with_file_access(FileAccessMode::Mount);
        let (engine, mock) = engine_over(mock);

        engine.push().await.unwrap();
        let report = engine.pull(false).await.unwrap();

        assert_eq!(report.files_copied, 0);
        assert_eq!(mock.count_calls("copy_in"), 0);
        assert_eq!(mock.count_calls("list_files"), 0);
    }

    #[tokio::test]
    async fn push_requires_an_existing_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockBackend::new(ProjectLayout::rooted_at(tmp.path()));
        let (engine, _mock) = engine_over(mock);

        assert!(matches!(engine.push().await, Err(Error::Sync { .. })));
    }

    #[tokio::test]
    async fn background_worker_stops_on_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = mock_with_project(tmp.path());
        let (engine, _mock) = engine_over(mock);

        let token = CancellationToken::new();
        let worker = tokio::spawn({
            let engine = engine.clone();
            let token = token.clone();
            async move { engine.pull_periodically(token).await }
        });

        token.cancel();
        // A cancelled worker must finish promptly; join failure here would
        // mean an orphaned sync task.
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker did not stop on cancellation")
            .unwrap();
    }
}
