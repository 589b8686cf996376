use super::{ProjectState, StateBackend, StoreResult};
use crate::errors::StoreError;
use crate::project::validate_slug;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File backend: `<dir>/<project>.json`, one document per project.
///
/// Every access takes an advisory lock on `<dir>/<project>.lock`, exclusive for
/// updates and shared for reads, so several CLI processes can work on the
/// same project without losing writes.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{project_id}.json"))
    }

    fn lock_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{project_id}.lock"))
    }

    fn open_lock(&self, project_id: &str) -> StoreResult<File> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.lock_path(project_id);
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Io { path, source })
    }

    fn load(&self, project_id: &str) -> StoreResult<ProjectState> {
        let path = self.state_path(project_id);
        if !path.exists() {
            return Ok(ProjectState::default());
        }
        let content =
            fs::read_to_string(&path).map_err(|source| StoreError::Io { path, source })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, project_id: &str, state: &ProjectState) -> StoreResult<()> {
        let path = self.state_path(project_id);
        let tmp = self.dir.join(format!("{project_id}.json.tmp"));
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }
}

impl FileStore {
    /// Ids become file names, so anything but a slug is refused.
    fn check_id(project_id: &str) -> StoreResult<()> {
        validate_slug(project_id).map_err(|_| StoreError::InvalidProjectId {
            id: project_id.to_string(),
        })
    }

    fn read_blocking<R>(
        &self,
        project_id: &str,
        f: impl FnOnce(&ProjectState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        Self::check_id(project_id)?;
        let lock = self.open_lock(project_id)?;
        lock.lock_shared().map_err(|source| StoreError::Io {
            path: self.lock_path(project_id),
            source,
        })?;
        // Lock released when `lock` drops.
        let state = self.load(project_id)?;
        f(&state)
    }

    fn update_blocking<R>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut ProjectState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        Self::check_id(project_id)?;
        let lock = self.open_lock(project_id)?;
        lock.lock_exclusive().map_err(|source| StoreError::Io {
            path: self.lock_path(project_id),
            source,
        })?;
        let mut state = self.load(project_id)?;
        let result = f(&mut state)?;
        if state.project.is_some() {
            self.save(project_id, &state)?;
        }
        Ok(result)
    }

    fn ids_blocking(&self) -> StoreResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Locks and file I/O run on the blocking pool; waiting for another process's
/// lock never stalls the runtime.
#[async_trait]
impl StateBackend for FileStore {
    async fn read_state<R, F>(&self, project_id: &str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ProjectState) -> StoreResult<R> + Send + 'static,
    {
        let store = self.clone();
        let id = project_id.to_string();
        tokio::task::spawn_blocking(move || store.read_blocking(&id, f)).await?
    }

    async fn update_state<R, F>(&self, project_id: &str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ProjectState) -> StoreResult<R> + Send + 'static,
    {
        let store = self.clone();
        let id = project_id.to_string();
        tokio::task::spawn_blocking(move || store.update_blocking(&id, f)).await?
    }

    async fn project_ids(&self) -> StoreResult<Vec<String>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.ids_blocking()).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMap;
    use crate::gates::{ApprovalGateRecord, GateStatus};
    use crate::project::Project;
    use crate::store::{ArtifactStore, GateStore, GateTransition, ProjectStore};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_survives_new_handle() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();
        let mut map = ArtifactMap::new();
        map.insert("project-brief.md".into(), "# Brief".into());
        store.put_artifacts("acme", "ANALYSIS", &map).await.unwrap();

        let reopened = FileStore::new(dir.path());
        let project = reopened.get_project("acme").await.unwrap();
        assert_eq!(project.name, "Acme");
        assert_eq!(reopened.list_artifacts("acme").await.unwrap().len(), 1);
        assert!(dir.path().join("acme.json").exists());
    }

    #[tokio::test]
    async fn test_list_projects_reads_directory() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("state"));
        assert!(store.list_projects().await.unwrap().is_empty());
        store
            .create_project(Project::new("one", "One", "ANALYSIS"))
            .await
            .unwrap();
        store
            .create_project(Project::new("two", "Two", "ANALYSIS"))
            .await
            .unwrap();
        let projects = store.list_projects().await.unwrap();
        assert_eq!(projects.len(), 2);
    }

    #[tokio::test]
    async fn test_reading_unknown_project_creates_no_state_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get_project("ghost").await.is_err());
        assert!(!dir.path().join("ghost.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_gate_decisions_only_one_wins() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();
        let record = ApprovalGateRecord::pending("acme", "stack_approved", "STACK_SELECTION");
        store.insert_gates("acme", vec![record.clone()]).await.unwrap();

        let mut handles = Vec::new();
        for status in [GateStatus::Approved, GateStatus::Rejected] {
            let store = store.clone();
            let mut update = record.clone();
            update.status = status;
            handles.push(tokio::spawn(async move {
                store
                    .transition_gate("acme", GateStatus::Pending, update)
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), GateTransition::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_is_serialization_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("acme.json"), "not json").unwrap();
        let store = FileStore::new(dir.path());
        let err = store.read_state("acme", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_path_like_ids_are_refused() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("state"));
        for id in ["../escape", "a/b", ""] {
            assert!(matches!(
                store.get_project(id).await,
                Err(StoreError::InvalidProjectId { .. })
            ));
        }
        let err = store
            .create_project(Project::new("../escape", "Escape", "ANALYSIS"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidProjectId { .. }));
        assert!(!dir.path().join("escape.json").exists());
        assert!(!dir.path().join("escape.lock").exists());
    }

    #[tokio::test]
    async fn test_waiting_on_lock_does_not_block_runtime() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();

        // Another process holds the lock for a while.
        let held = store.open_lock("acme").unwrap();
        held.lock_exclusive().unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(400));
            drop(held);
        });

        let started = Instant::now();
        let reader = tokio::spawn({
            let store = store.clone();
            async move { store.get_project("acme").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(300));

        assert_eq!(reader.await.unwrap().unwrap().name, "Acme");
        release.join().unwrap();
    }
}
