use super::{ProjectState, StateBackend, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory backend. State lives for the lifetime of the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, ProjectState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryStore {
    async fn read_state<R, F>(&self, project_id: &str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ProjectState) -> StoreResult<R> + Send + 'static,
    {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        match states.get(project_id) {
            Some(state) => f(state),
            None => f(&ProjectState::default()),
        }
    }

    async fn update_state<R, F>(&self, project_id: &str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ProjectState) -> StoreResult<R> + Send + 'static,
    {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = states.get(project_id).cloned().unwrap_or_default();
        let result = f(&mut state)?;
        if state.project.is_some() {
            states.insert(project_id.to_string(), state);
        }
        Ok(result)
    }

    async fn project_ids(&self) -> StoreResult<Vec<String>> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        Ok(states.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMap;
    use crate::errors::StoreError;
    use crate::project::Project;
    use crate::store::{ArtifactStore, GateStore, ProjectStore};

    #[tokio::test]
    async fn test_create_get_list() {
        let store = MemoryStore::new();
        store
            .create_project(Project::new("beta", "Beta", "ANALYSIS"))
            .await
            .unwrap();
        store
            .create_project(Project::new("alpha", "Alpha", "ANALYSIS"))
            .await
            .unwrap();

        let project = store.get_project("beta").await.unwrap();
        assert_eq!(project.name, "Beta");

        let ids: Vec<_> = store
            .list_projects()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_missing_project_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_project("ghost").await,
            Err(StoreError::ProjectNotFound { .. })
        ));
        assert!(matches!(
            store.list_gates("ghost").await,
            Err(StoreError::ProjectNotFound { .. })
        ));
        // A failed mutation leaves no trace behind.
        assert!(store.project_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_is_not_persisted() {
        let store = MemoryStore::new();
        let project = store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();
        let saved = store.save_project(&project).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut stale = project.clone();
        stale.current_phase = "SPEC_PM".into();
        assert!(store.save_project(&stale).await.is_err());
        assert_eq!(
            store.get_project("acme").await.unwrap().current_phase,
            "ANALYSIS"
        );
    }

    #[tokio::test]
    async fn test_artifacts_round_through_store() {
        let store = MemoryStore::new();
        store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();
        let mut map = ArtifactMap::new();
        map.insert("PRD.md".into(), "# PRD".into());
        let version = store.put_artifacts("acme", "SPEC_PM", &map).await.unwrap();
        assert_eq!(version, 1);

        let listed = store.list_artifacts("acme").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "PRD.md");
    }
}
