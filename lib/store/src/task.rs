//! Task definitions stored as `<tasks_dir>/<id>.md` documents.

use crate::error::StoreError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use taskward_core::{TaskDefinition, TaskId, TaskMetadata, TaskStore};
use tokio::fs;

const TASK_EXTENSION: &str = "md";

/// Reads a task document from an arbitrary path.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn load_task_file(path: &Path) -> Result<TaskDefinition, Report<StoreError>> {
    let document = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::io(path, &e))?;
    Ok(parse(path, &document)?)
}

fn parse(path: &Path, document: &str) -> Result<TaskDefinition, StoreError> {
    TaskDefinition::from_document(document).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Directory of task documents.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    /// Creates a store over `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The task directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, id: &TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        let path = self.task_file_path(id);
        let document = match fs::read_to_string(&path).await {
            Ok(document) => document,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, &e)),
        };
        let task = parse(&path, &document)?;
        if &task.id != id {
            return Err(StoreError::IdMismatch {
                expected: id.to_string(),
                found: task.id.to_string(),
            });
        }
        Ok(Some(task))
    }

    /// Writes a task, replacing any existing definition with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the task cannot be rendered or written.
    pub async fn save_task(&self, task: &TaskDefinition) -> Result<PathBuf, Report<StoreError>> {
        let path = self.task_file_path(&task.id);
        let document = task.to_document().map_err(|e| StoreError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, &e))?;
        fs::write(&path, document)
            .await
            .map_err(|e| StoreError::io(&path, &e))?;
        tracing::debug!(task_id = %task.id, path = %path.display(), "saved task");
        Ok(path)
    }

    /// Deletes a task. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn delete_task(&self, id: &TaskId) -> Result<bool, Report<StoreError>> {
        let path = self.task_file_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, &e).into()),
        }
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    type Error = StoreError;

    fn task_file_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{id}.{TASK_EXTENSION}"))
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        self.read(id).await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskMetadata>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, &e)),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, &e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TASK_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| TaskId::new(s).ok())
            else {
                continue;
            };
            match self.read(&id).await {
                Ok(Some(task)) => tasks.push(task.metadata()),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable task");
                }
            }
        }
        tasks.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(tasks)
    }

    async fn exists(&self, id: &TaskId) -> Result<bool, StoreError> {
        fs::try_exists(self.task_file_path(id))
            .await
            .map_err(|e| StoreError::io(&self.task_file_path(id), &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskward_core::InvocationMode;

    fn task(id: &str) -> TaskDefinition {
        TaskDefinition::new(
            TaskId::new(id).expect("valid id"),
            "0 9 * * *",
            "Summarize the inbox.",
        )
    }

    #[tokio::test]
    async fn save_then_get() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(dir.path().join("tasks"));
        let original = task("inbox").with_invocation(InvocationMode::Api);

        let path = store.save_task(&original).await.expect("save");
        assert_eq!(path, dir.path().join("tasks").join("inbox.md"));
        assert!(store.exists(&original.id).await.expect("exists"));

        let loaded = store.get_task(&original.id).await.expect("get").expect("present");
        assert_eq!(loaded, original);

        let from_path = load_task_file(&path).await.expect("load");
        assert_eq!(from_path, original);
    }

    #[tokio::test]
    async fn missing_task_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(dir.path());
        let id = TaskId::new("ghost").expect("valid id");
        assert_eq!(store.get_task(&id).await.expect("get"), None);
        assert!(!store.exists(&id).await.expect("exists"));
        assert!(!store.delete_task(&id).await.expect("delete"));
    }

    #[tokio::test]
    async fn list_skips_foreign_and_broken_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(dir.path());
        store.save_task(&task("beta")).await.expect("save");
        store.save_task(&task("alpha")).await.expect("save");
        std::fs::write(dir.path().join("notes.txt"), "not a task").expect("write");
        std::fs::write(dir.path().join("broken.md"), "no header").expect("write");

        let ids: Vec<String> = store
            .list_tasks()
            .await
            .expect("list")
            .into_iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, ["alpha", "beta"]);
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(dir.path().join("absent"));
        assert!(store.list_tasks().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn id_must_match_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(dir.path());
        let document = task("other").to_document().expect("render");
        std::fs::write(dir.path().join("inbox.md"), document).expect("write");

        let err = store
            .get_task(&TaskId::new("inbox").expect("valid id"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IdMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTaskStore::new(dir.path());
        let task = task("inbox");
        store.save_task(&task).await.expect("save");
        assert!(store.delete_task(&task.id).await.expect("delete"));
        assert!(!store.exists(&task.id).await.expect("exists"));
    }
}
