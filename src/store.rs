//! Task store: create, read, update, delete and list task files.
//!
//! Every mutation runs under the store's [`AdvisoryLock`] and rewrites whole
//! files atomically. Reads take no lock. Ids are allocated by scanning the
//! task directory under the lock, so files added or removed by hand are
//! picked up by the next `create`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Dependent, Error, Result};
use crate::lock::{AdvisoryLock, LockOptions};
use crate::sections;
use crate::storage::Storage;
use crate::task::{
    next_updated, normalize_dependencies, normalize_tags, now_millis, parse_file_id,
    validate_body, validate_dependencies, validate_extension_key, validate_title, DeleteOptions,
    NewTask, Task, TaskFilter, TaskPatch, TASK_SCHEMA_VERSION,
};

/// A task file `list` could not parse
#[derive(Debug, Clone, serde::Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    storage: Storage,
    config: Config,
    lock: AdvisoryLock,
}

impl TaskStore {
    pub fn new(storage: Storage, config: Config) -> Self {
        let lock = AdvisoryLock::new(storage.lock_file(), LockOptions::from(&config.lock));
        Self {
            storage,
            config,
            lock,
        }
    }

    /// Open the store rooted at `root`, which must already hold `.stm/`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Config::load_from_root(&root)?;
        let storage = Storage::new(root, &config);
        storage.require_initialized()?;
        Ok(Self::new(storage, config))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock(&self) -> &AdvisoryLock {
        &self.lock
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.storage.tasks_dir()
    }

    /// Create a task with the next free id
    pub fn create(&self, input: NewTask) -> Result<Task> {
        let title = validate_title(&input.title, self.config.tasks.max_title_length)?;
        validate_body(&input.body, self.config.tasks.max_body_bytes)?;
        validate_dependencies(&input.dependencies)?;
        for key in input.extensions.keys() {
            validate_extension_key(key)?;
        }

        let _lock = self.lock.acquire()?;

        let id = self.next_id()?;
        let now = now_millis();
        let task = Task {
            schema: TASK_SCHEMA_VERSION,
            id,
            title,
            status: input.status.unwrap_or_default(),
            created: now,
            updated: now,
            tags: normalize_tags(input.tags),
            dependencies: normalize_dependencies(input.dependencies),
            body: input.body,
            extensions: input.extensions,
        };
        self.write_task(&task)?;
        tracing::debug!(id, file = %task.file_name(), "created task");
        Ok(task)
    }

    /// Read one task
    pub fn get(&self, id: u64) -> Result<Task> {
        // A rename removes the old file after writing the new one, so a file
        // that vanishes between lookup and read is looked up again.
        for _ in 0..3 {
            let path = self.find_path(id)?.ok_or(Error::NotFound(id))?;
            match self.read_task(id, &path) {
                Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => continue,
                other => return other,
            }
        }
        Err(Error::NotFound(id))
    }

    /// Apply a partial update and refresh `updated`
    pub fn update(&self, id: u64, patch: TaskPatch) -> Result<Task> {
        if let Some(title) = &patch.title {
            validate_title(title, self.config.tasks.max_title_length)?;
        }
        if let Some(body) = &patch.body {
            validate_body(body, self.config.tasks.max_body_bytes)?;
        }
        if let Some(dependencies) = &patch.dependencies {
            validate_dependencies(dependencies)?;
        }
        for (key, _) in &patch.fields {
            validate_extension_key(key)?;
        }
        for (_, content) in &patch.sections {
            sections::check_content(content)?;
        }

        let _lock = self.lock.acquire()?;

        let old_path = self.find_path(id)?.ok_or(Error::NotFound(id))?;
        let mut task = self.read_task(id, &old_path)?;
        patch.apply_to(&mut task);
        validate_body(&task.body, self.config.tasks.max_body_bytes)?;
        task.updated = next_updated(task.updated);

        let new_path = self.write_task(&task)?;
        if new_path != old_path {
            self.storage.remove_if_exists(&old_path)?;
            tracing::debug!(id, from = %old_path.display(), to = %new_path.display(), "renamed task file");
        }
        Ok(task)
    }

    /// Delete a task, refusing while other tasks depend on it unless forced
    pub fn delete(&self, id: u64, options: DeleteOptions) -> Result<()> {
        let _lock = self.lock.acquire()?;

        let path = self.find_path(id)?.ok_or(Error::NotFound(id))?;
        if !options.force {
            let dependents = self.dependents_of(id)?;
            if !dependents.is_empty() {
                return Err(Error::DependencyConflict { id, dependents });
            }
        }
        if !self.storage.remove_if_exists(&path)? {
            return Err(Error::NotFound(id));
        }
        tracing::debug!(id, force = options.force, "deleted task");
        Ok(())
    }

    /// All readable tasks matching `filter`, in ascending id order
    ///
    /// Files that fail to read or parse are skipped.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.list_with_skipped(filter)?.0)
    }

    /// Like [`TaskStore::list`], also returning the files that could not be read
    pub fn list_with_skipped(&self, filter: &TaskFilter) -> Result<(Vec<Task>, Vec<SkippedFile>)> {
        let mut tasks = Vec::new();
        let mut skipped = Vec::new();
        for (id, path) in self.scan()? {
            match self.read_task(id, &path) {
                Ok(task) if filter.matches(&task) => tasks.push(task),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "skipping unreadable task file");
                    skipped.push(SkippedFile {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok((tasks, skipped))
    }

    /// Tasks listing `id` among their dependencies, in ascending id order
    pub fn dependents_of(&self, id: u64) -> Result<Vec<Dependent>> {
        let mut dependents = Vec::new();
        for (other_id, path) in self.scan()? {
            if other_id == id {
                continue;
            }
            match self.read_task(other_id, &path) {
                Ok(task) if task.dependencies.contains(&id) => dependents.push(Dependent {
                    id: task.id,
                    title: task.title,
                }),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "skipping unreadable task file");
                }
            }
        }
        Ok(dependents)
    }

    /// One past the highest id present on disk
    pub fn next_id(&self) -> Result<u64> {
        let max = self.scan()?.last().map(|(id, _)| *id).unwrap_or(0);
        max.checked_add(1)
            .ok_or_else(|| Error::Validation("task ids exhausted".to_string()))
    }

    /// Path of the file holding `id`, if any
    pub fn find_path(&self, id: u64) -> Result<Option<PathBuf>> {
        Ok(self
            .scan()?
            .into_iter()
            .find(|(file_id, _)| *file_id == id)
            .map(|(_, path)| path))
    }

    /// Task files by id, ascending; with duplicate ids the first name wins
    fn scan(&self) -> Result<Vec<(u64, PathBuf)>> {
        let dir = self.storage.tasks_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Io(err)),
        };

        let mut files: Vec<(u64, String)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(id) = parse_file_id(&name) {
                files.push((id, name));
            }
        }
        files.sort();
        files.dedup_by_key(|(id, _)| *id);

        Ok(files
            .into_iter()
            .map(|(id, name)| (id, dir.join(name)))
            .collect())
    }

    fn read_task(&self, id: u64, path: &Path) -> Result<Task> {
        let text = match self.storage.read_to_string(path) {
            Ok(text) => text,
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
                return Err(Error::Parse {
                    path: Some(path.to_path_buf()),
                    line: None,
                    message: "task file is not valid UTF-8".to_string(),
                })
            }
            Err(err) => return Err(err),
        };
        let task = Task::from_file_text(&text).map_err(|err| err.with_path(path))?;
        if task.id != id {
            return Err(Error::Parse {
                path: Some(path.to_path_buf()),
                line: None,
                message: format!("metadata id {} does not match file name id {id}", task.id),
            });
        }
        Ok(task)
    }

    fn write_task(&self, task: &Task) -> Result<PathBuf> {
        let path = self.storage.tasks_dir().join(task.file_name());
        let text = task.to_file_text()?;
        self.storage.write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }
}
