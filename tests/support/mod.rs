#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use stm::config::Config;
use stm::storage::{Storage, CONFIG_FILE, CONTROL_DIR, LOCK_FILE};
use stm::store::TaskStore;
use tempfile::TempDir;

/// Lock timing that keeps contention tests fast
pub const FAST_LOCK_CONFIG: &str = "\
[lock]
timeout_ms = 5000
poll_interval_ms = 10
stale_threshold_ms = 30000
";

pub struct TestStore {
    dir: TempDir,
}

impl TestStore {
    /// An initialized `.stm/` with fast lock timing
    pub fn init() -> Self {
        Self::init_with_config(FAST_LOCK_CONFIG)
    }

    pub fn init_with_config(config: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = Self { dir };
        store.write_config(config).expect("write config");
        let config = Config::load_from_root(store.path()).expect("load config");
        Storage::new(store.path().to_path_buf(), &config)
            .init()
            .expect("init storage");
        store
    }

    /// A bare directory without `.stm/`
    pub fn uninitialized() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn control_dir(&self) -> PathBuf {
        self.dir.path().join(CONTROL_DIR)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.control_dir().join("tasks")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.control_dir().join(LOCK_FILE)
    }

    pub fn open(&self) -> TaskStore {
        TaskStore::open(self.path()).expect("open store")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.control_dir().join(CONFIG_FILE);
        fs::create_dir_all(self.control_dir())?;
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_task_file(&self, name: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.tasks_dir().join(name);
        fs::create_dir_all(self.tasks_dir())?;
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn read_task_file(&self, name: &str) -> std::io::Result<String> {
        fs::read_to_string(self.tasks_dir().join(name))
    }

    /// File names in the task directory, sorted
    pub fn task_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.tasks_dir())
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// A well-formed task file as another tool might have written it
pub fn task_file_text(id: u64, title: &str, extra: &str, body: &str) -> String {
    format!(
        "---\nschema: 1\nid: {id}\ntitle: {title}\nstatus: pending\ncreated: 2024-01-01T00:00:00.000Z\nupdated: 2024-01-01T00:00:00.000Z\n{extra}---\n{body}"
    )
}
