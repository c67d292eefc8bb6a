//! Storage layout for stm
//!
//! All state lives in a `.stm/` control directory at the project root:
//!
//! ```text
//! .stm/
//!   config.toml               # Tunables (lock timing, size limits)
//!   lock                      # Lock marker, present only while held
//!   tasks/                    # One file per task
//!     <id>-<slug>.md
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::{Error, Result};

/// Name of the control directory
pub const CONTROL_DIR: &str = ".stm";

/// Name of the configuration file inside the control directory
pub const CONFIG_FILE: &str = "config.toml";

/// Name of the lock marker inside the control directory
pub const LOCK_FILE: &str = "lock";

/// Storage manager for stm state
#[derive(Debug, Clone)]
pub struct Storage {
    /// Project root (the directory holding `.stm/`)
    root: PathBuf,
    /// Task directory name, relative to the control directory
    tasks_dir_name: String,
}

impl Storage {
    /// Create a storage manager for the given project root
    pub fn new(root: PathBuf, config: &Config) -> Self {
        Self {
            root,
            tasks_dir_name: config.tasks.dir.clone(),
        }
    }

    /// Find the nearest ancestor of `start` (inclusive) holding `.stm/`
    pub fn discover(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|dir| dir.join(CONTROL_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    /// Path to the project root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the `.stm/` control directory
    pub fn control_dir(&self) -> PathBuf {
        self.root.join(CONTROL_DIR)
    }

    /// Path to the task directory
    pub fn tasks_dir(&self) -> PathBuf {
        self.control_dir().join(&self.tasks_dir_name)
    }

    /// Path to the lock marker
    pub fn lock_file(&self) -> PathBuf {
        self.control_dir().join(LOCK_FILE)
    }

    /// Path to the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.control_dir().join(CONFIG_FILE)
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the control and task directories.
    ///
    /// Returns `(created_control_dir, created_tasks_dir)`.
    pub fn init(&self) -> Result<(bool, bool)> {
        let created_control = ensure_dir(&self.control_dir())?;
        let created_tasks = ensure_dir(&self.tasks_dir())?;
        Ok((created_control, created_tasks))
    }

    /// Check if storage has been initialized
    pub fn is_initialized(&self) -> bool {
        self.control_dir().is_dir()
    }

    /// Error out unless `.stm/` exists
    pub fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.root.clone()))
        }
    }

    // =========================================================================
    // File I/O helpers (atomic writes for safety)
    // =========================================================================

    /// Write data atomically using temp file + rename
    ///
    /// The temp file lives in the target's directory so the rename never
    /// crosses filesystems; readers see either the old file or the new one.
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        write_atomic(path, data)
    }

    /// Read a file as UTF-8 text
    pub fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    /// Remove a file, treating "already gone" as success.
    ///
    /// Returns whether a file was removed.
    pub fn remove_if_exists(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

/// Atomically replace `path` with `data`
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path)?;
    Ok(true)
}
