//! Advisory locking for the task store
//!
//! Mutations are serialized across processes by a marker file
//! (`.stm/lock`) created with exclusive-create semantics:
//! - The marker records the holder's pid, command and acquisition time
//! - A marker whose pid is dead, or that is older than the stale threshold,
//!   is reclaimed instead of waited on
//! - Waiters poll at a fixed interval until their timeout elapses
//! - Release only removes a marker carrying this acquisition's token
//!
//! The lock is cooperative: it only excludes processes that use it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cleanup;
use crate::config::LockConfig;
use crate::error::{Error, Result};

/// Contents of a lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub command: String,
    pub acquired_at: DateTime<Utc>,
    /// Unique per acquisition; release checks it before removing the marker
    pub token: String,
}

impl LockHolder {
    fn new(command: &str) -> Self {
        Self {
            pid: std::process::id(),
            command: command.to_string(),
            acquired_at: Utc::now(),
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Time since the marker was written (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Lock timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub stale_threshold_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            poll_interval_ms: config.poll_interval_ms,
            stale_threshold_ms: config.stale_threshold_ms,
        }
    }
}

/// What was found at the marker path
#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Missing,
    Held(LockHolder),
    /// Present but not decodable, e.g. caught between create and write
    Unreadable {
        content: Vec<u8>,
        modified: Option<SystemTime>,
    },
}

/// Cross-process lock over a marker file
#[derive(Debug)]
pub struct AdvisoryLock {
    path: PathBuf,
    options: LockOptions,
    command: String,
}

impl AdvisoryLock {
    pub fn new(path: impl Into<PathBuf>, options: LockOptions) -> Self {
        cleanup::register_instance();
        Self {
            path: path.into(),
            options,
            command: default_command(),
        }
    }

    /// Override the command recorded in the marker
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> LockOptions {
        self.options
    }

    /// Acquire the lock, waiting up to the configured timeout
    pub fn acquire(&self) -> Result<LockGuard> {
        self.acquire_within(self.options.timeout_ms)
    }

    /// Acquire the lock, waiting up to `timeout_ms`
    ///
    /// Fails with `Error::LockTimeout` naming the holder at the time of
    /// giving up.
    pub fn acquire_within(&self, timeout_ms: u64) -> Result<LockGuard> {
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let poll_interval = Duration::from_millis(self.options.poll_interval_ms);

        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::LockTimeout {
                    path: self.path.clone(),
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    holder: self.holder()?,
                });
            }
            std::thread::sleep(poll_interval.min(timeout - elapsed));
        }
    }

    /// Make one attempt, reclaiming a stale marker on the way
    ///
    /// Returns `Ok(None)` when a live holder has the lock.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        // A reclaimed or vanished marker earns one immediate retry.
        for _ in 0..2 {
            if let Some(guard) = self.try_create()? {
                return Ok(Some(guard));
            }
            match self.observe()? {
                Observed::Missing => continue,
                observed if self.is_stale(&observed) => {
                    self.reclaim(&observed)?;
                    continue;
                }
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Current holder, if the marker exists and is readable
    pub fn holder(&self) -> Result<Option<LockHolder>> {
        Ok(match self.observe()? {
            Observed::Held(holder) => Some(holder),
            Observed::Missing | Observed::Unreadable { .. } => None,
        })
    }

    fn try_create(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(Error::Io(err)),
        };

        let holder = LockHolder::new(&self.command);
        let payload = serde_json::to_vec(&holder)?;
        if let Err(err) = file.write_all(&payload).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&self.path);
            return Err(Error::Io(err));
        }

        cleanup::track(&self.path, &holder.token);
        Ok(Some(LockGuard {
            path: self.path.clone(),
            holder,
            released: false,
        }))
    }

    fn observe(&self) -> Result<Observed> {
        observe_path(&self.path)
    }

    fn is_stale(&self, observed: &Observed) -> bool {
        let threshold = Duration::from_millis(self.options.stale_threshold_ms);
        match observed {
            Observed::Missing => false,
            Observed::Held(holder) => !process_alive(holder.pid) || holder.age() > threshold,
            Observed::Unreadable { modified, .. } => modified
                .and_then(|time| time.elapsed().ok())
                .map(|age| age > threshold)
                .unwrap_or(false),
        }
    }

    /// Remove a stale marker, unless it changed since it was judged stale
    ///
    /// The marker is first renamed to a private name, so what gets checked
    /// is exactly what was taken. A marker that turns out to be a fresh one
    /// from another acquirer is linked back into place, unless a third
    /// acquirer took the free path in between.
    fn reclaim(&self, observed: &Observed) -> Result<()> {
        let parked = self.parked_path();
        match fs::rename(&self.path, &parked) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::Io(err)),
        }

        let taken = observe_path(&parked);
        if matches!(&taken, Ok(found) if found == observed) {
            let _ = fs::remove_file(&parked);
            if let Observed::Held(holder) = observed {
                tracing::debug!(
                    pid = holder.pid,
                    command = %holder.command,
                    acquired_at = %holder.acquired_at,
                    "reclaimed stale lock"
                );
            } else {
                tracing::debug!(path = %self.path.display(), "reclaimed unreadable lock marker");
            }
            return Ok(());
        }

        tracing::debug!(path = %self.path.display(), "lock marker changed before reclaim; restoring");
        self.restore(&parked)?;
        taken.map(|_| ())
    }

    /// Put a parked marker back unless a new one already took its place
    fn restore(&self, parked: &Path) -> Result<()> {
        let linked = match fs::hard_link(parked, &self.path) {
            Ok(()) => Ok(()),
            // Someone acquired in the meantime; their marker stays.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            // No hard links on this filesystem.
            Err(_) => fs::rename(parked, &self.path),
        };
        let _ = fs::remove_file(parked);
        linked.map_err(Error::Io)
    }

    fn parked_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lock".to_string());
        self.path
            .with_file_name(format!("{name}.stale-{}", Uuid::new_v4().simple()))
    }
}

fn observe_path(path: &Path) -> Result<Observed> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Observed::Missing),
        Err(err) => return Err(Error::Io(err)),
    };
    match serde_json::from_slice::<LockHolder>(&content) {
        Ok(holder) => Ok(Observed::Held(holder)),
        Err(_) => {
            let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok();
            Ok(Observed::Unreadable { content, modified })
        }
    }
}

impl Clone for AdvisoryLock {
    fn clone(&self) -> Self {
        cleanup::register_instance();
        Self {
            path: self.path.clone(),
            options: self.options,
            command: self.command.clone(),
        }
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        cleanup::unregister_instance();
    }
}

/// A held lock; the marker is removed on `release` or drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    holder: LockHolder,
    released: bool,
}

impl LockGuard {
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing I/O errors that drop would swallow
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_marker(&self.path, &self.holder.token).map(|_| ())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = release_marker(&self.path, &self.holder.token);
        }
    }
}

/// Remove the marker at `path` if it carries `token`
///
/// Returns whether a marker was removed. A missing marker, or one written by
/// another acquisition, is left alone and is not an error.
pub fn release_marker(path: &Path, token: &str) -> Result<bool> {
    let outcome = remove_owned_marker(path, token);
    cleanup::untrack(path, token);
    outcome
}

fn remove_owned_marker(path: &Path, token: &str) -> Result<bool> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(Error::Io(err)),
    };
    let owned = serde_json::from_slice::<LockHolder>(&content)
        .map(|holder| holder.token == token)
        .unwrap_or(false);
    if !owned {
        return Ok(false);
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Whether `pid` might still be running.
///
/// Only "no such process" counts as dead; a permission error means the
/// process exists under another user.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };
    !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}

fn default_command() -> String {
    let mut command = std::env::args().collect::<Vec<_>>().join(" ");
    if command.len() > 200 {
        let mut cut = 200;
        while !command.is_char_boundary(cut) {
            cut -= 1;
        }
        command.truncate(cut);
    }
    if command.is_empty() {
        "stm".to_string()
    } else {
        command
    }
}
