//! Release of held lock markers when the process dies abnormally.
//!
//! Guards release their marker on drop, but drop never runs on
//! `process::exit`, on a fatal signal, or under `panic = "abort"`. Every lock
//! marker this process writes is tracked here, together with the thread that
//! took it, until it is released. The first [`crate::lock::AdvisoryLock`]
//! installs hooks that sweep the list:
//! - a panic hook, chained in front of the existing one, that releases the
//!   markers of the panicking thread only. Other threads may still be inside
//!   their critical sections, and a caught panic must not free their locks.
//! - on Unix, a thread waiting for SIGINT/SIGTERM that releases everything
//!   and exits.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, Once};
use std::thread::{self, ThreadId};

use crate::lock;

struct Held {
    path: PathBuf,
    token: String,
    owner: ThreadId,
}

struct Registry {
    instances: AtomicUsize,
    held: Mutex<Vec<Held>>,
    hooks: Once,
}

static REGISTRY: Registry = Registry {
    instances: AtomicUsize::new(0),
    held: Mutex::new(Vec::new()),
    hooks: Once::new(),
};

fn held() -> MutexGuard<'static, Vec<Held>> {
    REGISTRY
        .held
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Count a new lock instance; the first one installs the exit hooks.
pub fn register_instance() {
    REGISTRY.instances.fetch_add(1, Ordering::SeqCst);
    REGISTRY.hooks.call_once(install_hooks);
}

/// Hooks stay installed after the count drops to zero.
pub fn unregister_instance() {
    let _ = REGISTRY
        .instances
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
}

/// Number of live lock instances in this process
pub fn instance_count() -> usize {
    REGISTRY.instances.load(Ordering::SeqCst)
}

/// Record a marker written by the current thread
pub(crate) fn track(path: &Path, token: &str) {
    held().push(Held {
        path: path.to_path_buf(),
        token: token.to_string(),
        owner: thread::current().id(),
    });
}

pub(crate) fn untrack(path: &Path, token: &str) {
    held().retain(|entry| !(entry.path == path && entry.token == token));
}

/// Release every marker this process holds.
///
/// Returns how many markers were removed. Call this before
/// `std::process::exit`, which skips destructors.
pub fn release_all() -> usize {
    release_where(|_| true)
}

/// Release the markers taken by `owner`
fn release_owned_by(owner: ThreadId) -> usize {
    release_where(|entry| entry.owner == owner)
}

fn release_where(matches: impl Fn(&Held) -> bool) -> usize {
    let targets: Vec<Held> = {
        let mut held = held();
        let (targets, rest): (Vec<_>, Vec<_>) = held.drain(..).partition(|entry| matches(entry));
        *held = rest;
        targets
    };

    targets
        .iter()
        .filter(|entry| lock::release_marker(&entry.path, &entry.token).unwrap_or(false))
        .count()
}

fn install_hooks() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let released = release_owned_by(thread::current().id());
        if released > 0 {
            tracing::debug!(released, "released lock markers after panic");
        }
        previous(info);
    }));

    #[cfg(unix)]
    spawn_signal_watcher();
}

#[cfg(unix)]
fn spawn_signal_watcher() {
    let spawned = std::thread::Builder::new()
        .name("stm-lock-cleanup".to_string())
        .spawn(|| {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::debug!(error = %err, "signal watcher unavailable");
                    return;
                }
            };
            runtime.block_on(watch_signals());
        });
    if let Err(err) = spawned {
        tracing::debug!(error = %err, "failed to spawn signal watcher");
    }
}

#[cfg(unix)]
async fn watch_signals() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut interrupt, mut terminate) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            (Err(err), _) | (_, Err(err)) => {
                tracing::debug!(error = %err, "failed to register signal handlers");
                return;
            }
        };

    let code = tokio::select! {
        _ = interrupt.recv() => 130,
        _ = terminate.recv() => 143,
    };
    let released = release_all();
    tracing::debug!(released, code, "released lock markers on signal");
    std::process::exit(code);
}
