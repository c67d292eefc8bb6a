mod support;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use stm::error::Error;
use stm::lock::{AdvisoryLock, LockHolder, LockOptions};
use stm::task::{NewTask, TaskFilter, TaskPatch};

use support::TestStore;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READY_TIMEOUT: Duration = Duration::from_secs(5);

fn stm_bin() -> PathBuf {
    cargo_bin("stm")
}

/// Re-run this test binary as a separate process that holds `lock_path`
fn spawn_lock_holder(lock_path: &Path, ready_path: &Path) -> std::io::Result<Child> {
    Command::new(std::env::current_exe()?)
        .args(["--exact", "lock_helper_process", "--nocapture"])
        .env("STM_LOCK_HELPER", "1")
        .env("STM_LOCK_PATH", lock_path.display().to_string())
        .env("STM_LOCK_READY", ready_path.display().to_string())
        .spawn()
}

fn wait_ready(child: &mut Child, ready_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    while !ready_path.exists() {
        if start.elapsed() > READY_TIMEOUT {
            let _ = child.kill();
            return Err("lock helper not ready".into());
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
    Ok(())
}

#[test]
fn lock_helper_process() {
    if std::env::var("STM_LOCK_HELPER").ok().as_deref() != Some("1") {
        return;
    }

    let path = std::env::var("STM_LOCK_PATH").expect("STM_LOCK_PATH");
    let ready = std::env::var("STM_LOCK_READY").expect("STM_LOCK_READY");

    let lock = AdvisoryLock::new(&path, LockOptions::default()).with_command("lock helper");
    let _guard = lock.acquire().expect("lock helper acquire");
    // Give the signal watcher time to register before reporting ready.
    thread::sleep(Duration::from_millis(200));
    std::fs::write(&ready, "ready").expect("ready write");
    thread::sleep(Duration::from_secs(3));
}

#[test]
fn parallel_creates_in_threads_get_unique_ids() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestStore::init();
    let count = 12;
    let barrier = Arc::new(Barrier::new(count));

    let mut handles = Vec::with_capacity(count);
    for idx in 0..count {
        let barrier = Arc::clone(&barrier);
        let store = env.open();
        handles.push(thread::spawn(move || {
            barrier.wait();
            store.create(NewTask::new(format!("Thread task {idx}")))
        }));
    }

    let mut ids = Vec::with_capacity(count);
    for handle in handles {
        ids.push(handle.join().expect("join thread")?.id);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=count as u64).collect::<Vec<_>>());

    let listed = env.open().list(&TaskFilter::default())?;
    assert_eq!(listed.len(), count);
    assert!(!env.lock_path().exists());
    Ok(())
}

#[test]
fn parallel_creates_across_processes_get_unique_ids() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestStore::init();
    let root = env.path().to_path_buf();
    let bin = Arc::new(stm_bin());
    let count = 6;

    let mut handles = Vec::new();
    for idx in 0..count {
        let root = root.clone();
        let bin = Arc::clone(&bin);
        handles.push(thread::spawn(move || {
            Command::new(bin.as_ref())
                .current_dir(&root)
                .args(["--quiet", "add"])
                .arg(format!("Process task {idx}"))
                .status()
        }));
    }

    for handle in handles {
        let status = handle.join().expect("join thread")?;
        assert!(status.success());
    }

    let tasks = env.open().list(&TaskFilter::default())?;
    let ids: Vec<u64> = tasks.iter().map(|task| task.id).collect();
    assert_eq!(ids, (1..=count as u64).collect::<Vec<_>>());

    let titles: HashSet<&str> = tasks.iter().map(|task| task.title.as_str()).collect();
    for idx in 0..count {
        assert!(titles.contains(format!("Process task {idx}").as_str()));
    }
    Ok(())
}

#[test]
fn parallel_updates_do_not_lose_writes() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestStore::init();
    env.open().create(NewTask::new("Shared"))?;

    let count = 8;
    let barrier = Arc::new(Barrier::new(count));
    let mut handles = Vec::with_capacity(count);
    for idx in 0..count {
        let barrier = Arc::clone(&barrier);
        let store = env.open();
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut patch = TaskPatch::new();
            patch.add_tags = vec![format!("t{idx}")];
            store.update(1, patch)
        }));
    }
    for handle in handles {
        handle.join().expect("join thread")?;
    }

    let task = env.open().get(1)?;
    assert_eq!(task.tags.len(), count);
    for idx in 0..count {
        assert!(task.has_tag(&format!("t{idx}")));
    }
    Ok(())
}

#[test]
fn mutation_times_out_while_other_process_holds_lock() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestStore::init_with_config(
        "[lock]\ntimeout_ms = 200\npoll_interval_ms = 10\nstale_threshold_ms = 30000\n",
    );
    let ready_path = env.path().join("ready");
    let mut child = spawn_lock_holder(&env.lock_path(), &ready_path)?;
    wait_ready(&mut child, &ready_path)?;

    let start = Instant::now();
    match env.open().create(NewTask::new("Blocked")) {
        Err(Error::LockTimeout { holder, waited_ms, .. }) => {
            let holder = holder.expect("holder named");
            assert_eq!(holder.pid, child.id());
            assert_eq!(holder.command, "lock helper");
            assert!(waited_ms >= 200);
        }
        other => {
            let _ = child.kill();
            return Err(format!("expected lock timeout, got {other:?}").into());
        }
    }
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(env.task_files().is_empty());

    child.wait()?;
    assert!(!env.lock_path().exists());
    assert_eq!(env.open().create(NewTask::new("After"))?.id, 1);
    Ok(())
}

#[cfg(unix)]
#[test]
fn marker_from_dead_process_is_reclaimed() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestStore::init();
    let holder = LockHolder {
        pid: i32::MAX as u32,
        command: "stm add crashed".to_string(),
        acquired_at: chrono::Utc::now(),
        token: "crashed".to_string(),
    };
    std::fs::write(env.lock_path(), serde_json::to_vec(&holder)?)?;

    let start = Instant::now();
    let task = env.open().create(NewTask::new("Recovered"))?;
    assert_eq!(task.id, 1);
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(!env.lock_path().exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn killed_holder_does_not_block_forever() -> Result<(), Box<dyn std::error::Error>> {
    let env = TestStore::init();
    let ready_path = env.path().join("ready");
    let mut child = spawn_lock_holder(&env.lock_path(), &ready_path)?;
    wait_ready(&mut child, &ready_path)?;

    // SIGKILL leaves the marker behind.
    child.kill()?;
    child.wait()?;
    assert!(env.lock_path().exists());

    let start = Instant::now();
    env.open().create(NewTask::new("After crash"))?;
    assert!(start.elapsed() < Duration::from_secs(4));
    Ok(())
}

#[cfg(unix)]
#[test]
fn terminated_holder_releases_marker() -> Result<(), Box<dyn std::error::Error>> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let env = TestStore::init();
    let ready_path = env.path().join("ready");
    let mut child = spawn_lock_holder(&env.lock_path(), &ready_path)?;
    wait_ready(&mut child, &ready_path)?;
    assert!(env.lock_path().exists());

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM)?;
    let status = child.wait()?;
    assert_eq!(status.code(), Some(143));
    assert!(!env.lock_path().exists());
    Ok(())
}
