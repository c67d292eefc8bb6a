use std::fs;

use stm::config::Config;
use stm::error::Error;

#[test]
fn config_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_root(dir.path()).expect("defaults");

    assert_eq!(config, Config::default());
    assert_eq!(config.tasks.dir, "tasks");
    assert_eq!(config.lock.timeout_ms, 30_000);
}

#[test]
fn config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    fs::create_dir_all(dir.path().join(".stm"))?;
    let toml = r#"
[lock]
timeout_ms = 500
poll_interval_ms = 5

[tasks]
dir = "backlog"
max_title_length = 40
"#;
    fs::write(dir.path().join(".stm").join("config.toml"), toml)?;

    let config = Config::load_from_root(dir.path())?;

    assert_eq!(config.lock.timeout_ms, 500);
    assert_eq!(config.lock.poll_interval_ms, 5);
    assert_eq!(config.lock.stale_threshold_ms, 30_000);
    assert_eq!(config.tasks.dir, "backlog");
    assert_eq!(config.tasks.max_title_length, 40);
    assert_eq!(config.tasks.max_body_bytes, 64 * 1024);
    Ok(())
}

#[test]
fn config_rejects_bad_values() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");

    fs::write(&path, "[tasks]\ndir = \"../outside\"\n")?;
    assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));

    fs::write(&path, "[lock]\npoll_interval_ms = 0\n")?;
    assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));

    fs::write(&path, "[lock\n")?;
    assert!(matches!(Config::load(&path), Err(Error::TomlParse(_))));
    Ok(())
}

#[test]
fn config_save_roundtrips() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.tasks.dir = "work".to_string();
    config.save(&path)?;

    assert_eq!(Config::load(&path)?, config);
    Ok(())
}
