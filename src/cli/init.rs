//! stm init command implementation
//!
//! Creates `.stm/`, the task directory and a default `config.toml`.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::output::OutputOptions;
use crate::storage::{Storage, CONFIG_FILE, CONTROL_DIR};

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    control_dir: bool,
    tasks_dir: bool,
    config: bool,
}

pub fn run(root: Option<PathBuf>, output: OutputOptions) -> Result<()> {
    let root = match root {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    // An existing config decides where tasks live.
    let config = Config::load_from_root(&root)?;
    let storage = Storage::new(root.clone(), &config);

    let (created_control, created_tasks) = storage.init()?;
    let config_path = storage.config_file();
    let created_config = if config_path.exists() {
        false
    } else {
        config.save(&config_path)?;
        true
    };

    let report = InitReport {
        root: root.clone(),
        created: InitCreated {
            control_dir: created_control,
            tasks_dir: created_tasks,
            config: created_config,
        },
    };

    output.emit(&report, || {
        let mut created = Vec::new();
        if created_control {
            created.push(format!("{CONTROL_DIR}/"));
        }
        if created_tasks {
            created.push(format!("{CONTROL_DIR}/{}/", config.tasks.dir));
        }
        if created_config {
            created.push(format!("{CONTROL_DIR}/{CONFIG_FILE}"));
        }
        if created.is_empty() {
            format!("stm init: nothing to do in {}", root.display())
        } else {
            format!(
                "stm init: initialized task store in {}\n  created: {}",
                root.display(),
                created.join(", ")
            )
        }
    })
}
