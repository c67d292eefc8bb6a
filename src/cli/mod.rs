//! Command-line interface for stm
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is implemented in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::output::OutputOptions;
use crate::storage::Storage;

mod init;
mod task;

/// stm - Simple Task Master
///
/// File-based task tracking: one Markdown file per task under `.stm/tasks/`,
/// safe to drive from several processes at once.
#[derive(Parser, Debug)]
#[command(name = "stm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project root holding `.stm/` (defaults to the nearest ancestor of the
    /// current directory that has one)
    #[arg(long, global = true, env = "STM_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create `.stm/` with a default config
    Init,

    /// Create a task
    Add {
        /// Task title
        title: String,

        /// Description (the unlabeled start of the body)
        #[arg(long)]
        description: Option<String>,

        /// Content for the "Details" section
        #[arg(long)]
        details: Option<String>,

        /// Content for the "Validation" section
        #[arg(long)]
        validation: Option<String>,

        /// Initial status: pending, in-progress, done
        #[arg(long)]
        status: Option<String>,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Comma-separated ids this task depends on
        #[arg(long = "deps", value_delimiter = ',')]
        dependencies: Vec<u64>,

        /// Custom fields as key=value (values are read as YAML: 3, true, [a, b])
        fields: Vec<String>,
    },

    /// Show one task
    Show {
        /// Task id
        id: u64,
    },

    /// Update a task
    Update {
        /// Task id
        id: u64,

        /// New title (renames the file)
        #[arg(long)]
        title: Option<String>,

        /// New status: pending, in-progress, done
        #[arg(long)]
        status: Option<String>,

        /// Replace all tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Add tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        add_tags: Vec<String>,

        /// Remove tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        remove_tags: Vec<String>,

        /// Replace all dependencies (comma-separated ids)
        #[arg(long = "deps", value_delimiter = ',')]
        dependencies: Option<Vec<u64>>,

        /// Replace the whole body
        #[arg(long)]
        body: Option<String>,

        /// Replace the description; empty removes it
        #[arg(long)]
        description: Option<String>,

        /// Replace the "Details" section; empty removes it
        #[arg(long)]
        details: Option<String>,

        /// Replace the "Validation" section; empty removes it
        #[arg(long)]
        validation: Option<String>,

        /// Custom fields as key=value; `key=` removes the field
        fields: Vec<String>,
    },

    /// Delete a task
    Delete {
        /// Task id
        id: u64,

        /// Delete even if other tasks depend on it
        #[arg(long)]
        force: bool,
    },

    /// List tasks
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,

        /// Only tasks carrying any of these tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Only tasks whose title or body contains this text (case-sensitive)
        #[arg(long)]
        search: Option<String>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Init => init::run(self.root, output),
            Commands::Add {
                title,
                description,
                details,
                validation,
                status,
                tags,
                dependencies,
                fields,
            } => task::run_add(task::AddOptions {
                title,
                description,
                details,
                validation,
                status,
                tags,
                dependencies,
                fields,
                root: self.root,
                output,
            }),
            Commands::Show { id } => task::run_show(id, self.root, output),
            Commands::Update {
                id,
                title,
                status,
                tags,
                add_tags,
                remove_tags,
                dependencies,
                body,
                description,
                details,
                validation,
                fields,
            } => task::run_update(task::UpdateOptions {
                id,
                title,
                status,
                tags,
                add_tags,
                remove_tags,
                dependencies,
                body,
                description,
                details,
                validation,
                fields,
                root: self.root,
                output,
            }),
            Commands::Delete { id, force } => task::run_delete(id, force, self.root, output),
            Commands::List {
                status,
                tags,
                search,
            } => task::run_list(task::ListOptions {
                status,
                tags,
                search,
                root: self.root,
                output,
            }),
        }
    }
}

/// Explicit root, else the nearest ancestor holding `.stm/`, else the
/// current directory
fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    let cwd = std::env::current_dir()?;
    Ok(Storage::discover(&cwd).unwrap_or(cwd))
}
