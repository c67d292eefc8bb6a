//! stm - Simple Task Master Library
//!
//! A local task tracker that keeps each task as a Markdown file with a YAML
//! metadata block, safe to drive from several processes at once.
//!
//! # Core Concepts
//!
//! - **Tasks**: one file per task, `<id>-<slug>.md`, the file is the only
//!   source of truth
//! - **Metadata block**: YAML front matter; unknown fields survive every
//!   read-modify-write cycle with their types and order intact
//! - **Sections**: the body as a description plus `## Heading` sections
//! - **Advisory lock**: a marker file serializing every mutation across
//!   processes, with stale-holder recovery
//!
//! # Module Organization
//!
//! - `metadata`: Metadata block codec and the `FieldValue` tree
//! - `sections`: Body section codec
//! - `lock`: Advisory lock over `.stm/lock`
//! - `cleanup`: Process-wide release of held lock markers
//! - `task`: Task model, validation and file naming
//! - `store`: CRUD over the task directory
//! - `storage`: On-disk layout and atomic writes
//! - `config`: Configuration loading from `.stm/config.toml`
//! - `error`: Error types and result aliases
//! - `output`, `cli`: Command-line front end

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod metadata;
pub mod output;
pub mod sections;
pub mod storage;
pub mod store;
pub mod task;

pub use error::{Error, Result};
pub use store::TaskStore;
pub use task::{DeleteOptions, NewTask, Task, TaskFilter, TaskPatch, TaskStatus};
