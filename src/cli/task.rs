//! Task command implementations

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::metadata::FieldValue;
use crate::output::{task_card, task_list, OutputOptions};
use crate::sections::{self, Sections, DESCRIPTION};
use crate::store::TaskStore;
use crate::task::{DeleteOptions, NewTask, TaskFilter, TaskPatch, TaskStatus};

use super::resolve_root;

pub struct AddOptions {
    pub title: String,
    pub description: Option<String>,
    pub details: Option<String>,
    pub validation: Option<String>,
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<u64>,
    pub fields: Vec<String>,
    pub root: Option<PathBuf>,
    pub output: OutputOptions,
}

pub struct UpdateOptions {
    pub id: u64,
    pub title: Option<String>,
    pub status: Option<String>,
    pub tags: Option<Vec<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub dependencies: Option<Vec<u64>>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub validation: Option<String>,
    pub fields: Vec<String>,
    pub root: Option<PathBuf>,
    pub output: OutputOptions,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub search: Option<String>,
    pub root: Option<PathBuf>,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct DeleteReport {
    id: u64,
    deleted: bool,
}

fn open_store(root: Option<PathBuf>) -> Result<TaskStore> {
    TaskStore::open(resolve_root(root)?)
}

pub fn run_add(options: AddOptions) -> Result<()> {
    let store = open_store(options.root)?;

    let mut input = NewTask::new(options.title).with_dependencies(options.dependencies);
    input.tags = options.tags;
    if let Some(status) = options.status {
        input.status = Some(status.parse::<TaskStatus>()?);
    }

    let mut body = Sections::new();
    for (name, content) in [
        (DESCRIPTION, options.description),
        ("details", options.details),
        ("validation", options.validation),
    ] {
        if let Some(content) = content {
            sections::check_content(&content)?;
            body.set(name, content);
        }
    }
    input.body = sections::build(&body);

    for field in &options.fields {
        match parse_field(field)? {
            (key, Some(value)) => input.extensions.insert(key, value),
            (key, None) => {
                return Err(Error::Validation(format!(
                    "field '{key}' needs a value (use key=value)"
                )))
            }
        }
    }

    let task = store.create(input)?;
    options
        .output
        .emit(&task, || task_card(&format!("Created task {}: {}", task.id, task.title), &task, false))
}

pub fn run_show(id: u64, root: Option<PathBuf>, output: OutputOptions) -> Result<()> {
    let store = open_store(root)?;
    let task = store.get(id)?;

    output.emit(&task, || task_card(&format!("Task {}: {}", task.id, task.title), &task, true))
}

pub fn run_update(options: UpdateOptions) -> Result<()> {
    let store = open_store(options.root)?;

    let mut patch = TaskPatch {
        title: options.title,
        tags: options.tags,
        add_tags: options.add_tags,
        remove_tags: options.remove_tags,
        dependencies: options.dependencies,
        body: options.body,
        ..TaskPatch::default()
    };
    if let Some(status) = options.status {
        patch.status = Some(status.parse::<TaskStatus>()?);
    }
    for (name, content) in [
        (DESCRIPTION, options.description),
        ("details", options.details),
        ("validation", options.validation),
    ] {
        if let Some(content) = content {
            patch.sections.push((name.to_string(), content));
        }
    }
    for field in &options.fields {
        patch.fields.push(parse_field(field)?);
    }

    let task = store.update(options.id, patch)?;
    options
        .output
        .emit(&task, || task_card(&format!("Updated task {}: {}", task.id, task.title), &task, false))
}

pub fn run_delete(id: u64, force: bool, root: Option<PathBuf>, output: OutputOptions) -> Result<()> {
    let store = open_store(root)?;
    store.delete(id, DeleteOptions { force })?;

    let report = DeleteReport { id, deleted: true };
    output.emit(&report, || format!("Deleted task {id}"))
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let store = open_store(options.root)?;
    let filter = TaskFilter {
        status: options
            .status
            .as_deref()
            .map(str::parse::<TaskStatus>)
            .transpose()?,
        tags: options.tags,
        search: options.search,
    };
    let (tasks, skipped) = store.list_with_skipped(&filter)?;
    options.output.warn_skipped(&skipped);
    options.output.emit(&tasks, || task_list(&tasks))
}

/// Split `key=value`; an empty value means "remove"
fn parse_field(raw: &str) -> Result<(String, Option<FieldValue>)> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(Error::Validation(format!(
            "expected key=value, got '{raw}'"
        )));
    };
    let key = key.trim().to_string();
    if value.is_empty() {
        Ok((key, None))
    } else {
        Ok((key, Some(FieldValue::parse_scalar(value))))
    }
}
