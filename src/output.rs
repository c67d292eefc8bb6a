//! Terminal rendering for stm commands.
//!
//! With `--json` a command prints one JSON document on stdout: a task
//! object, an array of task objects, or a small report. Otherwise it prints
//! a task card or list lines. Warnings and errors always go to stderr, so
//! stdout stays machine-readable.

use std::io::{self, Write};

use serde::Serialize;

use crate::error::{Error, JsonError, Result};
use crate::metadata::FieldValue;
use crate::store::SkippedFile;
use crate::task::{format_timestamp, Task};

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

impl OutputOptions {
    /// Print `value` as JSON, or the text from `human` unless quiet.
    ///
    /// `--json` wins over `--quiet`: scripts asking for data get it.
    pub fn emit<T, F>(&self, value: &T, human: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce() -> String,
    {
        let mut stdout = io::stdout().lock();
        if self.json {
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        } else if !self.quiet {
            writeln!(stdout, "{}", human())?;
        }
        Ok(())
    }

    /// Report task files `list` could not read
    pub fn warn_skipped(&self, skipped: &[SkippedFile]) {
        if self.quiet {
            return;
        }
        let mut stderr = io::stderr().lock();
        for file in skipped {
            let _ = writeln!(
                stderr,
                "warning: skipped {}: {}",
                file.path.display(),
                file.reason
            );
        }
    }
}

/// Headline, one aligned `name: value` line per field, then optionally the body
pub fn task_card(headline: &str, task: &Task, with_body: bool) -> String {
    let mut fields: Vec<(&str, String)> = vec![("status", task.status.to_string())];
    if !task.tags.is_empty() {
        fields.push(("tags", task.tags.join(", ")));
    }
    if !task.dependencies.is_empty() {
        let ids: Vec<String> = task.dependencies.iter().map(|id| format!("#{id}")).collect();
        fields.push(("depends on", ids.join(", ")));
    }
    fields.push(("created", format_timestamp(&task.created)));
    fields.push(("updated", format_timestamp(&task.updated)));
    for (key, value) in task.extensions.iter() {
        fields.push((key, render_value(value)));
    }

    let width = fields
        .iter()
        .map(|(name, _)| name.chars().count())
        .max()
        .unwrap_or(0)
        + 1;
    let mut card = headline.to_string();
    for (name, value) in &fields {
        card.push_str(&format!("\n  {:<width$} {value}", format!("{name}:")));
    }
    if with_body && !task.body.trim().is_empty() {
        card.push_str("\n\n");
        card.push_str(task.body.trim_end());
    }
    card
}

/// Count line followed by one line per task
pub fn task_list(tasks: &[Task]) -> String {
    let mut text = match tasks.len() {
        0 => "no tasks".to_string(),
        1 => "1 task".to_string(),
        count => format!("{count} tasks"),
    };
    for task in tasks {
        text.push('\n');
        text.push_str(&list_line(task));
    }
    text
}

/// `#<id> [<status>] <title> (<tags>)`
pub fn list_line(task: &Task) -> String {
    let mut line = format!("#{} [{}] {}", task.id, task.status, task.title);
    if !task.tags.is_empty() {
        line.push_str(&format!(" ({})", task.tags.join(", ")));
    }
    line
}

fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::String(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.kind().to_string()),
    }
}

/// Print a failed command's error to stderr
///
/// JSON mode writes a [`JsonError`]; text mode writes the message and, when
/// there is an obvious next step, a hint.
pub fn report_error(err: &Error, json: bool) {
    let mut stderr = io::stderr().lock();
    if json {
        if let Ok(text) = serde_json::to_string(&JsonError::from(err)) {
            let _ = writeln!(stderr, "{text}");
            return;
        }
    }
    let _ = writeln!(stderr, "error: {err}");
    if let Some(hint) = hint(err) {
        let _ = writeln!(stderr, "hint: {hint}");
    }
}

fn hint(err: &Error) -> Option<String> {
    match err {
        Error::NotInitialized(_) => Some("run `stm init` in the project root".to_string()),
        Error::NotFound(_) => Some("`stm list` shows existing ids".to_string()),
        Error::DependencyConflict { id, .. } => Some(format!("stm delete {id} --force")),
        Error::LockTimeout { path, .. } => Some(format!(
            "retry, or remove {} if no stm process is running",
            path.display()
        )),
        Error::InvalidConfig(_) => Some("fix .stm/config.toml and retry".to_string()),
        Error::Parse {
            path: Some(path), ..
        } => Some(format!("repair or remove {}", path.display())),
        _ => None,
    }
}
