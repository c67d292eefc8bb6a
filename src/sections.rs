//! Structured access to a task body.
//!
//! A body is an unlabeled description followed by `## Heading` sections:
//!
//! ```text
//! Free-form description.
//!
//! ## Details
//!
//! Implementation notes.
//!
//! ## Validation
//!
//! How to check it.
//! ```
//!
//! Only level-two headings split sections; `#` and `###` headings stay inside
//! the surrounding content, as do headings inside fenced code blocks.

use crate::error::{Error, Result};

/// Name of the leading, unlabeled section
pub const DESCRIPTION: &str = "description";

/// Conventional sections, in the order they are written
pub const CANONICAL_ORDER: [&str; 3] = [DESCRIPTION, "details", "validation"];

const HEADING_PREFIX: &str = "## ";

/// Named sections of a body, keyed by lowercased heading text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    entries: Vec<(String, String)>,
}

impl Sections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let key = normalize_name(name);
        self.entries
            .iter()
            .find(|(entry, _)| *entry == key)
            .map(|(_, content)| content.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.get(DESCRIPTION)
    }

    /// Set a section's content; empty content removes the section.
    pub fn set(&mut self, name: &str, content: impl Into<String>) {
        let key = normalize_name(name);
        let content = content.into();
        if content.trim().is_empty() {
            self.entries.retain(|(entry, _)| *entry != key);
            return;
        }
        match self.entries.iter_mut().find(|(entry, _)| *entry == key) {
            Some(entry) => entry.1 = content,
            None => self.entries.push((key, content)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_str()))
    }

    /// Canonical sections first, then the rest in insertion order.
    fn ordered(&self) -> Vec<(&str, &str)> {
        let mut ordered: Vec<(&str, &str)> = CANONICAL_ORDER
            .iter()
            .filter_map(|name| self.get(name).map(|content| (*name, content)))
            .collect();
        ordered.extend(
            self.iter()
                .filter(|(name, _)| !CANONICAL_ORDER.contains(name)),
        );
        ordered
    }
}

impl<N: AsRef<str>, C: Into<String>> FromIterator<(N, C)> for Sections {
    fn from_iter<I: IntoIterator<Item = (N, C)>>(iter: I) -> Self {
        let mut sections = Sections::new();
        for (name, content) in iter {
            sections.set(name.as_ref(), content);
        }
        sections
    }
}

/// Split a body into its description and named sections.
///
/// A repeated heading starts over: the last occurrence of a name wins.
pub fn parse(body: &str) -> Sections {
    let mut sections = Sections::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in body.split('\n') {
        let text = line.strip_suffix('\r').unwrap_or(line);

        if let Some(marker) = fence {
            if text.trim_start().starts_with(marker) {
                fence = None;
            }
            buffer.push(line);
            continue;
        }
        if let Some(marker) = fence_marker(text) {
            fence = Some(marker);
            buffer.push(line);
            continue;
        }

        if let Some(heading) = heading_name(text) {
            flush(&mut sections, current.take(), &buffer);
            buffer.clear();
            current = Some(heading);
            continue;
        }
        buffer.push(line);
    }
    flush(&mut sections, current, &buffer);

    sections
}

/// Render sections back into a body.
///
/// A body holding only a description is written bare, without a heading.
pub fn build(sections: &Sections) -> String {
    let ordered = sections.ordered();
    if let [(name, content)] = ordered.as_slice() {
        if *name == DESCRIPTION {
            return (*content).to_string();
        }
    }

    ordered
        .iter()
        .map(|(name, content)| format!("{HEADING_PREFIX}{}\n\n{content}", heading_title(name)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Replace, insert or (with empty content) remove one section of a body.
pub fn update_section(body: &str, name: &str, content: &str) -> String {
    let mut sections = parse(body);
    sections.set(name, trim_blank_lines(content));
    build(&sections)
}

/// Reject content that would not read back as one section: a `## ` line
/// outside a code fence, or a fence left open.
pub fn check_content(content: &str) -> Result<()> {
    let mut fence: Option<&str> = None;
    for (index, line) in content.split('\n').enumerate() {
        let text = line.strip_suffix('\r').unwrap_or(line);
        if let Some(marker) = fence {
            if text.trim_start().starts_with(marker) {
                fence = None;
            }
            continue;
        }
        if let Some(marker) = fence_marker(text) {
            fence = Some(marker);
            continue;
        }
        if heading_name(text).is_some() {
            return Err(Error::Validation(format!(
                "section content line {} starts a new `## ` section; use `###` or a code fence",
                index + 1
            )));
        }
    }
    if fence.is_some() {
        return Err(Error::Validation(
            "section content leaves a code fence open".to_string(),
        ));
    }
    Ok(())
}

fn flush(sections: &mut Sections, name: Option<String>, lines: &[&str]) {
    let content = trim_blank_lines(&lines.join("\n"));
    match name {
        Some(name) => sections.set(&name, content),
        // Text before the first heading only counts when it says something,
        // so a later `## Description` is not clobbered by blank lines.
        None if !content.is_empty() => sections.set(DESCRIPTION, content),
        None => {}
    }
}

fn heading_name(line: &str) -> Option<String> {
    let title = line.strip_prefix(HEADING_PREFIX)?.trim();
    if title.is_empty() {
        return None;
    }
    Some(normalize_name(title))
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn heading_title(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Drop leading and trailing whitespace-only lines, keeping everything else.
fn trim_blank_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let is_blank = |line: &&str| line.trim().is_empty();
    let Some(start) = lines.iter().position(|line| !is_blank(line)) else {
        return String::new();
    };
    let end = lines
        .iter()
        .rposition(|line| !is_blank(line))
        .unwrap_or(start);
    let mut kept = lines[start..=end].join("\n");
    if kept.ends_with('\r') {
        kept.pop();
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_only_body_has_no_heading() {
        let sections: Sections = [("description", "Just text")].into_iter().collect();
        assert_eq!(build(&sections), "Just text");
        assert_eq!(parse("Just text").description(), Some("Just text"));
    }

    #[test]
    fn update_section_adds_details_after_description() {
        let body = build(&[("description", "d")].into_iter().collect());
        let updated = update_section(&body, "details", "x");
        let parsed = parse(&updated);
        assert_eq!(parsed.description(), Some("d"));
        assert_eq!(parsed.get("details"), Some("x"));
        assert_eq!(updated, "## Description\n\nd\n\n## Details\n\nx");
    }

    #[test]
    fn canonical_order_then_insertion_order() {
        let sections: Sections = [
            ("notes", "n"),
            ("validation", "v"),
            ("description", "d"),
            ("Details", "x"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            build(&sections),
            "## Description\n\nd\n\n## Details\n\nx\n\n## Validation\n\nv\n\n## Notes\n\nn"
        );
    }

    #[test]
    fn build_then_parse_is_stable() {
        let sections: Sections = [
            ("description", "Line one\n\n  indented\nlast"),
            ("details", "- a\n- b"),
            ("risks", "### Sub heading\nstays inside"),
        ]
        .into_iter()
        .collect();
        let body = build(&sections);
        let reparsed = parse(&body);
        assert_eq!(build(&reparsed), body);
        assert_eq!(reparsed.get("risks"), Some("### Sub heading\nstays inside"));
    }

    #[test]
    fn other_heading_depths_are_content() {
        let body = "Intro\n\n# Title\n\n## Details\n\nA\n### Inner\nB";
        let parsed = parse(body);
        assert_eq!(parsed.description(), Some("Intro\n\n# Title"));
        assert_eq!(parsed.get("details"), Some("A\n### Inner\nB"));
    }

    #[test]
    fn headings_inside_code_fences_are_ignored() {
        let body = "## Details\n\n```md\n## Not a section\n```\nafter";
        let parsed = parse(body);
        assert_eq!(parsed.get("details"), Some("```md\n## Not a section\n```\nafter"));
        assert!(parsed.get("not a section").is_none());
    }

    #[test]
    fn duplicate_headings_last_wins() {
        let parsed = parse("## Details\n\nfirst\n\n## Notes\n\nn\n\n## DETAILS\n\nsecond");
        assert_eq!(parsed.get("details"), Some("second"));
        assert_eq!(parsed.get("notes"), Some("n"));
    }

    #[test]
    fn empty_content_removes_section() {
        let body = "## Description\n\nd\n\n## Details\n\nx";
        assert_eq!(update_section(body, "details", ""), "d");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let parsed = parse("## Validation\n\nrun tests");
        assert_eq!(parsed.get("VALIDATION"), Some("run tests"));
    }

    #[test]
    fn content_that_would_split_is_rejected() {
        assert!(check_content("plain\n### Sub\n#Tag").is_ok());
        assert!(check_content("```md\n## Example\n```").is_ok());
        assert!(check_content("##no space").is_ok());
        assert!(matches!(
            check_content("first\n## Sneaky\nsecond"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(check_content("```\nopen"), Err(Error::Validation(_))));

        // Accepted content survives a rebuild unchanged.
        let content = "```md\n## Example\n```\nafter";
        let body = update_section("## Details\n\nx", "notes", content);
        assert_eq!(parse(&body).get("notes"), Some(content));
        assert_eq!(build(&parse(&body)), body);
    }

    #[test]
    fn crlf_bodies_parse() {
        let parsed = parse("intro\r\n\r\n## Details\r\n\r\nx\r\n");
        assert_eq!(parsed.description(), Some("intro"));
        assert_eq!(parsed.get("details"), Some("x"));
    }
}
