//! Minimal-diff editing of the manifest's dependency sections.
//!
//! The manifest is human-edited, so rewriting it through a serializer would
//! destroy formatting, member order, and comments-by-convention (trailing
//! metadata members). The editor instead performs textual surgery on the raw
//! JSON: it locates the byte span of a dependency section and rewrites only
//! the entries inside it, leaving every other byte of the document alone.
//!
//! All edits accumulate in memory; callers write the final contents once, so
//! a failed edit never leaves a partially-modified file behind.

use crate::manifest::Section;
use thiserror::Error;

/// Errors that can occur while manipulating manifest text.
#[derive(Error, Debug)]
pub enum EditorError {
    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest root is not a JSON object")]
    RootNotObject,

    #[error("manifest member '{0}' is not a JSON object")]
    SectionNotObject(&'static str),

    #[error("manifest contains malformed JSON structure")]
    Malformed,
}

/// Byte spans of one `"key": value` member inside an object.
#[derive(Debug, Clone)]
struct Member {
    key: String,
    /// Index of the key's opening quote.
    key_start: usize,
    /// Index of the first byte of the value.
    value_start: usize,
    /// Index one past the last byte of the value.
    value_end: usize,
}

/// An in-memory manifest manipulator.
#[derive(Debug)]
pub struct ManifestEditor {
    content: String,
}

impl ManifestEditor {
    /// Wrap raw manifest text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn new(content: impl Into<String>) -> Result<Self, EditorError> {
        let content = content.into();
        let root: serde_json::Value = serde_json::from_str(&content)?;
        if !root.is_object() {
            return Err(EditorError::RootNotObject);
        }
        Ok(Self { content })
    }

    /// Wrap text already known to be a JSON object.
    pub(crate) fn from_validated(content: String) -> Self {
        Self { content }
    }

    /// The manifest text with all edits applied so far.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.content
    }

    /// Consume the editor, returning the edited text.
    #[must_use]
    pub fn into_contents(self) -> String {
        self.content
    }

    /// Insert or replace `name` in `section` with `constraint`.
    ///
    /// The section is created as a new root member when absent. When `sort`
    /// is true the section's keys end up lexicographically ordered; when
    /// false an inserted key is appended after the existing ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the section exists but is not an object, or the
    /// document structure cannot represent the edit.
    pub fn add_link(
        &mut self,
        section: Section,
        name: &str,
        constraint: &str,
        sort: bool,
    ) -> Result<(), EditorError> {
        self.ensure_section(section)?;

        let anchor = self
            .find_root_member(section.key())?
            .ok_or(EditorError::Malformed)?;
        let (open, close, members) = self.section_members(section)?;
        let entry = format!(
            "{}: {}",
            encode_json_string(name),
            encode_json_string(constraint)
        );

        if let Some(member) = members.iter().find(|m| m.key == name) {
            let value = encode_json_string(constraint);
            self.content
                .replace_range(member.value_start..member.value_end, &value);
        } else if members.is_empty() {
            let line_indent = self.line_indent(anchor.key_start);
            let entry_indent = format!("{line_indent}{}", self.indent_unit());
            let inner = format!("\n{entry_indent}{entry}\n{line_indent}");
            self.content.replace_range(open + 1..close, &inner);
        } else {
            let entry_indent = self.member_indent(&members[0]);
            let last = members.last().ok_or(EditorError::Malformed)?;
            let insertion = format!(",\n{entry_indent}{entry}");
            self.content.insert_str(last.value_end, &insertion);
        }

        if sort {
            self.sort_section(section)?;
        }
        Ok(())
    }

    /// Remove `name` from `section`.
    ///
    /// Returns true when an entry was removed, false when the section or the
    /// entry does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the section exists but is not an object.
    pub fn remove_sub_node(&mut self, section: Section, name: &str) -> Result<bool, EditorError> {
        if self.find_root_member(section.key())?.is_none() {
            return Ok(false);
        }

        let (open, close, members) = self.section_members(section)?;
        let Some(index) = members.iter().position(|m| m.key == name) else {
            return Ok(false);
        };

        if members.len() == 1 {
            // Collapse to an empty object.
            self.content.replace_range(open + 1..close, "");
        } else if index + 1 < members.len() {
            // Remove up to the start of the next member; its indentation
            // already sits before our key.
            let range = members[index].key_start..members[index + 1].key_start;
            self.content.replace_range(range, "");
        } else {
            // Last member: remove from the previous value's end, taking the
            // separating comma and whitespace with it.
            let range = members[index - 1].value_end..members[index].value_end;
            self.content.replace_range(range, "");
        }
        Ok(true)
    }

    /// Rewrite `section` with its keys in lexicographic order, preserving
    /// each entry's value text.
    fn sort_section(&mut self, section: Section) -> Result<(), EditorError> {
        let anchor = self
            .find_root_member(section.key())?
            .ok_or(EditorError::Malformed)?;
        let (open, close, members) = self.section_members(section)?;
        if members.len() < 2 {
            return Ok(());
        }

        let entry_indent = self.member_indent(&members[0]);
        let line_indent = self.line_indent(anchor.key_start);

        let mut entries: Vec<(String, String)> = members
            .iter()
            .map(|m| {
                (
                    m.key.clone(),
                    self.content[m.key_start..m.value_end].to_string(),
                )
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let body = entries
            .iter()
            .map(|(_, text)| format!("{entry_indent}{text}"))
            .collect::<Vec<_>>()
            .join(",\n");
        let inner = format!("\n{body}\n{line_indent}");
        self.content.replace_range(open + 1..close, &inner);
        Ok(())
    }

    /// Create `section` as an empty root member when it does not exist yet.
    fn ensure_section(&mut self, section: Section) -> Result<(), EditorError> {
        if self.find_root_member(section.key())?.is_some() {
            return Ok(());
        }

        let bytes = self.content.as_bytes();
        let root_open = skip_ws(bytes, 0);
        if root_open >= bytes.len() || bytes[root_open] != b'{' {
            return Err(EditorError::RootNotObject);
        }
        let (_, root_close, members) = self.object_members(root_open)?;

        let key = encode_json_string(section.key());
        if let Some(last) = members.last() {
            let indent = self.member_indent(last);
            let insertion = format!(",\n{indent}{key}: {{}}");
            self.content.insert_str(last.value_end, &insertion);
        } else {
            let indent = self.indent_unit();
            let inner = format!("\n{indent}{key}: {{}}\n");
            self.content.replace_range(root_open + 1..root_close, &inner);
        }
        Ok(())
    }

    /// Locate a section's object and its members: (open brace index, close
    /// brace index, members).
    fn section_members(
        &self,
        section: Section,
    ) -> Result<(usize, usize, Vec<Member>), EditorError> {
        let member = self
            .find_root_member(section.key())?
            .ok_or(EditorError::Malformed)?;
        let bytes = self.content.as_bytes();
        if bytes[member.value_start] != b'{' {
            return Err(EditorError::SectionNotObject(section.key()));
        }
        self.object_members(member.value_start)
    }

    /// Find a member of the root object by key.
    fn find_root_member(&self, key: &str) -> Result<Option<Member>, EditorError> {
        let bytes = self.content.as_bytes();
        let root_open = skip_ws(bytes, 0);
        if root_open >= bytes.len() || bytes[root_open] != b'{' {
            return Err(EditorError::RootNotObject);
        }
        let (_, _, members) = self.object_members(root_open)?;
        Ok(members.into_iter().find(|m| m.key == key))
    }

    /// Scan the members of the object whose opening brace sits at `open`.
    fn object_members(&self, open: usize) -> Result<(usize, usize, Vec<Member>), EditorError> {
        let bytes = self.content.as_bytes();
        let mut members = Vec::new();
        let mut i = skip_ws(bytes, open + 1);

        if i < bytes.len() && bytes[i] == b'}' {
            return Ok((open, i, members));
        }

        loop {
            if i >= bytes.len() || bytes[i] != b'"' {
                return Err(EditorError::Malformed);
            }
            let key_start = i;
            let key_end = skip_string(bytes, i)?;
            let key: String = serde_json::from_str(&self.content[key_start..key_end])?;

            i = skip_ws(bytes, key_end);
            if i >= bytes.len() || bytes[i] != b':' {
                return Err(EditorError::Malformed);
            }
            i = skip_ws(bytes, i + 1);
            let value_start = i;
            let value_end = skip_value(bytes, i)?;
            members.push(Member {
                key,
                key_start,
                value_start,
                value_end,
            });

            i = skip_ws(bytes, value_end);
            match bytes.get(i) {
                Some(b',') => i = skip_ws(bytes, i + 1),
                Some(b'}') => return Ok((open, i, members)),
                _ => return Err(EditorError::Malformed),
            }
        }
    }

    /// The whitespace between the last newline and the member's key, used to
    /// indent a sibling entry identically.
    fn member_indent(&self, member: &Member) -> String {
        self.line_indent(member.key_start)
    }

    /// Indentation of the line that `pos` sits on: the whitespace run between
    /// the preceding newline and `pos`, or empty when non-whitespace
    /// intervenes.
    fn line_indent(&self, pos: usize) -> String {
        let before = &self.content[..pos];
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let line = &before[line_start..];
        if line.chars().all(|c| c == ' ' || c == '\t') {
            line.to_string()
        } else {
            String::new()
        }
    }

    /// One level of indentation, detected from the root object's first
    /// member, falling back to four spaces.
    fn indent_unit(&self) -> String {
        let bytes = self.content.as_bytes();
        let root_open = skip_ws(bytes, 0);
        if let Ok((_, _, members)) = self.object_members(root_open) {
            if let Some(first) = members.first() {
                let indent = self.member_indent(first);
                if !indent.is_empty() {
                    return indent;
                }
            }
        }
        "    ".to_string()
    }
}

/// Encode a string as a JSON string literal.
fn encode_json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Skip a string literal starting at `i`; returns the index one past the
/// closing quote.
fn skip_string(bytes: &[u8], mut i: usize) -> Result<usize, EditorError> {
    debug_assert_eq!(bytes[i], b'"');
    i += 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(EditorError::Malformed)
}

/// Skip one JSON value starting at `i`; returns the index one past its last
/// byte.
fn skip_value(bytes: &[u8], i: usize) -> Result<usize, EditorError> {
    match bytes.get(i) {
        Some(b'"') => skip_string(bytes, i),
        Some(b'{') => skip_balanced(bytes, i, b'{', b'}'),
        Some(b'[') => skip_balanced(bytes, i, b'[', b']'),
        Some(_) => {
            let mut j = i;
            while j < bytes.len() && !matches!(bytes[j], b',' | b'}' | b']') && !bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j == i {
                Err(EditorError::Malformed)
            } else {
                Ok(j)
            }
        }
        None => Err(EditorError::Malformed),
    }
}

/// Skip a balanced `{}` or `[]` construct, string-aware.
fn skip_balanced(bytes: &[u8], mut i: usize, open: u8, close: u8) -> Result<usize, EditorError> {
    debug_assert_eq!(bytes[i], open);
    let mut depth = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' {
            i = skip_string(bytes, i)?;
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok(i + 1);
            }
        }
        i += 1;
    }
    Err(EditorError::Malformed)
}
