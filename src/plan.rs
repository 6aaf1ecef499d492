//! Line-oriented plans of file operations.
//!
//! One step per line; blank lines and `#` comments are ignored. Paths
//! containing whitespace are written in double quotes. Content for `create`
//! and `replace` is the rest of the line, with `\n`, `\t` and `\\` escapes.
//!
//! ```text
//! # rotate the report
//! copy    out/report.txt  archive/report.txt
//! replace out/report.txt  second draft\n
//! create  out/notes.txt   see archive
//! move    out/tmp.txt     trash/tmp.txt
//! delete  out/stale.txt
//! delete  "out/old notes.txt"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TxfsError};
use crate::fs::TransactionalFileOps;

/// A single file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Create { path: PathBuf, content: String },
    Replace { path: PathBuf, content: String },
    Delete { path: PathBuf },
    Move { from: PathBuf, to: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
}

impl Step {
    /// Parses one plan line. Returns `None` for blank and comment lines.
    pub fn parse(line_no: usize, line: &str) -> Result<Option<Step>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let err = |msg: String| TxfsError::Plan { line: line_no, msg };

        let (verb, rest) = split_word(line).map_err(err)?;
        let step = match verb {
            "create" | "replace" => {
                let (path, content) = split_word(rest).map_err(err)?;
                if path.is_empty() {
                    return Err(err(format!("'{}' needs a path", verb)));
                }
                let path = PathBuf::from(path);
                let content = unescape(content);
                if verb == "create" {
                    Step::Create { path, content }
                } else {
                    Step::Replace { path, content }
                }
            }
            "delete" => match words(rest).map_err(err)?.as_slice() {
                [path] => Step::Delete {
                    path: PathBuf::from(path),
                },
                _ => return Err(err("'delete' takes exactly one path".into())),
            },
            "move" | "copy" => match words(rest).map_err(err)?.as_slice() {
                [from, to] => {
                    let (from, to) = (PathBuf::from(from), PathBuf::from(to));
                    if verb == "move" {
                        Step::Move { from, to }
                    } else {
                        Step::Copy { from, to }
                    }
                }
                _ => return Err(err(format!("'{}' takes a source and a destination", verb))),
            },
            other => return Err(err(format!("unknown operation '{}'", other))),
        };

        Ok(Some(step))
    }

    /// Runs the step through `ops`.
    pub fn apply(&self, ops: &TransactionalFileOps) -> Result<()> {
        match self {
            Step::Create { path, content } => ops.create(path, content.as_bytes()),
            Step::Replace { path, content } => ops.replace_content(path, content.as_bytes()),
            Step::Delete { path } => ops.delete(path),
            Step::Move { from, to } => ops.move_file(from, to),
            Step::Copy { from, to } => ops.copy_file(from, to),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Step::Create { .. } => "create",
            Step::Replace { .. } => "replace",
            Step::Delete { .. } => "delete",
            Step::Move { .. } => "move",
            Step::Copy { .. } => "copy",
        }
    }

    /// Source and optional destination of the step.
    pub fn paths(&self) -> (&Path, Option<&Path>) {
        match self {
            Step::Create { path, .. } | Step::Replace { path, .. } | Step::Delete { path } => {
                (path.as_path(), None)
            }
            Step::Move { from, to } | Step::Copy { from, to } => {
                (from.as_path(), Some(to.as_path()))
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.paths() {
            (path, None) => write!(f, "{} {}", self.verb(), path.display()),
            (from, Some(to)) => write!(f, "{} {} → {}", self.verb(), from.display(), to.display()),
        }
    }
}

/// Parses a whole plan.
pub fn parse_plan(text: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if let Some(step) = Step::parse(idx + 1, line)? {
            steps.push(step);
        }
    }
    Ok(steps)
}

/// Splits off the first word, which may be a double-quoted string.
fn split_word(s: &str) -> std::result::Result<(&str, &str), String> {
    let s = s.trim_start();

    if let Some(quoted) = s.strip_prefix('"') {
        return match quoted.find('"') {
            Some(end) => Ok((&quoted[..end], quoted[end + 1..].trim_start())),
            None => Err("unterminated quote".into()),
        };
    }

    Ok(match s.find(char::is_whitespace) {
        Some(at) => (&s[..at], s[at..].trim_start()),
        None => (s, ""),
    })
}

fn words(mut s: &str) -> std::result::Result<Vec<&str>, String> {
    let mut out = Vec::new();
    while !s.trim_start().is_empty() {
        let (word, rest) = split_word(s)?;
        out.push(word);
        s = rest;
    }
    Ok(out)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}
