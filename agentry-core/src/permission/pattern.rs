//! Glob patterns for paths.
//!
//! `*` matches within one segment, `**` across segments, `?` one character.
//! A pattern matches a path when it matches the whole path or any suffix
//! that starts after a `/`, so `.env` catches `project/.env` too.

use crate::{Error, ErrorKind, Result};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
            Error::new(ErrorKind::ConfigInvalid, format!("invalid path pattern: {pattern}"))
                .with_operation("pattern::new")
                .set_source(e)
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize(path);
        if self.regex.is_match(&path) {
            return true;
        }
        path.match_indices('/')
            .any(|(i, _)| self.regex.is_match(&path[i + 1..]))
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

fn glob_to_regex(pattern: &str) -> String {
    let pattern = normalize(pattern);
    let pattern = pattern.trim_start_matches('/');
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    out
}

/// Compile a list of patterns, failing on the first bad one
pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathPattern>> {
    patterns.iter().map(|p| PathPattern::new(p.as_ref())).collect()
}
