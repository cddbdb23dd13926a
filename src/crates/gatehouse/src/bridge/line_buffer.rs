//! Line buffering and legacy classification of raw output
//!
//! Raw writes arrive in arbitrary chunks; only complete lines are
//! forwarded. Each line is then classified by pattern so that unstructured
//! output still carries a kind, a role and a stage. Workflows that can
//! should call [`IoChannel::emit`](super::IoChannel::emit) with a typed
//! [`Emission`] instead.

use regex::Regex;

use super::io::{Emission, OutputKind};

/// Longest unterminated line held before it is forced out
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates chunks until a line boundary
///
/// An unterminated line longer than the limit is cut at the limit (on a
/// character boundary) and forwarded as its own line.
#[derive(Debug)]
pub struct LineBuffer {
    partial: String,
    max_line_bytes: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            partial: String::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Append `chunk`; returns every line it completed, without terminators
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        while self.partial.len() > self.max_line_bytes {
            let cut = self.cut_point();
            lines.push(self.partial.drain(..cut).collect());
        }
        lines
    }

    fn cut_point(&self) -> usize {
        let mut cut = self.max_line_bytes;
        while !self.partial.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // Limit is narrower than the first character
            cut = self.partial.chars().next().map(char::len_utf8).unwrap_or(1);
        }
        cut
    }

    /// Take the unterminated remainder, if any
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

/// Pattern-based line classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    role: Regex,
    stage: Regex,
    error: Regex,
    warning: Regex,
    result: Regex,
}

impl Classifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            role: Regex::new(r"^\s*\[(?P<role>[A-Za-z][\w\- ]{0,40})\]")?,
            stage: Regex::new(r"(?i)\b(?:stage|step|phase)\s+(?P<stage>\d+)")?,
            error: Regex::new(r"(?i)\b(?:error|failed|failure|exception)\b")?,
            warning: Regex::new(r"(?i)\bwarn(?:ing)?\b")?,
            result: Regex::new(r"(?i)^\s*(?:final|result|output)\s*:")?,
        })
    }

    /// Classify one complete line
    ///
    /// Kind precedence: error, warning, result, stage, agent, text. Role
    /// and stage are captured whenever present.
    pub fn classify(&self, line: &str) -> Emission {
        let role = self
            .role
            .captures(line)
            .and_then(|c| c.name("role"))
            .map(|m| m.as_str().trim().to_string());
        let stage = self
            .stage
            .captures(line)
            .and_then(|c| c.name("stage"))
            .map(|m| m.as_str().to_string());

        let kind = if self.error.is_match(line) {
            OutputKind::Error
        } else if self.warning.is_match(line) {
            OutputKind::Warning
        } else if self.result.is_match(line) {
            OutputKind::Result
        } else if stage.is_some() {
            OutputKind::Stage
        } else if role.is_some() {
            OutputKind::Agent
        } else {
            OutputKind::Text
        };

        Emission {
            text: line.to_string(),
            kind,
            role,
            stage,
        }
    }
}
