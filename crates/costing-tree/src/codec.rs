//! Structural-code parsing: `ABC-01-02-3` → `(level, parent candidate)`.
//!
//! The codec is pure. It never looks at existing nodes; resolving the parent
//! candidate against what actually exists is the builder's job.

use regex::Regex;
use std::sync::OnceLock;

/// Deepest level a node may have. Deeper input levels collapse into it.
pub const DEFAULT_MAX_LEVEL: u32 = 4;

const SEGMENT_DELIMITERS: [char; 2] = ['-', '.'];

/// Errors raised while parsing a structural code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("structural code is empty")]
    EmptyCode,
}

/// Where a code sits in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePosition {
    /// Trimmed structural code.
    pub code: String,
    /// Level after clamping into `1..=max_level`.
    pub level: u32,
    /// Level as supplied (explicit) or inferred from segment depth, before clamping.
    pub raw_level: u32,
    /// Direct-truncation parent candidate. A heuristic only; it may not exist.
    pub parent_code: Option<String>,
}

impl CodePosition {
    /// Whether the raw level was collapsed into the maximum.
    pub fn was_clamped(&self) -> bool {
        self.raw_level != self.level
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeCodec {
    max_level: u32,
}

impl Default for TreeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVEL)
    }
}

impl TreeCodec {
    pub fn new(max_level: u32) -> Self {
        Self {
            max_level: max_level.max(1),
        }
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Parse a code, letting an explicit level override the depth-inferred one.
    pub fn parse(&self, code: &str, explicit_level: Option<u32>) -> Result<CodePosition, CodecError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CodecError::EmptyCode);
        }

        let raw_level = explicit_level.unwrap_or_else(|| depth(code));
        Ok(CodePosition {
            code: code.to_string(),
            level: self.clamp_level(raw_level),
            raw_level,
            parent_code: truncate_last_segment(code).map(str::to_string),
        })
    }

    /// Clamp a raw level into `1..=max_level`. Level 0 is treated as a root.
    pub fn clamp_level(&self, raw_level: u32) -> u32 {
        raw_level.clamp(1, self.max_level)
    }
}

/// Number of delimiter-separated segments in `code`.
pub fn depth(code: &str) -> u32 {
    let count = code
        .split(SEGMENT_DELIMITERS)
        .filter(|segment| !segment.is_empty())
        .count();
    u32::try_from(count).unwrap_or(u32::MAX).max(1)
}

/// Drop the last delimiter-separated segment, keeping the original delimiters.
///
/// Returns `None` for single-segment codes.
pub fn truncate_last_segment(code: &str) -> Option<&str> {
    let trimmed = code.trim_end_matches(SEGMENT_DELIMITERS);
    let cut = trimmed.rfind(SEGMENT_DELIMITERS)?;
    let parent = trimmed[..cut].trim_end_matches(SEGMENT_DELIMITERS);
    if parent.is_empty() { None } else { Some(parent) }
}

/// Whether `prefix` is a proper ancestor of `code` at a segment boundary.
///
/// `A-1` is an ancestor of `A-1-02` but not of `A-10`.
pub fn is_segment_prefix(prefix: &str, code: &str) -> bool {
    prefix.len() < code.len()
        && code.starts_with(prefix)
        && code[prefix.len()..].starts_with(SEGMENT_DELIMITERS)
}

fn project_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]+)(\d{2})").expect("project prefix regex must compile"))
}

/// Project abbreviation and two-digit start year encoded at the head of a code.
///
/// `PRJ24-01-02` → `("PRJ", "24")`.
pub fn project_prefix(code: &str) -> Option<(String, String)> {
    let captures = project_prefix_re().captures(code.trim())?;
    Some((captures[1].to_string(), captures[2].to_string()))
}
