//! Mask compilation.
//!
//! # Responsibilities
//! - Parse leading modifiers (`!` negate, `<` case-insensitive, `>` case-sensitive)
//! - Cut the longest literal runs off both ends (fixed prefix / fixed suffix)
//! - Parse the middle into typed parts (literal, wildcard, regex, named slot, condition slot)
//!
//! # Syntax
//! ```text
//! ?        exactly one character, never '/'
//! *        any run of characters, never '/'
//! **       any run of characters, '/' included
//! `re`     regular expression, backticks are delimiters only
//! ^re$     regular expression, anchors kept as part of the expression
//! {name}   non-empty capture within one segment, aliased as `name`
//! {{expr}} literal produced by evaluating `expr` for the current request
//! ```
//!
//! # Design Decisions
//! - A malformed mask never aborts configuration loading: bad regexes degrade
//!   to a placeholder literal and unterminated delimiters fold the remainder
//!   into the fixed suffix, both with a warning
//! - Paths are compared without leading/trailing slashes and with repeated
//!   slashes collapsed; the compiler normalizes literals the same way

use std::fmt;

use regex::Regex;

/// Upper length bound for unbounded parts.
pub const UNBOUNDED: usize = usize::MAX;

/// Literal inserted in place of a regular expression that failed to compile.
pub const BROKEN_REGEX_PLACEHOLDER: &str = "?? Error ??";

/// Per-mask case handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseSensitivity {
    /// Use whatever the caller asks for.
    #[default]
    Inherit,
    /// `<` modifier.
    Insensitive,
    /// `>` modifier.
    Sensitive,
}

impl CaseSensitivity {
    /// Effective insensitivity given the caller's default.
    pub fn is_insensitive(self, default_insensitive: bool) -> bool {
        match self {
            CaseSensitivity::Inherit => default_insensitive,
            CaseSensitivity::Insensitive => true,
            CaseSensitivity::Sensitive => false,
        }
    }
}

/// One typed slot between the fixed prefix and the fixed suffix.
#[derive(Debug, Clone)]
pub enum MiddlePart {
    Literal(String),
    Wildcard {
        min: usize,
        max: usize,
        slash_aware: bool,
    },
    Regex(Regex),
    /// Slash-aware capture; an empty name is an anonymous capture.
    Named(String),
    /// Literal resolved per match call by the condition evaluator.
    Condition(String),
}

impl MiddlePart {
    pub fn min_len(&self) -> usize {
        match self {
            MiddlePart::Literal(text) => text.len(),
            MiddlePart::Wildcard { min, .. } => *min,
            MiddlePart::Named(_) => 1,
            MiddlePart::Regex(_) | MiddlePart::Condition(_) => 0,
        }
    }

    pub fn max_len(&self) -> usize {
        match self {
            MiddlePart::Literal(text) => text.len(),
            MiddlePart::Wildcard { max, .. } => *max,
            MiddlePart::Regex(_) | MiddlePart::Named(_) | MiddlePart::Condition(_) => UNBOUNDED,
        }
    }

    /// Literal-like parts that the anchored matcher scans for.
    pub fn is_anchor(&self) -> bool {
        matches!(self, MiddlePart::Literal(_) | MiddlePart::Condition(_))
    }

    /// Parts that can never consume a '/'.
    pub fn is_slash_aware(&self) -> bool {
        match self {
            MiddlePart::Wildcard { slash_aware, .. } => *slash_aware,
            MiddlePart::Named(_) => true,
            _ => false,
        }
    }
}

impl PartialEq for MiddlePart {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MiddlePart::Literal(a), MiddlePart::Literal(b)) => a == b,
            (
                MiddlePart::Wildcard {
                    min: a_min,
                    max: a_max,
                    slash_aware: a_aware,
                },
                MiddlePart::Wildcard {
                    min: b_min,
                    max: b_max,
                    slash_aware: b_aware,
                },
            ) => a_min == b_min && a_max == b_max && a_aware == b_aware,
            (MiddlePart::Regex(a), MiddlePart::Regex(b)) => a.as_str() == b.as_str(),
            (MiddlePart::Named(a), MiddlePart::Named(b)) => a == b,
            (MiddlePart::Condition(a), MiddlePart::Condition(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for MiddlePart {}

/// Immutable compiled mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    source: String,
    fixed_prefix: String,
    fixed_suffix: String,
    middle: Vec<MiddlePart>,
    negative: bool,
    case: CaseSensitivity,
}

impl CompiledPattern {
    /// Compile a single mask.
    pub fn compile(text: &str) -> Self {
        compile_mask(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fixed_prefix(&self) -> &str {
        &self.fixed_prefix
    }

    pub fn fixed_suffix(&self) -> &str {
        &self.fixed_suffix
    }

    pub fn middle(&self) -> &[MiddlePart] {
        &self.middle
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    /// True when the mask contains nothing but literal text.
    pub fn is_literal(&self) -> bool {
        self.middle.iter().all(|p| matches!(p, MiddlePart::Literal(_)))
    }

    /// Names of the named slots, in pattern order.
    pub fn capture_names(&self) -> Vec<&str> {
        self.middle
            .iter()
            .filter_map(|p| match p {
                MiddlePart::Named(name) if !name.is_empty() => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Trie keys: the complete segments of the fixed prefix.
    ///
    /// The last element of the split is always dropped: it is either empty
    /// (prefix ends with '/') or a segment the path may extend.
    pub fn prefix_segments(&self) -> Vec<String> {
        let mut segments: Vec<String> = self
            .fixed_prefix
            .to_ascii_lowercase()
            .split('/')
            .map(str::to_string)
            .collect();
        segments.pop();
        segments
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compile a comma, semicolon or whitespace separated list of masks.
pub fn compile_list(text: &str) -> Vec<CompiledPattern> {
    split_list(text).into_iter().map(compile_mask).collect()
}

/// Split a configuration list on ',', ';' and whitespace, dropping empty items.
pub fn split_list(text: &str) -> Vec<&str> {
    text.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

fn starts_special(c: u8) -> bool {
    matches!(c, b'?' | b'*' | b'{' | b'`' | b'^')
}

fn ends_special(c: u8) -> bool {
    matches!(c, b'?' | b'*' | b'`' | b'$' | b'}')
}

/// Collapse repeated slashes.
fn collapse_slashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_slash = false;
    for c in text.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

fn compile_mask(text: &str) -> CompiledPattern {
    let mut negative = false;
    let mut case = CaseSensitivity::Inherit;

    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            c if c <= b' ' => {}
            b'!' => negative = true,
            b'<' => case = CaseSensitivity::Insensitive,
            b'>' => case = CaseSensitivity::Sensitive,
            _ => break,
        }
        i += 1;
    }

    let body = text[i..].trim_end_matches(|c: char| c <= ' ' || c == '/');

    let prefix_end = body.bytes().position(starts_special).unwrap_or(body.len());
    let fixed_prefix = collapse_slashes(body[..prefix_end].trim_start_matches(|c: char| c <= ' ' || c == '/'));

    let tail = &body[prefix_end..];
    let middle_end = tail.bytes().rposition(ends_special).map_or(0, |p| p + 1);
    let mut fixed_suffix = collapse_slashes(&tail[middle_end..]);

    let mut middle = Vec::new();
    if let Some(remainder) = parse_middle(&tail[..middle_end], &mut middle, text) {
        fixed_suffix = format!("{}{}", collapse_slashes(remainder), fixed_suffix);
    }

    CompiledPattern {
        source: text.trim().to_string(),
        fixed_prefix,
        fixed_suffix,
        middle,
        negative,
        case,
    }
}

/// Parse the middle section. Returns the unparsed remainder when a delimiter
/// is left open.
fn parse_middle<'t>(text: &'t str, parts: &mut Vec<MiddlePart>, source: &str) -> Option<&'t str> {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut i = 0;
    while i < n {
        match bytes[i] {
            b'?' | b'*' => {
                let mut min = 0;
                let mut star = false;
                let mut slash_aware = true;
                while i < n && (bytes[i] == b'?' || bytes[i] == b'*') {
                    if bytes[i] == b'?' {
                        min += 1;
                    } else {
                        if i > 0 && bytes[i - 1] == b'*' {
                            slash_aware = false;
                        }
                        star = true;
                    }
                    i += 1;
                }
                let max = if star { UNBOUNDED } else { min };
                push_part(parts, MiddlePart::Wildcard { min, max, slash_aware });
            }
            b'`' => {
                let Some(close) = text[i + 1..].find('`').map(|p| p + i + 1) else {
                    tracing::warn!(mask = %source, "Expected closing ` in mask");
                    return Some(&text[i..]);
                };
                push_regex(parts, &text[i + 1..close]);
                i = close + 1;
            }
            b'^' => {
                let Some(close) = text[i + 1..].find('$').map(|p| p + i + 1) else {
                    tracing::warn!(mask = %source, "Expected closing $ in mask");
                    return Some(&text[i..]);
                };
                push_regex(parts, &text[i..=close]);
                i = close + 1;
            }
            b'{' => {
                let condition = bytes.get(i + 1) == Some(&b'{');
                let (open, close_token) = if condition { (i + 2, "}}") } else { (i + 1, "}") };
                let Some(close) = text[open..].find(close_token).map(|p| p + open) else {
                    tracing::warn!(mask = %source, expected = close_token, "Unterminated slot in mask");
                    return Some(&text[i..]);
                };
                let word = text[open..close].trim().to_string();
                if condition {
                    push_part(parts, MiddlePart::Condition(word));
                } else {
                    push_part(parts, MiddlePart::Named(word));
                }
                i = close + close_token.len();
            }
            _ => {
                let start = i;
                while i < n && !starts_special(bytes[i]) {
                    i += 1;
                }
                push_part(parts, MiddlePart::Literal(collapse_slashes(&text[start..i])));
            }
        }
    }
    None
}

fn push_regex(parts: &mut Vec<MiddlePart>, expression: &str) {
    if expression.is_empty() {
        return;
    }
    match Regex::new(&format!("^(?:{})$", expression)) {
        Ok(regex) => push_part(parts, MiddlePart::Regex(regex)),
        Err(e) => {
            tracing::warn!(expression = %expression, error = %e, "Incorrect regular expression in mask");
            push_part(parts, MiddlePart::Literal(BROKEN_REGEX_PLACEHOLDER.to_string()));
        }
    }
}

/// Append a part, merging it into a preceding wildcard or literal.
fn push_part(parts: &mut Vec<MiddlePart>, part: MiddlePart) {
    match (parts.last_mut(), &part) {
        (
            Some(MiddlePart::Wildcard {
                min,
                max,
                slash_aware,
            }),
            MiddlePart::Wildcard {
                min: next_min,
                max: next_max,
                slash_aware: next_aware,
            },
        ) => {
            *min += next_min;
            *max = max.saturating_add(*next_max);
            *slash_aware = *slash_aware && *next_aware;
        }
        (Some(MiddlePart::Literal(text)), MiddlePart::Literal(next)) => {
            text.push_str(next);
        }
        _ => parts.push(part),
    }
}
