//! Mask matching.
//!
//! # Responsibilities
//! - Reject on fixed prefix/suffix before doing any backtracking
//! - Match the middle parts with leftmost-shortest commit order
//! - Record capture spans against the original-case path
//!
//! # Design Decisions
//! - Literal and condition parts act as anchors: the matcher scans for their
//!   occurrences instead of enumerating every split of the preceding parts
//! - Capture spans and name aliases live on two stacks; a failing branch
//!   truncates them back to its checkpoint
//! - Failed (range, part range) pairs are memoized per call, which bounds
//!   rescans on repeated anchors without changing which match is found
//! - Case folding is ASCII-only so byte offsets are identical in the folded
//!   and original path

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use crate::condition::Conditions;
use crate::routing::mask::{CompiledPattern, MiddlePart};

/// Byte range of one capture inside the matched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

/// Result of one successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchTrace {
    spans: Vec<Span>,
    names: HashMap<String, usize>,
    conditions: HashMap<String, String>,
}

impl MatchTrace {
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// 1-based capture index for a capture name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Span by 1-based number ("1", "2", ...) or by name.
    pub fn span(&self, key: &str) -> Option<Span> {
        let index = match key.parse::<usize>() {
            Ok(n) => n,
            Err(_) => self.index_of(key)?,
        };
        index.checked_sub(1).and_then(|i| self.spans.get(i)).copied()
    }

    /// Captured text for `key`, sliced out of the path that was matched.
    pub fn capture<'p>(&self, path: &'p str, key: &str) -> Option<&'p str> {
        let span = self.span(key)?;
        path.get(span.offset..span.offset + span.len)
    }

    /// All captures, keyed both by number and by name.
    pub fn captures(&self, path: &str) -> HashMap<String, String> {
        let mut out = HashMap::with_capacity(self.spans.len() + self.names.len());
        for (i, span) in self.spans.iter().enumerate() {
            if let Some(text) = path.get(span.offset..span.offset + span.len) {
                out.insert((i + 1).to_string(), text.to_string());
            }
        }
        for (name, index) in &self.names {
            if let Some(text) = self.capture(path, &index.to_string()) {
                out.insert(name.clone(), text.to_string());
            }
        }
        out
    }

    /// Value a condition slot resolved to during the match.
    pub fn condition(&self, expression: &str) -> Option<&str> {
        self.conditions.get(expression).map(String::as_str)
    }
}

/// Normalize a request path: non-empty segments joined by '/', no leading
/// or trailing slash.
pub fn normalize_path(path: &str) -> String {
    split_segments(path).join("/")
}

/// Non-empty path segments.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl CompiledPattern {
    /// Match a normalized path. `default_insensitive` applies when the mask
    /// carries no case modifier.
    pub fn matches(
        &self,
        path: &str,
        default_insensitive: bool,
        conditions: Conditions<'_>,
    ) -> Option<MatchTrace> {
        let insensitive = self.case_sensitivity().is_insensitive(default_insensitive);
        let fold = |text: &str| -> String {
            if insensitive {
                text.to_ascii_lowercase()
            } else {
                text.to_string()
            }
        };

        let hay: Cow<'_, str> = if insensitive {
            Cow::Owned(path.to_ascii_lowercase())
        } else {
            Cow::Borrowed(path)
        };
        let prefix = fold(self.fixed_prefix());
        let suffix = fold(self.fixed_suffix());
        if hay.len() < prefix.len() + suffix.len()
            || !hay.starts_with(prefix.as_str())
            || !hay.ends_with(suffix.as_str())
        {
            return None;
        }
        let lo = prefix.len();
        let hi = hay.len() - suffix.len();

        let parts = self.middle();
        let mut resolved: HashMap<String, String> = HashMap::new();
        for part in parts {
            if let MiddlePart::Condition(expression) = part {
                if !resolved.contains_key(expression) {
                    resolved.insert(expression.clone(), conditions.resolve(expression));
                }
            }
        }
        let anchors = parts
            .iter()
            .map(|part| match part {
                MiddlePart::Literal(text) => Some(fold(text.as_str())),
                MiddlePart::Condition(expression) => resolved.get(expression).map(|v| fold(v.as_str())),
                _ => None,
            })
            .collect();

        let scope = Scope {
            hay: hay.as_ref(),
            parts,
            anchors,
        };
        let mut trail = Trail::default();
        if !match_middle(&scope, &mut trail, lo, hi, 0, parts.len()) {
            return None;
        }
        Some(MatchTrace {
            spans: trail.spans,
            names: trail.names.into_iter().collect(),
            conditions: resolved,
        })
    }

    /// Boolean form of [`CompiledPattern::matches`].
    pub fn is_match(&self, path: &str, default_insensitive: bool, conditions: Conditions<'_>) -> bool {
        self.matches(path, default_insensitive, conditions).is_some()
    }
}

struct Scope<'a> {
    hay: &'a str,
    parts: &'a [MiddlePart],
    /// Folded text for literal and condition parts, by part index.
    anchors: Vec<Option<String>>,
}

impl Scope<'_> {
    fn anchor(&self, k: usize) -> &str {
        self.anchors[k].as_deref().unwrap_or("")
    }

    /// First byte offset after the character at `p`.
    fn next_boundary(&self, p: usize) -> usize {
        p + self.hay[p..].chars().next().map_or(1, char::len_utf8)
    }
}

#[derive(Default)]
struct Trail {
    spans: Vec<Span>,
    names: Vec<(String, usize)>,
    failed: HashSet<(bool, usize, usize, usize, usize)>,
}

impl Trail {
    fn checkpoint(&self) -> (usize, usize) {
        (self.spans.len(), self.names.len())
    }

    fn rollback(&mut self, (spans, names): (usize, usize)) {
        self.spans.truncate(spans);
        self.names.truncate(names);
    }

    fn push_span(&mut self, offset: usize, len: usize) {
        self.spans.push(Span { offset, len });
    }
}

/// Match `hay[lo..hi]` against `parts[a..b]`.
fn match_middle(scope: &Scope<'_>, trail: &mut Trail, lo: usize, hi: usize, a: usize, b: usize) -> bool {
    if a == b {
        return lo == hi;
    }
    let key = (true, lo, hi, a, b);
    if trail.failed.contains(&key) {
        return false;
    }
    let ok = match (a..b).find(|&k| scope.parts[k].is_anchor()) {
        None => match_free(scope, trail, lo, hi, a, b),
        Some(k) => match_anchored(scope, trail, lo, hi, a, k, b),
    };
    if !ok {
        trail.failed.insert(key);
    }
    ok
}

/// Anchored matching around the first literal-like part `k`.
fn match_anchored(
    scope: &Scope<'_>,
    trail: &mut Trail,
    lo: usize,
    hi: usize,
    a: usize,
    k: usize,
    b: usize,
) -> bool {
    let word = scope.anchor(k);
    let width = word.len();
    let is_condition = matches!(scope.parts[k], MiddlePart::Condition(_));

    if k == a {
        if !scope.hay[lo..hi].starts_with(word) {
            return false;
        }
        let cp = trail.checkpoint();
        if is_condition {
            trail.push_span(lo, width);
        }
        if match_middle(scope, trail, lo + width, hi, k + 1, b) {
            return true;
        }
        trail.rollback(cp);
        return false;
    }

    let mut from = lo;
    while from <= hi {
        let Some(found) = scope.hay[from..hi].find(word) else {
            break;
        };
        let at = from + found;
        let cp = trail.checkpoint();
        if match_free(scope, trail, lo, at, a, k) {
            if is_condition {
                trail.push_span(at, width);
            }
            if match_middle(scope, trail, at + width, hi, k + 1, b) {
                return true;
            }
        }
        trail.rollback(cp);
        from = scope.next_boundary(at);
    }
    false
}

/// Split enumeration over anchor-free parts, shortest first.
fn match_free(scope: &Scope<'_>, trail: &mut Trail, lo: usize, hi: usize, a: usize, b: usize) -> bool {
    if a == b {
        return lo == hi;
    }
    let key = (false, lo, hi, a, b);
    if trail.failed.contains(&key) {
        return false;
    }

    let ok = if b - a == 1 {
        bind_part(scope, trail, a, lo, hi)
    } else {
        let part = &scope.parts[a];
        let rest_min = scope.parts[a + 1..b]
            .iter()
            .fold(0usize, |acc, p| acc.saturating_add(p.min_len()));
        let len = hi - lo;
        let mut found = false;
        if len >= rest_min.saturating_add(part.min_len()) {
            let mut max_take = (len - rest_min).min(part.max_len());
            if part.is_slash_aware() {
                if let Some(slash) = scope.hay.as_bytes()[lo..lo + max_take].iter().position(|&b| b == b'/') {
                    max_take = slash;
                }
            }
            let mut take = part.min_len();
            while take <= max_take {
                let mid = lo + take;
                take += 1;
                if !scope.hay.is_char_boundary(mid) {
                    continue;
                }
                let cp = trail.checkpoint();
                if bind_part(scope, trail, a, lo, mid) && match_free(scope, trail, mid, hi, a + 1, b) {
                    found = true;
                    break;
                }
                trail.rollback(cp);
            }
        }
        found
    };

    if !ok {
        trail.failed.insert(key);
    }
    ok
}

/// Bind part `k` to exactly `hay[lo..hi]`, recording its captures.
fn bind_part(scope: &Scope<'_>, trail: &mut Trail, k: usize, lo: usize, hi: usize) -> bool {
    let part = &scope.parts[k];
    let len = hi - lo;
    if len < part.min_len() || len > part.max_len() {
        return false;
    }
    let text = &scope.hay[lo..hi];
    match part {
        MiddlePart::Wildcard { slash_aware, .. } => {
            if *slash_aware && text.contains('/') {
                return false;
            }
            trail.push_span(lo, len);
            true
        }
        MiddlePart::Named(name) => {
            if text.contains('/') {
                return false;
            }
            if !name.is_empty() {
                let index = trail.spans.len() + 1;
                trail.names.push((name.clone(), index));
            }
            trail.push_span(lo, len);
            true
        }
        MiddlePart::Regex(regex) => {
            let Some(caps) = regex.captures(text) else {
                return false;
            };
            for group in 1..caps.len() {
                match caps.get(group) {
                    Some(m) => trail.push_span(lo + m.start(), m.len()),
                    None => trail.push_span(lo, 0),
                }
            }
            true
        }
        MiddlePart::Literal(_) => text == scope.anchor(k),
        MiddlePart::Condition(_) => {
            if text != scope.anchor(k) {
                return false;
            }
            trail.push_span(lo, len);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Environment, EnvironmentEvaluator};

    fn matches(mask: &str, path: &str) -> Option<MatchTrace> {
        CompiledPattern::compile(mask).matches(path, false, Conditions::none())
    }

    #[test]
    fn test_literal_only_is_equality() {
        let p = CompiledPattern::compile("/api/users");
        assert!(p.is_match("api/users", false, Conditions::none()));
        assert!(!p.is_match("api/users/1", false, Conditions::none()));
        assert!(!p.is_match("api/user", false, Conditions::none()));
        assert!(!p.is_match("API/users", false, Conditions::none()));
    }

    #[test]
    fn test_named_slot_is_slash_aware() {
        let trace = matches("{x}", "ab").unwrap();
        assert_eq!(trace.capture("ab", "x"), Some("ab"));
        assert!(matches("{x}", "a/b").is_none());
    }

    #[test]
    fn test_leftmost_shortest_commit() {
        let path = "aXbYbc";
        let trace = matches("a*b*c", path).unwrap();
        assert_eq!(trace.capture(path, "1"), Some("X"));
        assert_eq!(trace.capture(path, "2"), Some("Yb"));

        let path = "xyz";
        let trace = matches("{a}{b}", path).unwrap();
        assert_eq!(trace.capture(path, "a"), Some("x"));
        assert_eq!(trace.capture(path, "b"), Some("yz"));
    }

    #[test]
    fn test_zero_length_wildcard() {
        let path = "files/.txt";
        let trace = matches("/files/*.txt", path).unwrap();
        assert_eq!(trace.spans(), &[Span { offset: 6, len: 0 }]);
    }

    #[test]
    fn test_slash_awareness() {
        assert!(matches("/a/*.html", "a/b/c.html").is_none());
        assert!(matches("/a/**.html", "a/b/c.html").is_some());
        assert!(matches("/a/??", "a/b/").is_none());
        assert!(matches("/a/??", "a/bc").is_some());
    }

    #[test]
    fn test_anchor_rescan() {
        let path = "x/ab/ab/end";
        let trace = matches("**/ab/{tail}", path).unwrap();
        assert_eq!(trace.capture(path, "1"), Some("x/ab"));
        assert_eq!(trace.capture(path, "tail"), Some("end"));
    }

    #[test]
    fn test_regex_captures() {
        let path = "v/item-42/x";
        let trace = matches("/v/`item-([0-9]+)`/x", path).unwrap();
        assert_eq!(trace.capture(path, "1"), Some("42"));
        assert!(matches("/v/`item-([0-9]+)`/x", "v/item-4a/x").is_none());
    }

    #[test]
    fn test_case_insensitive_spans_use_original_case() {
        let p = CompiledPattern::compile("<Api/{id}");
        let path = "API/XyZ";
        let trace = p.matches(path, false, Conditions::none()).unwrap();
        assert_eq!(trace.capture(path, "id"), Some("XyZ"));

        let p = CompiledPattern::compile(">Api/{id}");
        assert!(p.matches("api/x", true, Conditions::none()).is_none());
        let p = CompiledPattern::compile("Api/{id}");
        assert!(p.matches("api/x", true, Conditions::none()).is_some());
    }

    #[test]
    fn test_condition_slots() {
        let mut env = Environment::new();
        env.insert("HTTP_HOST".into(), "example.com".into());
        let evaluator = EnvironmentEvaluator;
        let p = CompiledPattern::compile("/site/{{HTTP_HOST}}/x");

        let path = "site/example.com/x";
        let trace = p.matches(path, false, Conditions::new(&evaluator, &env)).unwrap();
        assert_eq!(trace.condition("HTTP_HOST"), Some("example.com"));
        assert_eq!(trace.capture(path, "1"), Some("example.com"));

        assert!(p.matches("site/other.org/x", false, Conditions::new(&evaluator, &env)).is_none());
        assert!(p.matches(path, false, Conditions::none()).is_none());
    }

    #[test]
    fn test_failed_branch_does_not_leak_captures() {
        let path = "a-b-c";
        let trace = matches("{x}-{y}", path).unwrap();
        assert_eq!(trace.spans().len(), 2);
        assert_eq!(trace.capture(path, "x"), Some("a"));
        assert_eq!(trace.capture(path, "y"), Some("b-c"));
    }

    #[test]
    fn test_adversarial_pattern_terminates() {
        let path = "a".repeat(64);
        assert!(matches("*a*a*a*a*a*a*a*b*", &path).is_none());
    }

    #[test]
    fn test_multibyte_path_segments() {
        let path = "a/bé";
        let trace = matches("/a/*{x}", path).unwrap();
        assert_eq!(trace.capture(path, "x"), Some("bé"));

        let path = "café/menü/x";
        let trace = matches("/*/{item}/*", path).unwrap();
        assert_eq!(trace.capture(path, "item"), Some("menü"));
        assert!(matches("/a/*{x}", "a/é/ü").is_none());
        assert!(CompiledPattern::compile("/A/*{x}").is_match("a/ñé", true, Conditions::none()));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("//api///v1/"), "api/v1");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(split_segments("/a//b"), vec!["a", "b"]);
    }
}
