//! Route table.
//!
//! # Responsibilities
//! - Index compiled masks by the complete segments of their fixed prefix
//! - Look up the first handler whose mask matches a path
//!
//! # Design Decisions
//! - Immutable after construction (shared across requests without locks)
//! - Trie keys are lower-cased; the matcher applies the real case rule
//! - Deepest node is tested first, then its ancestors back to the root
//! - Within one node, registration order wins

use std::collections::HashMap;

use crate::condition::Conditions;
use crate::routing::mask::CompiledPattern;
use crate::routing::matcher::{split_segments, MatchTrace};

/// Successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub handler: &'a H,
    pub pattern: &'a CompiledPattern,
    pub trace: MatchTrace,
}

#[derive(Debug)]
struct Node<H> {
    children: HashMap<String, Node<H>>,
    bucket: Vec<(CompiledPattern, H)>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            bucket: Vec::new(),
        }
    }
}

/// Segment trie of `(mask, handler)` pairs.
#[derive(Debug)]
pub struct RouteTable<H> {
    root: Node<H>,
    len: usize,
    case_insensitive: bool,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            len: 0,
            case_insensitive: false,
        }
    }

    /// Default case handling for masks without a `<`/`>` modifier.
    pub fn case_insensitive(mut self, insensitive: bool) -> Self {
        self.case_insensitive = insensitive;
        self
    }

    /// Compile `mask` and register it.
    pub fn insert(&mut self, mask: &str, handler: H) {
        self.register(CompiledPattern::compile(mask), handler);
    }

    /// Register a compiled mask under the node of its fixed-prefix segments.
    pub fn register(&mut self, pattern: CompiledPattern, handler: H) {
        let mut node = &mut self.root;
        for segment in pattern.prefix_segments() {
            node = node.children.entry(segment).or_default();
        }
        node.bucket.push((pattern, handler));
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First handler whose mask matches the normalized `path`.
    pub fn lookup(&self, path: &str, conditions: Conditions<'_>) -> Option<RouteMatch<'_, H>> {
        self.lookup_with(path, conditions, |_, _| true)
    }

    /// Like [`RouteTable::lookup`], but a match is only accepted when
    /// `accept` agrees; a rejected candidate lets the search continue.
    pub fn lookup_with<F>(&self, path: &str, conditions: Conditions<'_>, mut accept: F) -> Option<RouteMatch<'_, H>>
    where
        F: FnMut(&H, &MatchTrace) -> bool,
    {
        if self.len == 0 {
            return None;
        }
        let mut chain = vec![&self.root];
        let mut node = &self.root;
        for segment in split_segments(path) {
            match node.children.get(segment.to_ascii_lowercase().as_str()) {
                Some(child) => {
                    chain.push(child);
                    node = child;
                }
                None => break,
            }
        }

        for node in chain.into_iter().rev() {
            for (pattern, handler) in &node.bucket {
                if let Some(trace) = pattern.matches(path, self.case_insensitive, conditions) {
                    if accept(handler, &trace) {
                        return Some(RouteMatch {
                            handler,
                            pattern,
                            trace,
                        });
                    }
                }
            }
        }
        None
    }

    /// All registered pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&CompiledPattern, &H)> {
        let mut stack = vec![&self.root];
        let mut items = Vec::with_capacity(self.len);
        while let Some(node) = stack.pop() {
            items.extend(node.bucket.iter().map(|(p, h)| (p, h)));
            stack.extend(node.children.values());
        }
        items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_lookup_prefers_deeper_node() {
        let mut table = RouteTable::new();
        table.insert("/api/**", "catch-all");
        table.insert("/api/users/{id}", "user");

        let m = table.lookup("api/users/42", Conditions::none()).unwrap();
        assert_eq!(*m.handler, "user");
        assert_eq!(m.trace.capture("api/users/42", "id"), Some("42"));

        let m = table.lookup("api/orders/1", Conditions::none()).unwrap();
        assert_eq!(*m.handler, "catch-all");
    }

    #[test]
    fn test_ancestor_is_tried_after_deeper_miss() {
        let mut table = RouteTable::new();
        table.insert("/shop/*.html", "page");
        table.insert("/shop/cart/{id}", "cart");

        let m = table.lookup("shop/cart/a/b", Conditions::none());
        assert!(m.is_none());
        let m = table.lookup("shop/index.html", Conditions::none()).unwrap();
        assert_eq!(*m.handler, "page");
    }

    #[test]
    fn test_registration_order_within_node() {
        let mut table = RouteTable::new();
        table.insert("/a/*", 1);
        table.insert("/a/{x}", 2);
        assert_eq!(*table.lookup("a/b", Conditions::none()).unwrap().handler, 1);
    }

    #[test]
    fn test_case_rules() {
        let mut table = RouteTable::new().case_insensitive(true);
        table.insert("/Docs/{page}", "docs");
        table.insert(">/Exact/*", "exact");
        assert!(table.lookup("docs/intro", Conditions::none()).is_some());
        assert!(table.lookup("exact/x", Conditions::none()).is_none());
        assert!(table.lookup("Exact/x", Conditions::none()).is_some());
    }

    #[test]
    fn test_lookup_with_rejection_continues() {
        let mut table = RouteTable::new();
        table.insert("/a/b/*", "deep");
        table.insert("/a/**", "shallow");
        let m = table
            .lookup_with("a/b/c", Conditions::none(), |h, _| *h != "deep")
            .unwrap();
        assert_eq!(*m.handler, "shallow");
    }

    #[test]
    fn test_unrelated_patterns_do_not_change_result() {
        let mut alone = RouteTable::new();
        alone.insert("/api/v1/users/{id}/profile", 0usize);

        let mut crowded = RouteTable::new();
        for i in 0..10_000usize {
            crowded.insert(&format!("/p{}/x/*", i), i + 1);
        }
        crowded.insert("/api/v1/users/{id}/profile", 0usize);
        assert_eq!(crowded.len(), 10_001);

        let path = "api/v1/users/7/profile";
        let a = alone.lookup(path, Conditions::none()).unwrap();
        let b = crowded.lookup(path, Conditions::none()).unwrap();
        assert_eq!(a.handler, b.handler);
        assert_eq!(a.trace, b.trace);

        let time = |table: &RouteTable<usize>| {
            let start = Instant::now();
            for _ in 0..1_000 {
                assert!(table.lookup(path, Conditions::none()).is_some());
            }
            start.elapsed()
        };
        time(&alone);
        time(&crowded);
        let baseline = time(&alone);
        let loaded = time(&crowded);
        // Same order of magnitude as a one-entry table; testing every mask
        // would be thousands of times slower.
        assert!(
            loaded <= baseline * 20 + Duration::from_millis(20),
            "crowded {:?} vs alone {:?}",
            loaded,
            baseline
        );
    }

    #[test]
    fn test_iter_visits_everything() {
        let mut table = RouteTable::new();
        table.insert("/a/*", 1);
        table.insert("/b/c/*", 2);
        table.insert("*", 3);
        let mut handlers: Vec<i32> = table.iter().map(|(_, h)| *h).collect();
        handlers.sort();
        assert_eq!(handlers, vec![1, 2, 3]);
    }
}
