//! Path rewriting.
//!
//! # Responsibilities
//! - First-segment map for plain literal rules (`/old` or `/old/*`)
//! - Masked rules for everything else, with `{name}` / `{N}` templates
//!
//! # Design Decisions
//! - Plain rules are tried first, in configuration order; the first hit wins
//! - A plain rule replaces the whole path with its target
//! - A masked rule applies only when its condition (if any) is truthy
//! - Every rewrite is single-shot; `options` words are accepted and ignored

use std::collections::HashMap;

use crate::condition::{is_truthy, Conditions};
use crate::config::schema::RewriteConfig;
use crate::routing::matcher::{normalize_path, MatchTrace};
use crate::routing::router::RouteTable;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PrefixRule {
    from: String,
    full: bool,
    to: String,
}

/// Target side of a masked rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub to: String,
    pub condition: Option<String>,
}

#[derive(Debug, Default)]
pub struct Rewriter {
    plain: HashMap<String, Vec<PrefixRule>>,
    masked: RouteTable<RewriteRule>,
}

/// True for `from` values that belong in the first-segment map.
fn is_plain(from: &str) -> bool {
    let body = from.strip_suffix('*').unwrap_or(from);
    !body.contains(&['?', '*', '{', '}', '`', '^', '$', '!', '<', '>'][..])
}

impl Rewriter {
    pub fn build(rules: &[RewriteConfig]) -> Self {
        let mut rewriter = Rewriter::default();
        for rule in rules {
            let from = rule.from.trim();
            if from.is_empty() {
                tracing::warn!(to = %rule.to, "Rewrite rule without 'from' skipped");
                continue;
            }
            if is_plain(from) && rule.condition.trim().is_empty() {
                let (body, full) = match from.strip_suffix('*') {
                    Some(body) => (body, false),
                    None => (from, true),
                };
                let normalized = normalize_path(body);
                // Keep the separator so "/api/*" does not match "apix".
                let from = if !full && body.ends_with('/') && !normalized.is_empty() {
                    format!("{}/", normalized)
                } else {
                    normalized
                };
                let key = from.split('/').next().unwrap_or_default().to_string();
                rewriter.plain.entry(key).or_default().push(PrefixRule {
                    from,
                    full,
                    to: rule.to.clone(),
                });
                continue;
            }

            if !rule.options.trim().is_empty() {
                tracing::debug!(options = %rule.options, from = %from, "Rewrite options ignored");
            }
            let condition = Some(rule.condition.trim().to_string()).filter(|c| !c.is_empty());
            rewriter.masked.insert(
                from,
                RewriteRule {
                    to: rule.to.clone(),
                    condition,
                },
            );
        }
        rewriter
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.masked.is_empty()
    }

    /// Rewrite a normalized path. Returns the new normalized path when a rule applied.
    pub fn apply(&self, path: &str, conditions: Conditions<'_>) -> Option<String> {
        if let Some(rewritten) = self.apply_plain(path) {
            return Some(rewritten);
        }
        self.apply_masked(path, conditions)
    }

    fn apply_plain(&self, path: &str) -> Option<String> {
        let key = path.split('/').next().unwrap_or_default();
        let rule = self.plain.get(key)?.iter().find(|rule| {
            if rule.full {
                path == rule.from
            } else {
                path.starts_with(rule.from.as_str())
            }
        })?;
        tracing::debug!(from = %path, to = %rule.to, "Path rewritten");
        Some(normalize_path(&rule.to))
    }

    fn apply_masked(&self, path: &str, conditions: Conditions<'_>) -> Option<String> {
        let found = self.masked.lookup_with(path, conditions, |rule, _| match &rule.condition {
            Some(expression) => is_truthy(&conditions.resolve(expression)),
            None => true,
        })?;
        let target = expand_template(&found.handler.to, &found.trace, path);
        tracing::debug!(
            from = %path,
            to = %target,
            mask = %found.pattern,
            "Path rewritten"
        );
        Some(normalize_path(&target))
    }
}

/// Substitute `{name}` and `{N}` placeholders with captured text.
/// Unknown placeholders are kept verbatim.
pub fn expand_template(template: &str, trace: &MatchTrace, path: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = after[..close].trim();
                match trace.capture(path, key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(&after[..=close]);
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Environment, EnvironmentEvaluator};

    fn rule(from: &str, to: &str) -> RewriteConfig {
        RewriteConfig {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_exact_and_prefix() {
        let r = Rewriter::build(&[rule("/old", "/new"), rule("/api/*", "/v2")]);
        assert_eq!(r.apply("old", Conditions::none()), Some("new".into()));
        assert_eq!(r.apply("old/x", Conditions::none()), None);
        assert_eq!(r.apply("api/users/1", Conditions::none()), Some("v2".into()));
        assert_eq!(r.apply("apix", Conditions::none()), None);
    }

    #[test]
    fn test_plain_first_in_order_wins() {
        let r = Rewriter::build(&[
            rule("/api/*", "/generic"),
            rule("/api/admin/*", "/admin"),
            rule("/shop/cart/*", "/cart"),
            rule("/shop/*", "/store"),
        ]);
        assert_eq!(r.apply("api/admin/users", Conditions::none()), Some("generic".into()));
        assert_eq!(r.apply("shop/cart/3", Conditions::none()), Some("cart".into()));
        assert_eq!(r.apply("shop/items", Conditions::none()), Some("store".into()));
    }

    #[test]
    fn test_options_do_not_change_rewrite() {
        let mut with_options = rule("/docs/{page}", "/manual/{page}");
        with_options.options = "last, break".into();
        let r = Rewriter::build(&[with_options]);
        assert_eq!(r.apply("docs/intro", Conditions::none()), Some("manual/intro".into()));
    }

    #[test]
    fn test_masked_rule_with_template() {
        let r = Rewriter::build(&[rule("/users/{id}/`([a-z]+)`", "/profiles/{id}/{2}")]);
        assert_eq!(
            r.apply("users/42/edit", Conditions::none()),
            Some("profiles/42/edit".into())
        );
        assert_eq!(r.apply("users/42/9", Conditions::none()), None);
    }

    #[test]
    fn test_masked_rule_condition() {
        let mut gated = rule("/beta/**", "/next/{1}");
        gated.condition = "G_BETA".into();
        let r = Rewriter::build(&[gated]);
        let evaluator = EnvironmentEvaluator;

        let mut env = Environment::new();
        env.insert("G_BETA".into(), "1".into());
        assert_eq!(
            r.apply("beta/a/b", Conditions::new(&evaluator, &env)),
            Some("next/a/b".into())
        );

        env.insert("G_BETA".into(), "0".into());
        assert_eq!(r.apply("beta/a/b", Conditions::new(&evaluator, &env)), None);
        assert_eq!(r.apply("beta/a/b", Conditions::none()), None);
    }

    #[test]
    fn test_expand_template_keeps_unknown() {
        let p = crate::routing::mask::CompiledPattern::compile("/x/{a}");
        let trace = p.matches("x/1", false, Conditions::none()).unwrap();
        assert_eq!(expand_template("/y/{a}/{zz}/{", &trace, "x/1"), "/y/1/{zz}/{");
    }
}
