//! Condition evaluation for `{{expr}}` mask slots.
//!
//! # Responsibilities
//! - Define the evaluator contract consumed by the mask matcher
//! - Provide a default evaluator over the request variable environment
//!
//! # Design Decisions
//! - Evaluation failure never propagates into routing; the matcher swaps in a
//!   sentinel that cannot occur in a normalized path
//! - The environment is a flat string map built once per request

use std::collections::HashMap;
use std::fmt;

/// Variables visible to condition expressions (`HTTP_HOST`, `G_PAGE`, ...).
pub type Environment = HashMap<String, String>;

/// Value substituted for a condition whose evaluation failed.
pub const CONDITION_ERROR_SENTINEL: &str = "~~__error__~~";

/// Error raised by a [`ConditionEvaluator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("malformed expression '{0}'")]
    Malformed(String),
}

/// Evaluates a named condition expression against a variable environment.
pub trait ConditionEvaluator: Send + Sync + fmt::Debug {
    fn evaluate(&self, expression: &str, env: &Environment) -> Result<String, ConditionError>;
}

/// Default evaluator.
///
/// Supported forms:
/// - `'text'` or `"text"`: literal
/// - `A || B || ...`: first alternative that evaluates to a non-empty string
/// - `NAME`: variable lookup
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentEvaluator;

impl EnvironmentEvaluator {
    fn evaluate_term(&self, term: &str, env: &Environment) -> Result<String, ConditionError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ConditionError::Malformed(term.to_string()));
        }
        let bytes = term.as_bytes();
        let quoted = bytes.len() >= 2
            && (bytes[0] == b'\'' || bytes[0] == b'"')
            && bytes[bytes.len() - 1] == bytes[0];
        if quoted {
            return Ok(term[1..term.len() - 1].to_string());
        }
        env.get(term)
            .cloned()
            .ok_or_else(|| ConditionError::UnknownVariable(term.to_string()))
    }
}

impl ConditionEvaluator for EnvironmentEvaluator {
    fn evaluate(&self, expression: &str, env: &Environment) -> Result<String, ConditionError> {
        if !expression.contains("||") {
            return self.evaluate_term(expression, env);
        }
        // Failing alternatives are skipped; an all-empty chain is a valid empty value.
        for alternative in expression.split("||") {
            if let Ok(value) = self.evaluate_term(alternative, env) {
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }
        Ok(String::new())
    }
}

/// Evaluator plus environment, borrowed for the duration of one match call.
#[derive(Clone, Copy, Default)]
pub struct Conditions<'a> {
    scope: Option<(&'a dyn ConditionEvaluator, &'a Environment)>,
}

impl<'a> Conditions<'a> {
    pub fn new(evaluator: &'a dyn ConditionEvaluator, env: &'a Environment) -> Self {
        Self {
            scope: Some((evaluator, env)),
        }
    }

    /// No evaluator: every condition resolves to the sentinel.
    pub fn none() -> Self {
        Self { scope: None }
    }

    /// Resolve an expression, logging failures and substituting the sentinel.
    pub fn resolve(&self, expression: &str) -> String {
        let Some((evaluator, env)) = self.scope else {
            return CONDITION_ERROR_SENTINEL.to_string();
        };
        match evaluator.evaluate(expression, env) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(expression = %expression, error = %e, "Condition evaluation failed");
                CONDITION_ERROR_SENTINEL.to_string()
            }
        }
    }
}

impl fmt::Debug for Conditions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("bound", &self.scope.is_some())
            .finish()
    }
}

/// True when a resolved condition value should be treated as "on".
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty()
        || value == "0"
        || value.eq_ignore_ascii_case("false")
        || value == CONDITION_ERROR_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.insert("HTTP_HOST".into(), "example.com".into());
        env.insert("EMPTY".into(), String::new());
        env
    }

    #[test]
    fn test_variable_lookup() {
        let e = EnvironmentEvaluator;
        assert_eq!(e.evaluate("HTTP_HOST", &env()).unwrap(), "example.com");
        assert_eq!(
            e.evaluate("MISSING", &env()),
            Err(ConditionError::UnknownVariable("MISSING".into()))
        );
    }

    #[test]
    fn test_literals_and_alternatives() {
        let e = EnvironmentEvaluator;
        assert_eq!(e.evaluate("'v1'", &env()).unwrap(), "v1");
        assert_eq!(e.evaluate("EMPTY || 'fallback'", &env()).unwrap(), "fallback");
        assert_eq!(e.evaluate("MISSING || HTTP_HOST", &env()).unwrap(), "example.com");
    }

    #[test]
    fn test_unbound_conditions_yield_sentinel() {
        assert_eq!(Conditions::none().resolve("HTTP_HOST"), CONDITION_ERROR_SENTINEL);
        let env = env();
        let evaluator = EnvironmentEvaluator;
        let conditions = Conditions::new(&evaluator, &env);
        assert_eq!(conditions.resolve("NOPE"), CONDITION_ERROR_SENTINEL);
        assert_eq!(conditions.resolve("HTTP_HOST"), "example.com");
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy("yes"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
        assert!(!is_truthy(CONDITION_ERROR_SENTINEL));
    }
}
