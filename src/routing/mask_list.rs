//! Ordered mask lists evaluated to one boolean.
//!
//! A running result starts from the default policy. Each mask is evaluated
//! only while its negation flag equals the running result; a match flips it.
//! `["/api/**", "!/api/internal/*"]` thus means "under /api except internal".

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::routing::mask::{compile_list, CompiledPattern};

/// Starting value of the running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    #[default]
    False,
    True,
    /// First mask's negation flag; false for an empty list.
    InferOrFalse,
    /// First mask's negation flag; true for an empty list.
    InferOrTrue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskList {
    masks: Vec<CompiledPattern>,
    policy: DefaultPolicy,
    case_insensitive: bool,
}

impl MaskList {
    pub fn new(masks: Vec<CompiledPattern>, policy: DefaultPolicy) -> Self {
        Self {
            masks,
            policy,
            case_insensitive: false,
        }
    }

    /// Parse a comma/semicolon/whitespace separated list of masks.
    pub fn parse(text: &str, policy: DefaultPolicy) -> Self {
        Self::new(compile_list(text), policy)
    }

    pub fn case_insensitive(mut self, insensitive: bool) -> Self {
        self.case_insensitive = insensitive;
        self
    }

    pub fn masks(&self) -> &[CompiledPattern] {
        &self.masks
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    fn initial(&self) -> bool {
        match (self.policy, self.masks.first()) {
            (DefaultPolicy::False, _) => false,
            (DefaultPolicy::True, _) => true,
            (DefaultPolicy::InferOrFalse, None) => false,
            (DefaultPolicy::InferOrTrue, None) => true,
            (DefaultPolicy::InferOrFalse | DefaultPolicy::InferOrTrue, Some(first)) => first.is_negative(),
        }
    }

    /// Evaluate against a normalized path.
    pub fn evaluate(&self, path: &str, conditions: Conditions<'_>) -> bool {
        let mut result = self.initial();
        for mask in &self.masks {
            if mask.is_negative() == result && mask.is_match(path, self.case_insensitive, conditions) {
                result = !result;
            }
        }
        result
    }
}
