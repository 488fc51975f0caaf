//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Configuration (at startup / reload):
//!     mask strings
//!     → mask.rs (compile: modifiers, fixed prefix/suffix, middle parts)
//!     → router.rs (index by fixed-prefix segments)
//!     → Freeze as immutable RouteTable / MaskList / Rewriter
//!
//! Incoming Request (normalized path, request environment):
//!     → rewrite.rs (base / server rewrites)
//!     → router.rs (trie descent, deepest node first)
//!     → matcher.rs (prefix/suffix reject, anchored backtracking)
//!     → Return: handler + MatchTrace, or no route
//! ```
//!
//! # Design Decisions
//! - Masks compiled at startup, immutable at runtime
//! - A bad mask degrades and logs, it never fails configuration loading
//! - Deterministic: same pattern, path and environment always give the same trace
//! - Leftmost-shortest commit for ambiguous wildcards

pub mod mask;
pub mod mask_list;
pub mod matcher;
pub mod rewrite;
pub mod router;

pub use mask::{compile_list, split_list, CaseSensitivity, CompiledPattern, MiddlePart, UNBOUNDED};
pub use mask_list::{DefaultPolicy, MaskList};
pub use matcher::{normalize_path, split_segments, MatchTrace, Span};
pub use rewrite::Rewriter;
pub use router::{RouteMatch, RouteTable};
