//! Handler registry.
//!
//! # Responsibilities
//! - Map handler names to endpoint functions, one namespace per handler kind
//! - Convert configured `params` into the data map handed to a handler
//! - Freeze into an immutable, shareable registry before serving starts
//!
//! # Design Decisions
//! - Registration returns errors instead of aborting; the caller decides
//!   whether a duplicate name is fatal
//! - The registry is an explicit value passed to the gateway state, so
//!   registration order never matters

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::http::request::RequestContext;

/// Endpoint function. Returns true when it fully handled the request.
///
/// For post-processors, true vetoes the upstream response.
pub type EndpointHandler = Arc<dyn Fn(&mut RequestContext) -> bool + Send + Sync>;

/// Converts configured `params` into the block data map.
pub type ParamsInit = Arc<dyn Fn(&[String]) -> Result<HashMap<String, String>, String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Action,
    Module,
    Processor,
    PostProcessor,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Action => "action",
            HandlerKind::Module => "module",
            HandlerKind::Processor => "processor",
            HandlerKind::PostProcessor => "post-processor",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: HandlerKind, name: String },
    #[error("unknown {kind} '{name}'")]
    Unknown { kind: HandlerKind, name: String },
    #[error("invalid params for {kind} '{name}': {message}")]
    Params {
        kind: HandlerKind,
        name: String,
        message: String,
    },
}

#[derive(Clone)]
struct Entry {
    handler: EndpointHandler,
    params_init: Option<ParamsInit>,
}

/// A handler resolved against configuration: the function plus its data.
#[derive(Clone)]
pub struct Block {
    pub name: String,
    pub handler: EndpointHandler,
    pub params: Arc<HashMap<String, String>>,
}

impl Block {
    /// Run the handler with this block's data installed on the context.
    pub fn call(&self, ctx: &mut RequestContext) -> bool {
        ctx.params = Arc::clone(&self.params);
        (self.handler)(ctx)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Default params conversion: each entry is `key:value` or `key=value`,
/// split at the first separator; a bare word maps to an empty value.
pub fn parse_params(params: &[String]) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::with_capacity(params.len());
    for entry in params {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = match entry.find(&[':', '='][..]) {
            Some(at) => (entry[..at].trim(), entry[at + 1..].trim()),
            None => (entry, ""),
        };
        if key.is_empty() {
            return Err(format!("entry '{}' has no key", entry));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<(HandlerKind, String), Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded with the built-in processors.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        for (name, handler) in builtins() {
            // Fresh builder, names are distinct.
            let _ = builder.register(HandlerKind::Processor, name, handler, None);
        }
        builder
    }

    pub fn register_action(&mut self, name: &str, handler: EndpointHandler) -> Result<&mut Self, RegistryError> {
        self.register(HandlerKind::Action, name, handler, None)
    }

    pub fn register_module(&mut self, name: &str, handler: EndpointHandler) -> Result<&mut Self, RegistryError> {
        self.register(HandlerKind::Module, name, handler, None)
    }

    pub fn register_processor(&mut self, name: &str, handler: EndpointHandler) -> Result<&mut Self, RegistryError> {
        self.register(HandlerKind::Processor, name, handler, None)
    }

    pub fn register_post_processor(
        &mut self,
        name: &str,
        handler: EndpointHandler,
    ) -> Result<&mut Self, RegistryError> {
        self.register(HandlerKind::PostProcessor, name, handler, None)
    }

    /// Register with a custom params conversion.
    pub fn register_with_params(
        &mut self,
        kind: HandlerKind,
        name: &str,
        handler: EndpointHandler,
        params_init: ParamsInit,
    ) -> Result<&mut Self, RegistryError> {
        self.register(kind, name, handler, Some(params_init))
    }

    fn register(
        &mut self,
        kind: HandlerKind,
        name: &str,
        handler: EndpointHandler,
        params_init: Option<ParamsInit>,
    ) -> Result<&mut Self, RegistryError> {
        let key = (kind, name.to_string());
        if self.entries.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
        self.entries.insert(key, Entry { handler, params_init });
        tracing::debug!(kind = %kind, name = %name, "Handler registered");
        Ok(self)
    }

    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            entries: self.entries,
        })
    }
}

/// Frozen handler registry.
pub struct Registry {
    entries: HashMap<(HandlerKind, String), Entry>,
}

impl Registry {
    pub fn contains(&self, kind: HandlerKind, name: &str) -> bool {
        self.entries.contains_key(&(kind, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind a registered handler to its configured params.
    pub fn resolve(&self, kind: HandlerKind, name: &str, params: &[String]) -> Result<Block, RegistryError> {
        let entry = self
            .entries
            .get(&(kind, name.to_string()))
            .ok_or_else(|| RegistryError::Unknown {
                kind,
                name: name.to_string(),
            })?;
        let data = match &entry.params_init {
            Some(init) => init(params),
            None => parse_params(params),
        }
        .map_err(|message| RegistryError::Params {
            kind,
            name: name.to_string(),
            message,
        })?;
        Ok(Block {
            name: name.to_string(),
            handler: Arc::clone(&entry.handler),
            params: Arc::new(data),
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .entries
            .keys()
            .map(|(kind, name)| format!("{}:{}", kind, name))
            .collect();
        names.sort();
        f.debug_struct("Registry").field("entries", &names).finish()
    }
}

fn builtins() -> Vec<(&'static str, EndpointHandler)> {
    vec![
        ("hidefile", Arc::new(hide_file) as EndpointHandler),
        ("static_headers", Arc::new(static_headers) as EndpointHandler),
    ]
}

/// Hides matching files behind a 404.
fn hide_file(ctx: &mut RequestContext) -> bool {
    ctx.fail(axum::http::StatusCode::NOT_FOUND, "File Not Found");
    true
}

/// Adds every param as a response header and lets serving continue.
fn static_headers(ctx: &mut RequestContext) -> bool {
    let params = Arc::clone(&ctx.params);
    for (name, value) in params.iter() {
        if let Err(e) = ctx.set_header(name, value) {
            tracing::warn!(header = %name, error = %e, "static_headers skipped an invalid header");
        }
    }
    false
}
