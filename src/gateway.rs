//! Compiled gateway state.
//!
//! # Responsibilities
//! - Turn a validated `GatewayConfig` into immutable, request-ready structures
//! - Resolve configured handler names against the registry
//! - Select the host server for a request host
//!
//! # Design Decisions
//! - Built once per configuration version and swapped atomically on reload
//! - Unknown handler names fail the build; bad masks only degrade
//! - Host names are matched exactly, case-insensitively; the first entry
//!   naming a host wins

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::condition::{ConditionEvaluator, Conditions, EnvironmentEvaluator};
use crate::config::schema::{GatewayConfig, HostServerConfig, ProcessorConfig, ProxySettings, RequestLogLevel};
use crate::http::headers::HeaderPolicy;
use crate::http::request::RequestContext;
use crate::registry::{Block, HandlerKind, Registry, RegistryError};
use crate::routing::{split_list, DefaultPolicy, MaskList, Rewriter, RouteTable};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("host server '{server}': {source}")]
    Registry {
        server: String,
        #[source]
        source: RegistryError,
    },
}

/// A processor bound to the mask list selecting the paths it runs on.
#[derive(Debug)]
pub struct ProcessorBlock {
    pub block: Block,
    pub masks: MaskList,
}

/// Run every block whose mask list accepts the routing path, in order,
/// until one returns true.
pub fn run_processors(
    blocks: &[ProcessorBlock],
    ctx: &mut RequestContext,
    evaluator: &dyn ConditionEvaluator,
) -> bool {
    if blocks.is_empty() {
        return false;
    }
    let env = Arc::clone(&ctx.environment);
    let path = ctx.path.clone();
    let conditions = Conditions::new(evaluator, &env);
    for processor in blocks {
        if processor.masks.evaluate(&path, conditions) && processor.block.call(ctx) {
            tracing::debug!(request_id = %ctx.request_id, processor = %processor.block.name, "Processor handled request");
            return true;
        }
    }
    false
}

/// Upstream chosen when its filter accepts the path.
#[derive(Debug)]
pub struct FilteredProxy {
    pub url: String,
    pub filter: MaskList,
}

/// Request-ready settings for one host server.
#[derive(Debug)]
pub struct HostServer {
    pub name: String,
    pub case_insensitive: bool,
    pub base_folder: Option<PathBuf>,
    pub extra_static_folder: Option<PathBuf>,
    pub directory_index: Vec<String>,
    pub rewrites: Rewriter,
    pub server_rewrites: Rewriter,
    pub actions: RouteTable<Block>,
    pub modules: RouteTable<Block>,
    pub processors: Vec<ProcessorBlock>,
    pub post_processors: Vec<ProcessorBlock>,
    /// Lower-cased request host → upstream base url.
    pub proxy_hosts: HashMap<String, String>,
    pub proxy_servers: Vec<FilteredProxy>,
    pub proxy_server: Option<String>,
    /// Bare host form of `proxy_name`.
    pub proxy_name: Option<String>,
    pub domain_name: Option<String>,
    pub host_header: String,
    pub proxy_settings: ProxySettings,
    pub headers: HeaderPolicy,
    pub log_level: RequestLogLevel,
}

/// Reduce a configured proxy identity to its host part.
pub fn prepare_proxy_name(name: &str) -> String {
    let mut name = name.trim();
    if let Some(at) = name.find("//") {
        name = &name[at + 2..];
    }
    if let Some(at) = name.find('/') {
        if at > 0 {
            name = &name[..at];
        }
    }
    name.to_string()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn existing_folder(kind: &str, value: Option<&str>) -> Option<PathBuf> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        Some(path)
    } else {
        tracing::warn!(kind = %kind, path = %value, "Folder does not exist, branch disabled");
        None
    }
}

fn resolve_processors(
    registry: &Registry,
    kind: HandlerKind,
    entries: &[ProcessorConfig],
    case_insensitive: bool,
) -> Result<Vec<ProcessorBlock>, RegistryError> {
    entries
        .iter()
        .map(|entry| {
            let block = registry.resolve(kind, entry.name.trim(), &entry.params)?;
            let masks = MaskList::parse(&entry.urls, DefaultPolicy::InferOrFalse).case_insensitive(case_insensitive);
            Ok(ProcessorBlock { block, masks })
        })
        .collect()
}

impl HostServer {
    pub fn build(name: &str, config: &HostServerConfig, registry: &Registry) -> Result<Self, RegistryError> {
        let insensitive = config.case_insensitive;

        let mut actions = RouteTable::new().case_insensitive(insensitive);
        for entry in &config.actions {
            let block = registry.resolve(HandlerKind::Action, entry.name.trim(), &entry.params)?;
            actions.insert(entry.url.trim(), block);
        }
        let mut modules = RouteTable::new().case_insensitive(insensitive);
        for entry in &config.modules {
            let block = registry.resolve(HandlerKind::Module, entry.name.trim(), &entry.params)?;
            modules.insert(entry.url.trim(), block);
        }

        let proxy_servers = config
            .proxy_servers
            .iter()
            .map(|entry| FilteredProxy {
                url: entry.url.trim().to_string(),
                filter: MaskList::parse(&entry.filter, entry.default_policy).case_insensitive(insensitive),
            })
            .collect();

        let directory_index = if config.directory_index.is_empty() {
            crate::config::schema::default_directory_index()
        } else {
            config.directory_index.clone()
        };

        Ok(Self {
            name: name.to_string(),
            case_insensitive: insensitive,
            base_folder: existing_folder("base_folder", Some(config.base_folder.as_str())),
            extra_static_folder: existing_folder("extra_static_folder", config.effective_extra_static_folder()),
            directory_index,
            rewrites: Rewriter::build(&config.rewrites),
            server_rewrites: Rewriter::build(&config.server_rewrites),
            actions,
            modules,
            processors: resolve_processors(registry, HandlerKind::Processor, &config.processors, insensitive)?,
            post_processors: resolve_processors(
                registry,
                HandlerKind::PostProcessor,
                &config.post_processors,
                insensitive,
            )?,
            proxy_hosts: config
                .proxy_hosts
                .iter()
                .map(|(host, url)| (host.trim().to_ascii_lowercase(), url.trim().to_string()))
                .collect(),
            proxy_servers,
            proxy_server: config.effective_proxy_server().map(str::to_string),
            proxy_name: non_empty(&prepare_proxy_name(&config.proxy_name)),
            domain_name: non_empty(&config.domain_name),
            host_header: config.host_header.trim().to_string(),
            proxy_settings: config.proxy_settings.clone(),
            headers: HeaderPolicy::from_config(config),
            log_level: config.log_level,
        })
    }
}

/// Everything the dispatcher needs for one configuration version.
#[derive(Debug)]
pub struct GatewayState {
    pub default_server: Arc<HostServer>,
    pub hosts: HashMap<String, Arc<HostServer>>,
    pub evaluator: Arc<dyn ConditionEvaluator>,
    pub strip_port_from_host: bool,
    pub host_in_path: bool,
    pub max_body_size: usize,
}

impl GatewayState {
    pub fn build(config: &GatewayConfig, registry: &Registry) -> Result<Self, GatewayError> {
        Self::build_with_evaluator(config, registry, Arc::new(EnvironmentEvaluator))
    }

    pub fn build_with_evaluator(
        config: &GatewayConfig,
        registry: &Registry,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Result<Self, GatewayError> {
        let default_server = HostServer::build("default", &config.server, registry).map_err(|source| {
            GatewayError::Registry {
                server: "default".to_string(),
                source,
            }
        })?;

        let mut hosts: HashMap<String, Arc<HostServer>> = HashMap::new();
        for (i, server_config) in config.host_servers.iter().enumerate() {
            let names: Vec<String> = split_list(&server_config.hosts)
                .into_iter()
                .map(str::to_ascii_lowercase)
                .collect();
            let Some(first) = names.first() else {
                tracing::warn!(index = i, "Host server without hosts skipped");
                continue;
            };
            let server = HostServer::build(first, server_config, registry).map_err(|source| {
                GatewayError::Registry {
                    server: first.clone(),
                    source,
                }
            })?;
            let server = Arc::new(server);
            for name in names {
                if hosts.contains_key(&name) {
                    tracing::warn!(host = %name, index = i, "Host already served by an earlier entry, skipped");
                    continue;
                }
                hosts.insert(name, Arc::clone(&server));
            }
        }

        tracing::info!(
            host_servers = hosts.len(),
            actions = default_server.actions.len(),
            modules = default_server.modules.len(),
            "Gateway state built"
        );

        Ok(Self {
            default_server: Arc::new(default_server),
            hosts,
            evaluator,
            strip_port_from_host: config.listener.strip_port_from_host,
            host_in_path: config.listener.host_in_path,
            max_body_size: config.listener.max_body_size,
        })
    }

    /// Host-server selection key for a raw `Host` value.
    pub fn host_key(&self, raw_host: &str) -> String {
        let host = raw_host.trim();
        let host = if self.strip_port_from_host {
            strip_port(host)
        } else {
            host
        };
        host.to_ascii_lowercase()
    }

    pub fn server_for(&self, host: &str) -> Arc<HostServer> {
        self.hosts
            .get(host)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.default_server))
    }
}

/// `example.com:8080` → `example.com`, `[::1]:80` → `[::1]`.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rfind(':') {
        Some(at) if host[at + 1..].bytes().all(|b| b.is_ascii_digit()) => &host[..at],
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EndpointConfig;
    use crate::registry::RegistryBuilder;

    fn registry() -> Arc<Registry> {
        let mut builder = RegistryBuilder::with_builtins();
        builder
            .register_action("echo", Arc::new(|_: &mut crate::http::request::RequestContext| true))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_prepare_proxy_name() {
        assert_eq!(prepare_proxy_name("https://gw.example/path"), "gw.example");
        assert_eq!(prepare_proxy_name(" gw.example "), "gw.example");
        assert_eq!(prepare_proxy_name(""), "");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("a.example:8080"), "a.example");
        assert_eq!(strip_port("a.example"), "a.example");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
    }

    #[test]
    fn test_host_selection_first_wins() {
        let mut config = GatewayConfig::default();
        config.host_servers.push(HostServerConfig {
            hosts: "A.example, b.example".into(),
            proxy_server: "http://first:80".into(),
            ..Default::default()
        });
        config.host_servers.push(HostServerConfig {
            hosts: "b.example".into(),
            proxy_server: "http://second:80".into(),
            ..Default::default()
        });
        config.host_servers.push(HostServerConfig::default());

        let state = GatewayState::build(&config, &registry()).unwrap();
        assert_eq!(state.hosts.len(), 2);
        let key = state.host_key("B.example:8080");
        assert_eq!(key, "b.example");
        assert_eq!(state.server_for(&key).proxy_server.as_deref(), Some("http://first:80"));
        assert_eq!(state.server_for("other.example").name, "default");
    }

    #[test]
    fn test_unknown_handler_fails_build() {
        let mut config = GatewayConfig::default();
        config.server.actions.push(EndpointConfig {
            name: "missing".into(),
            url: "/x".into(),
            params: vec![],
        });
        let err = GatewayState::build(&config, &registry()).unwrap_err();
        assert!(err.to_string().contains("unknown action 'missing'"));

        config.server.actions[0].name = "echo".into();
        let state = GatewayState::build(&config, &registry()).unwrap();
        assert_eq!(state.default_server.actions.len(), 1);
    }

    #[test]
    fn test_missing_base_folder_disables_branch() {
        let mut config = GatewayConfig::default();
        config.server.base_folder = "/definitely/not/a/folder".into();
        let state = GatewayState::build(&config, &registry()).unwrap();
        assert!(state.default_server.base_folder.is_none());
    }
}
