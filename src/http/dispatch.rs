//! Request dispatcher.
//!
//! # Responsibilities
//! - Walk the branch chain for one request, in a fixed order
//! - Record which branch produced the response
//!
//! # Data Flow
//! ```text
//! host_in_path prefix → base rewrite
//!     → base folder (processors, then file)
//!     → actions → modules
//!     → server rewrite
//!     → extra static folder → proxy_hosts → proxy_servers → proxy_server
//!     → not found
//! ```
//!
//! # Design Decisions
//! - The order is fixed and does not depend on which branches are configured
//! - `HandledBy` is diagnostic only: logs and metrics labels

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;

use crate::condition::Conditions;
use crate::config::RequestLogLevel;
use crate::gateway::{run_processors, GatewayState};
use crate::http::request::RequestContext;
use crate::http::response::{finish, local_response};
use crate::http::static_files::{self, Resolved};
use crate::proxy::{forward, ClientPool, ForwardOutcome};
use crate::registry::Block;
use crate::routing::{Rewriter, RouteTable};

/// Branch that produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledBy {
    Static,
    Processor,
    Action,
    Module,
    RewriteStatic,
    HostProxy,
    FilteredProxy,
    DefaultProxy,
    NotFound,
    Options,
    Error,
}

impl HandledBy {
    pub fn as_str(self) -> &'static str {
        match self {
            HandledBy::Static => "static",
            HandledBy::Processor => "processor",
            HandledBy::Action => "action",
            HandledBy::Module => "module",
            HandledBy::RewriteStatic => "rewrite_static",
            HandledBy::HostProxy => "host_proxy",
            HandledBy::FilteredProxy => "filtered_proxy",
            HandledBy::DefaultProxy => "default_proxy",
            HandledBy::NotFound => "not_found",
            HandledBy::Options => "options",
            HandledBy::Error => "error",
        }
    }
}

impl std::fmt::Display for HandledBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produce the response for one request.
pub async fn dispatch(state: &GatewayState, pool: &ClientPool, ctx: &mut RequestContext) -> Response {
    let server = Arc::clone(&ctx.server);
    let evaluator = Arc::clone(&state.evaluator);
    let env = Arc::clone(&ctx.environment);
    let conditions = Conditions::new(evaluator.as_ref(), &env);

    log_request(ctx);

    if state.host_in_path && !ctx.host.is_empty() {
        let prefixed = format!("{}/{}", ctx.host, ctx.path);
        ctx.set_path(&prefixed);
    }
    apply_rewrite(&server.rewrites, ctx, conditions);

    if let Some(folder) = server.base_folder.as_deref() {
        if let Resolved::File { file, path } = static_files::resolve(folder, &ctx.path, &server.directory_index).await
        {
            if ctx.is_options() {
                return options_response(ctx);
            }
            ctx.set_path(&path);
            if run_processors(&server.processors, ctx, evaluator.as_ref()) {
                ctx.handled_by = HandledBy::Processor;
                return local_response(ctx);
            }
            static_files::serve_file(ctx, &file).await;
            ctx.handled_by = HandledBy::Static;
            return local_response(ctx);
        }
    }

    if call_route(&server.actions, ctx, conditions) {
        ctx.handled_by = HandledBy::Action;
        return local_response(ctx);
    }
    if call_route(&server.modules, ctx, conditions) {
        ctx.handled_by = HandledBy::Module;
        return local_response(ctx);
    }

    apply_rewrite(&server.server_rewrites, ctx, conditions);

    if let Some(folder) = server.extra_static_folder.as_deref() {
        if let Resolved::File { file, path } = static_files::resolve(folder, &ctx.path, &server.directory_index).await
        {
            if ctx.is_options() {
                return options_response(ctx);
            }
            ctx.set_path(&path);
            static_files::serve_file(ctx, &file).await;
            ctx.handled_by = HandledBy::RewriteStatic;
            return local_response(ctx);
        }
    }

    if let Some(upstream) = server.proxy_hosts.get(&ctx.host) {
        return proxy(ctx, pool, state, upstream, HandledBy::HostProxy).await;
    }
    let filtered = server
        .proxy_servers
        .iter()
        .find(|entry| entry.filter.evaluate(&ctx.path, conditions));
    if let Some(entry) = filtered {
        return proxy(ctx, pool, state, &entry.url, HandledBy::FilteredProxy).await;
    }
    if let Some(upstream) = server.proxy_server.as_deref() {
        return proxy(ctx, pool, state, upstream, HandledBy::DefaultProxy).await;
    }

    tracing::debug!(request_id = %ctx.request_id, path = %ctx.path, "No branch handled request");
    ctx.fail(StatusCode::NOT_FOUND, "Not Found");
    ctx.handled_by = HandledBy::NotFound;
    local_response(ctx)
}

fn log_request(ctx: &RequestContext) {
    let level = ctx.server.log_level;
    if level >= RequestLogLevel::Input && !ctx.is_options() {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.uri.path(),
            host = %ctx.host,
            size = ctx.body.len(),
            "Request"
        );
    } else if level >= RequestLogLevel::Url {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.uri.path(),
            host = %ctx.host,
            "Request"
        );
    }
}

fn apply_rewrite(rewriter: &Rewriter, ctx: &mut RequestContext, conditions: Conditions<'_>) {
    if rewriter.is_empty() {
        return;
    }
    if let Some(path) = rewriter.apply(&ctx.path, conditions) {
        ctx.set_path(&path);
    }
}

/// Run handlers whose mask matches until one reports the request handled.
fn call_route(table: &RouteTable<Block>, ctx: &mut RequestContext, conditions: Conditions<'_>) -> bool {
    if table.is_empty() {
        return false;
    }
    let path = ctx.path.clone();
    let hit = table.lookup_with(&path, conditions, |block, trace| {
        ctx.captures = trace.captures(&path);
        block.call(ctx)
    });
    match hit {
        Some(hit) => {
            tracing::debug!(
                request_id = %ctx.request_id,
                handler = %hit.handler.name,
                mask = %hit.pattern.source(),
                "Handler matched"
            );
            true
        }
        None => {
            ctx.captures.clear();
            false
        }
    }
}

fn options_response(ctx: &mut RequestContext) -> Response {
    ctx.set_status(StatusCode::OK);
    ctx.output.clear();
    ctx.handled_by = HandledBy::Options;
    local_response(ctx)
}

async fn proxy(
    ctx: &mut RequestContext,
    pool: &ClientPool,
    state: &GatewayState,
    upstream: &str,
    branch: HandledBy,
) -> Response {
    ctx.handled_by = branch;
    match forward(ctx, pool, state.evaluator.as_ref(), upstream).await {
        ForwardOutcome::Forwarded => finish(ctx),
        ForwardOutcome::Vetoed => local_response(ctx),
        ForwardOutcome::Failed => {
            ctx.handled_by = HandledBy::Error;
            local_response(ctx)
        }
    }
}
