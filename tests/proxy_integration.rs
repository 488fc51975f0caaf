//! Reverse-proxy behavior through a running gateway.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use microgate::config::schema::{ProcessorConfig, ProxyServerConfig};
use microgate::config::GatewayConfig;
use microgate::registry::{EndpointHandler, RegistryBuilder};
use microgate::routing::DefaultPolicy;
use microgate::RequestContext;

mod common;
use common::MockResponse;

fn registry() -> Arc<microgate::Registry> {
    RegistryBuilder::with_builtins().build()
}

#[tokio::test]
async fn test_outbound_url_and_host() {
    let (upstream, requests) = common::start_mock_upstream(MockResponse::ok("upstream")).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", upstream);
    let gateway = common::start_gateway(config, registry()).await;

    let res = common::client().get(gateway.url("/v1/x?y=1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "upstream");

    let seen = requests.lock().unwrap()[0].clone();
    assert_eq!(seen.request_line, "GET /v1/x?y=1 HTTP/1.1");
    assert_eq!(seen.header("host"), Some(upstream.to_string().as_str()));
    assert!(seen.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_request_body_is_forwarded() {
    let (upstream, requests) = common::start_mock_upstream(MockResponse::ok("stored")).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", upstream);
    let gateway = common::start_gateway(config, registry()).await;

    let res = common::client()
        .post(gateway.url("/items"))
        .body("{\"name\":\"a\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let seen = requests.lock().unwrap()[0].clone();
    assert_eq!(seen.request_line, "POST /items HTTP/1.1");
    assert_eq!(seen.body, "{\"name\":\"a\"}");
}

#[tokio::test]
async fn test_proxy_identity_rewrites_origin_and_referer() {
    let (upstream, requests) = common::start_mock_upstream(MockResponse::ok("ok")).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", upstream);
    config.server.proxy_name = "https://gw.example/".into();
    config.server.host_header = "api.internal".into();
    let gateway = common::start_gateway(config, registry()).await;

    common::client()
        .get(gateway.url("/page"))
        .header("origin", "https://app.example")
        .header("referer", "https://app.example/a/b?c=1")
        .send()
        .await
        .unwrap();

    let seen = requests.lock().unwrap()[0].clone();
    assert_eq!(seen.header("origin"), Some("https://gw.example"));
    assert_eq!(seen.header("referer"), Some("https://gw.example/a/b?c=1"));
    assert_eq!(seen.header("host"), Some("api.internal"));
}

#[tokio::test]
async fn test_set_cookie_domain_rewrite() {
    let response = MockResponse::ok("ok")
        .with_header("Set-Cookie", "sid=1; domain=old.example; Path=/")
        .with_header("Set-Cookie", "theme=dark; Path=/");
    let (upstream, _) = common::start_mock_upstream(response).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", upstream);
    config.server.domain_name = "new.example".into();
    let gateway = common::start_gateway(config, registry()).await;

    let res = common::client().get(gateway.url("/login")).send().await.unwrap();
    let cookies: Vec<&str> = res
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(cookies, vec!["sid=1; domain=new.example; Path=/", "theme=dark; Path=/"]);
}

#[tokio::test]
async fn test_connection_refused_is_json_500() {
    let dead = common::closed_port().await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", dead);
    let gateway = common::start_gateway(config, registry()).await;

    let res = common::client().get(gateway.url("/anything")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.headers()["content-type"], "application/json");
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["errorMessage"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let response = MockResponse {
        status: "503 Service Unavailable",
        headers: Vec::new(),
        body: "down".into(),
    };
    let (upstream, _) = common::start_mock_upstream(response).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", upstream);
    let gateway = common::start_gateway(config, registry()).await;

    let res = common::client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "down");
}

#[tokio::test]
async fn test_host_then_filtered_then_default_proxy() {
    let (by_host, _) = common::start_mock_upstream(MockResponse::ok("host")).await;
    let (api, _) = common::start_mock_upstream(MockResponse::ok("api")).await;
    let (fallback, _) = common::start_mock_upstream(MockResponse::ok("default")).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_hosts = BTreeMap::from([("tenant.example".to_string(), format!("http://{}", by_host))]);
    config.server.proxy_servers = vec![ProxyServerConfig {
        url: format!("http://{}", api),
        filter: "api/** !api/internal/*".into(),
        default_policy: DefaultPolicy::False,
    }];
    config.server.proxy_server = format!("http://{}", fallback);
    let gateway = common::start_gateway(config, registry()).await;
    let client = common::client();

    let text = |path: &'static str| {
        let client = client.clone();
        let url = gateway.url(path);
        async move { client.get(url).send().await.unwrap().text().await.unwrap() }
    };
    assert_eq!(text("/api/users").await, "api");
    assert_eq!(text("/api/internal/secrets").await, "default");
    assert_eq!(text("/web/index").await, "default");

    let res = client
        .get(gateway.url("/api/users"))
        .header("host", "tenant.example:8080")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "host");
}

#[tokio::test]
async fn test_post_processor_veto_becomes_not_found() {
    let (upstream, _) = common::start_mock_upstream(MockResponse::ok("top secret payload")).await;

    let mut builder = RegistryBuilder::with_builtins();
    let censor: EndpointHandler =
        Arc::new(|ctx: &mut RequestContext| String::from_utf8_lossy(&ctx.output).contains("secret"));
    builder.register_post_processor("censor", censor).unwrap();
    let stamp: EndpointHandler = Arc::new(|ctx: &mut RequestContext| {
        ctx.write(b" (checked)");
        false
    });
    builder.register_post_processor("stamp", stamp).unwrap();

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", upstream);
    config.server.post_processors = vec![
        ProcessorConfig {
            name: "censor".into(),
            urls: "private/**".into(),
            params: Vec::new(),
        },
        ProcessorConfig {
            name: "stamp".into(),
            urls: "public/**".into(),
            params: Vec::new(),
        },
    ];
    let gateway = common::start_gateway(config, builder.build()).await;

    let res = common::client().get(gateway.url("/private/doc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), r#"{"errorMessage": "Not Found"}"#);

    let res = common::client().get(gateway.url("/public/doc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "top secret payload (checked)");
}

#[tokio::test]
async fn test_config_update_switches_upstream() {
    let (first, _) = common::start_mock_upstream(MockResponse::ok("first")).await;
    let (second, _) = common::start_mock_upstream(MockResponse::ok("second")).await;

    let mut config = GatewayConfig::default();
    config.server.proxy_server = format!("http://{}", first);
    let gateway = common::start_gateway(config.clone(), registry()).await;
    let client = common::client();

    let res = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "first");

    config.server.proxy_server = format!("http://{}", second);
    gateway.updates.send(config).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "second");
}
