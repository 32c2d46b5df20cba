//! HTTP tool - issue a single request with host filtering and a size cap
//!
//! Any HTTP status counts as success; only transport failures, policy
//! denials, and oversized bodies fail. Redirects are not followed.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use url::{Host, Url};

use crate::constants::tools::{HTTP_MAX_RESPONSE, HTTP_TIMEOUT, HTTP_USER_AGENT};
use crate::tools::registry::{
    parse_params, DangerLevel, ParameterType, Tool, ToolCategory, ToolContext, ToolDefinition,
    ToolError, ToolOutput, ToolParameter,
};

/// Cloud metadata endpoints
const FORBIDDEN_HOSTNAMES: &[&str] = &["metadata.google.internal", "metadata"];

const FORBIDDEN_IPS: &[&str] = &["169.254.169.254", "100.100.100.200", "fd00:ec2::254"];

const FORBIDDEN_MESSAGE: &str = "forbidden host";
const OVERSIZE_MESSAGE: &str = "Response size exceeds maximum allowed";

static DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "http".to_string(),
    description: "Make an HTTP request and return status, headers, and body".to_string(),
    category: ToolCategory::Web,
    parameters: vec![
        ToolParameter::required("url", ParameterType::String, "Request URL (http or https)"),
        ToolParameter::optional("method", ParameterType::String, "HTTP method")
            .with_default(json!("GET")),
        ToolParameter::optional("headers", ParameterType::Object, "Request headers"),
        ToolParameter::optional(
            "body",
            ParameterType::Any,
            "Request body for POST, PUT, and PATCH",
        ),
    ],
    requires_permission: true,
    danger_level: DangerLevel::Medium,
});

pub struct HttpTool;

#[derive(Deserialize)]
struct Params {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, Value>,
    #[serde(default)]
    body: Option<Value>,
}

fn is_forbidden_ip(ip: &IpAddr) -> bool {
    let canonical = match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(*v6)),
        other => *other,
    };
    FORBIDDEN_IPS
        .iter()
        .filter_map(|s| s.parse::<IpAddr>().ok())
        .any(|blocked| blocked == canonical)
}

/// Literal host check, before any resolution
fn is_forbidden_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            FORBIDDEN_HOSTNAMES.contains(&domain.as_str())
                || domain
                    .parse::<IpAddr>()
                    .map(|ip| is_forbidden_ip(&ip))
                    .unwrap_or(false)
        }
        Host::Ipv4(v4) => is_forbidden_ip(&IpAddr::V4(*v4)),
        Host::Ipv6(v6) => is_forbidden_ip(&IpAddr::V6(*v6)),
    }
}

/// Addresses a domain resolved to when it was checked. The client connects
/// to exactly these so a second lookup cannot swap them.
struct PinnedHost {
    domain: String,
    addrs: Vec<SocketAddr>,
}

/// Reject the URL if its host, or any address it resolves to, is denylisted.
async fn check_destination(url: &Url) -> Result<Option<PinnedHost>, ToolError> {
    let host = url
        .host()
        .ok_or_else(|| ToolError::Validation("URL has no host".to_string()))?;
    if is_forbidden_host(&host) {
        return Err(ToolError::PermissionDenied(FORBIDDEN_MESSAGE.to_string()));
    }

    let Host::Domain(domain) = host else {
        return Ok(None);
    };
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|e| ToolError::failed(format!("Failed to resolve host {}: {}", domain, e)))?
        .collect();
    if addrs.iter().any(|addr| is_forbidden_ip(&addr.ip())) {
        return Err(ToolError::PermissionDenied(FORBIDDEN_MESSAGE.to_string()));
    }
    if addrs.is_empty() {
        return Err(ToolError::failed(format!("Failed to resolve host {}", domain)));
    }
    Ok(Some(PinnedHost {
        domain: domain.to_string(),
        addrs,
    }))
}

fn header_map_json(headers: &reqwest::header::HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match map.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                map.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }
    Value::Object(map)
}

fn build_request(
    client: &reqwest::Client,
    method: &Method,
    url: Url,
    params: &Params,
) -> Result<reqwest::RequestBuilder, ToolError> {
    let mut request = client.request(method.clone(), url);

    for (name, value) in &params.headers {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ToolError::Validation(format!("Invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(&text)
            .map_err(|_| ToolError::Validation(format!("Invalid value for header {}", name)))?;
        request = request.header(name, value);
    }

    let sends_body = matches!(*method, Method::POST | Method::PUT | Method::PATCH);
    match params.body.as_ref().filter(|_| sends_body) {
        None | Some(Value::Null) => {}
        Some(Value::String(body)) => request = request.body(body.clone()),
        Some(other) => {
            let has_content_type = params
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(other.to_string());
        }
    }
    Ok(request)
}

#[async_trait]
impl Tool for HttpTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: Params = parse_params(params)?;

        let url = Url::parse(&params.url)
            .map_err(|e| ToolError::Validation(format!("Invalid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::Validation(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        let pinned = check_destination(&url).await.inspect_err(|_| {
            tracing::warn!(url = %params.url, "HTTP request refused");
        })?;

        let method_name = params
            .method
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| ToolError::Validation(format!("Invalid HTTP method: {}", method_name)))?;

        let mut builder = reqwest::Client::builder()
            .timeout(ctx.timeout_or(HTTP_TIMEOUT))
            .user_agent(HTTP_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(pinned) = &pinned {
            builder = builder.resolve_to_addrs(&pinned.domain, &pinned.addrs);
        }
        let client = builder
            .build()
            .map_err(|e| ToolError::failed(format!("Failed to build HTTP client: {}", e)))?;

        let response = build_request(&client, &method, url, &params)?
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::failed("Request timeout")
                } else {
                    ToolError::failed(format!("Request failed: {}", e))
                }
            })?;

        let limit = ctx.max_output_or(HTTP_MAX_RESPONSE);
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(ToolError::OutputTooLarge(OVERSIZE_MESSAGE.to_string()));
        }

        let status = response.status();
        let headers = response.headers().clone();
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ToolError::failed(format!("Failed to read response: {}", e)))?;
            if body.len() + chunk.len() > limit {
                return Err(ToolError::OutputTooLarge(OVERSIZE_MESSAGE.to_string()));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let parsed_body = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        let output = json!({
            "statusCode": status.as_u16(),
            "statusMessage": status.canonical_reason().unwrap_or_default(),
            "headers": header_map_json(&headers),
            "body": parsed_body,
            "size": body.len(),
        });
        Ok(ToolOutput::new(output).with_metadata(json!({
            "url": params.url,
            "method": method_name,
            "statusCode": status.as_u16(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and hand back the raw request text.
    async fn one_shot_server(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    fn http_response(content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn metadata_endpoint_is_refused() {
        for url in [
            "http://169.254.169.254/latest/meta-data/",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://[::ffff:169.254.169.254]/",
        ] {
            let result = HttpTool.execute(json!({"url": url}), &ToolContext::new()).await;
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some(FORBIDDEN_MESSAGE), "{}", url);
        }
    }

    #[tokio::test]
    async fn rejects_bad_urls() {
        let result = HttpTool
            .execute(json!({"url": "not a url"}), &ToolContext::new())
            .await;
        assert!(result.error.unwrap().starts_with("Invalid URL"));

        let result = HttpTool
            .execute(json!({"url": "file:///etc/hosts"}), &ToolContext::new())
            .await;
        assert!(result.error.unwrap().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn parses_json_bodies() {
        let (base, server) = one_shot_server(http_response("application/json", r#"{"ok":true}"#)).await;
        let result = HttpTool
            .execute(
                json!({"url": format!("{}/status", base), "headers": {"X-Trace": "abc"}}),
                &ToolContext::new(),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        let output = result.output.unwrap();
        assert_eq!(output["statusCode"], 200);
        assert_eq!(output["statusMessage"], "OK");
        assert_eq!(output["body"], json!({"ok": true}));
        assert_eq!(output["size"], 11);

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /status"));
        assert!(request.contains("user-agent: stick-agent/1.0"));
        assert!(request.contains("x-trace: abc"));
    }

    #[tokio::test]
    async fn body_only_sent_for_write_methods() {
        let (base, server) = one_shot_server(http_response("text/plain", "done")).await;
        let result = HttpTool
            .execute(
                json!({"url": base, "method": "post", "body": {"name": "x"}}),
                &ToolContext::new(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["body"], "done");
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /"));
        assert!(request.ends_with(r#"{"name":"x"}"#));

        let (base, server) = one_shot_server(http_response("text/plain", "done")).await;
        HttpTool
            .execute(
                json!({"url": base, "method": "GET", "body": "ignored"}),
                &ToolContext::new(),
            )
            .await;
        assert!(!server.await.unwrap().contains("ignored"));
    }

    #[tokio::test]
    async fn domains_connect_to_the_checked_addresses() {
        let url = Url::parse("http://localhost:8080/").unwrap();
        let pinned = check_destination(&url).await.unwrap().unwrap();
        assert_eq!(pinned.domain, "localhost");
        assert!(pinned.addrs.iter().all(|a| a.ip().is_loopback() && a.port() == 8080));

        let literal = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert!(check_destination(&literal).await.unwrap().is_none());

        let (base, server) = one_shot_server(http_response("text/plain", "pinned")).await;
        let port = Url::parse(&base).unwrap().port().unwrap();
        let result = HttpTool
            .execute(
                json!({"url": format!("http://localhost:{}/", port)}),
                &ToolContext::new(),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output.unwrap()["body"], "pinned");
        assert!(server.await.unwrap().starts_with("GET /"));
    }

    #[tokio::test]
    async fn oversized_response_fails() {
        let big = "x".repeat(4096);
        let (base, _server) = one_shot_server(http_response("text/plain", &big)).await;
        let result = HttpTool
            .execute(json!({"url": base}), &ToolContext::new().with_max_output_size(1024))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(OVERSIZE_MESSAGE));
    }
}
