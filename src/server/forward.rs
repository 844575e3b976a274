//! Reverse-proxy forwarding (§6 "An optional `<forwarding_rule>` dispatches
//! matching requests to upstream HTTP"). Grounded on `reqwest`'s use
//! elsewhere in this crate as the HTTP client of record
//! (`crate::source::wms`, `crate::cache::object_store`) rather than the
//! monorepo's `hyper_util`-based gateway proxy, since this crate's outbound
//! HTTP surface is already entirely `reqwest`.

use crate::error::{Error, Result};
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::time::Duration;

/// One `<forwarding_rule>`: requests whose path matches `path_prefix` are
/// proxied to `upstream_base` with the prefix stripped, `X-Forwarded-*`
/// headers attached.
#[derive(Debug, Clone)]
pub struct ForwardingRule {
    pub path_prefix: String,
    pub upstream_base: String,
}

impl ForwardingRule {
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }

    fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let stripped = path.strip_prefix(&self.path_prefix).unwrap_or(path);
        let mut url = format!("{}{}", self.upstream_base.trim_end_matches('/'), stripped);
        if let Some(q) = query {
            if !q.is_empty() {
                url.push('?');
                url.push_str(q);
            }
        }
        url
    }
}

/// Forward one request to `rule`'s upstream, honoring `max_post_length`
/// (§6, §7 `EntityTooLarge (413)`) and attaching `X-Forwarded-For`/
/// `X-Forwarded-Host`/`X-Forwarded-Proto` per the reverse-proxy
/// convention.
pub async fn forward(
    client: &reqwest::Client,
    rule: &ForwardingRule,
    method: Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
    max_post_length: usize,
    client_addr: &str,
) -> Result<(u16, HeaderMap, Bytes)> {
    if body.len() > max_post_length {
        return Err(Error::EntityTooLarge { size: body.len(), max: max_post_length });
    }

    let url = rule.upstream_url(path, query);
    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| Error::internal(e.to_string()))?;
    let mut builder = client
        .request(reqwest_method, &url)
        .timeout(Duration::from_secs(30))
        .body(body.to_vec());

    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder = builder
        .header("X-Forwarded-For", client_addr)
        .header("X-Forwarded-Proto", "http");
    if let Some(host) = headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()) {
        builder = builder.header("X-Forwarded-Host", host);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let mut out_headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out_headers.insert(name, value);
        }
    }
    let bytes = response.bytes().await?;
    Ok((status, out_headers, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_matches_prefix_and_strips_it() {
        let rule = ForwardingRule {
            path_prefix: "/proxy".to_string(),
            upstream_base: "http://backend.internal".to_string(),
        };
        assert!(rule.matches("/proxy/wms"));
        assert!(!rule.matches("/wms"));
        assert_eq!(
            rule.upstream_url("/proxy/wms", Some("SERVICE=WMS")),
            "http://backend.internal/wms?SERVICE=WMS"
        );
    }
}
