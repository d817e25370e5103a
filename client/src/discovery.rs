//! HTTP endpoint discovery
//!
//! A browser with remote debugging enabled serves a small JSON API next to
//! its WebSocket endpoint. `/json/version` carries the browser-level
//! WebSocket URL, which lets callers attach with a plain
//! `http://host:port` address; `/json/list` enumerates debuggable targets
//! with their page-level URLs.

use serde::Deserialize;
use tracing::debug;

use chromite_protocol::ProtocolError;
use chromite_transport::TransportError;

use crate::error::Result;

/// Reply of `GET /json/version`
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointVersion {
    /// Browser name and version, e.g. `Chrome/120.0.6099.71`
    #[serde(rename = "Browser")]
    pub browser: String,

    /// DevTools protocol version, e.g. `1.3`
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,

    #[serde(rename = "User-Agent")]
    pub user_agent: String,

    /// The browser-level WebSocket URL
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// One entry of `GET /json/list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTarget {
    pub id: String,

    #[serde(rename = "type")]
    pub target_type: String,

    pub title: String,

    pub url: String,

    /// Absent while another client is attached
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

fn base_url(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Resolve an `http://host:port` endpoint to its version record
pub async fn fetch_version(endpoint: &str) -> Result<EndpointVersion> {
    let url = format!("{}/json/version", base_url(endpoint));
    debug!("fetching {}", url);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| TransportError::ConnectionRefused(format!("{}: {}", url, e)))?;
    let version: EndpointVersion = response
        .json()
        .await
        .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

    Ok(version)
}

/// Enumerate the endpoint's debuggable targets
pub async fn fetch_targets(endpoint: &str) -> Result<Vec<EndpointTarget>> {
    let url = format!("{}/json/list", base_url(endpoint));
    debug!("fetching {}", url);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| TransportError::ConnectionRefused(format!("{}: {}", url, e)))?;
    let targets: Vec<EndpointTarget> = response
        .json()
        .await
        .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_reply() {
        let json = r#"{
            "Browser": "Chrome/120.0.6099.71",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "V8-Version": "12.0.267.8",
            "WebKit-Version": "537.36",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc-123"
        }"#;

        let version: EndpointVersion = serde_json::from_str(json).unwrap();
        assert_eq!(version.browser, "Chrome/120.0.6099.71");
        assert_eq!(version.protocol_version, "1.3");
        assert!(version.web_socket_debugger_url.starts_with("ws://"));
    }

    #[test]
    fn test_parse_target_list() {
        let json = r#"[{
            "description": "",
            "devtoolsFrontendUrl": "/devtools/inspector.html",
            "id": "ABCDEF",
            "title": "New Tab",
            "type": "page",
            "url": "chrome://newtab/",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/ABCDEF"
        }]"#;

        let targets: Vec<EndpointTarget> = serde_json::from_str(json).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "ABCDEF");
        assert_eq!(targets[0].target_type, "page");
        assert!(targets[0].web_socket_debugger_url.is_some());
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        assert_eq!(base_url("http://127.0.0.1:9222/"), "http://127.0.0.1:9222");
        assert_eq!(base_url("http://127.0.0.1:9222"), "http://127.0.0.1:9222");
    }
}
