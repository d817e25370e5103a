//! Browser façade
//!
//! Ties the process supervisor and the connection together behind a small
//! surface: launch or attach, open and close pages, query the version,
//! tear everything down. A launched browser is owned (close kills it); an
//! attached one is borrowed (disconnect leaves it running).

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use chromite_protocol::ProtocolError;

use crate::connection::{ConnectOptions, Connection};
use crate::discovery;
use crate::error::Result;
use crate::launcher::{BrowserProcess, LaunchOptions};
use crate::session::Session;

/// Reply of `Browser.getVersion`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserVersion {
    pub protocol_version: String,
    pub product: String,
    pub revision: String,
    pub user_agent: String,
    pub js_version: String,
}

/// One entry of `Target.getTargets`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,

    #[serde(rename = "type")]
    pub target_type: String,

    pub title: String,

    pub url: String,

    pub attached: bool,

    #[serde(default)]
    pub browser_context_id: Option<String>,
}

/// The public handle over one browser
pub struct Browser {
    connection: Connection,
    process: Option<BrowserProcess>,
    ws_url: Option<String>,
}

impl Browser {
    /// Launch a browser process and connect to it
    pub async fn launch(options: LaunchOptions) -> Result<Self> {
        if options.pipe {
            return Self::launch_piped(options).await;
        }

        let (mut process, ws_url) = BrowserProcess::spawn(&options).await?;

        let connection = match Connection::connect(&ws_url, options.connect.clone()).await {
            Ok(connection) => connection,
            Err(e) => {
                process.shutdown().await;
                return Err(e);
            }
        };

        info!("browser ready at {}", ws_url);
        Ok(Self {
            connection,
            process: Some(process),
            ws_url: Some(ws_url),
        })
    }

    #[cfg(unix)]
    async fn launch_piped(options: LaunchOptions) -> Result<Self> {
        use chromite_transport::Endpoint;

        let (mut process, endpoint) = BrowserProcess::spawn_piped(&options).await?;

        let connection =
            match Connection::open(&Endpoint::Pipe(endpoint), options.connect.clone()).await {
                Ok(connection) => connection,
                Err(e) => {
                    process.shutdown().await;
                    return Err(e);
                }
            };

        info!("browser ready over pipe");
        Ok(Self {
            connection,
            process: Some(process),
            ws_url: None,
        })
    }

    #[cfg(not(unix))]
    async fn launch_piped(_options: LaunchOptions) -> Result<Self> {
        Err(crate::launcher::LaunchError::LaunchFailed(
            "pipe mode is only supported on unix".to_string(),
        )
        .into())
    }

    /// Attach to an endpoint somebody else launched
    ///
    /// Accepts a `ws://`/`wss://` DevTools URL directly, or an
    /// `http://host:port` debugging address which is resolved through
    /// `/json/version` first.
    pub async fn attach(endpoint: &str, options: ConnectOptions) -> Result<Self> {
        let ws_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            let version = discovery::fetch_version(endpoint).await?;
            debug!(
                "resolved {} to {} ({})",
                endpoint, version.web_socket_debugger_url, version.browser
            );
            version.web_socket_debugger_url
        } else {
            endpoint.to_string()
        };

        let connection = Connection::connect(&ws_url, options).await?;
        Ok(Self {
            connection,
            process: None,
            ws_url: Some(ws_url),
        })
    }

    /// The browser-level WebSocket URL; absent in pipe mode
    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref()
    }

    /// The underlying connection, for raw `call`/`subscribe` access
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Query `Browser.getVersion`
    pub async fn version(&self) -> Result<BrowserVersion> {
        let result = self
            .connection
            .call("Browser.getVersion", json!({}), None)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()).into())
    }

    /// Open a new page and attach a session to it
    pub async fn new_page(&self, url: Option<&str>) -> Result<Session> {
        let result = self
            .connection
            .call(
                "Target.createTarget",
                json!({"url": url.unwrap_or("about:blank")}),
                None,
            )
            .await?;

        let target_id = result
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("targetId"))?;
        debug!("created page target {}", target_id);

        self.connection.attach_to_target(target_id).await
    }

    /// Attach a session to an existing target
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        self.connection.attach_to_target(target_id).await
    }

    /// All page-type targets currently alive
    pub async fn pages(&self) -> Result<Vec<TargetInfo>> {
        let result = self
            .connection
            .call("Target.getTargets", json!({}), None)
            .await?;

        let infos = result
            .get("targetInfos")
            .cloned()
            .ok_or(ProtocolError::MissingField("targetInfos"))?;
        let infos: Vec<TargetInfo> = serde_json::from_value(infos).map_err(|_| {
            ProtocolError::TypeMismatch {
                field: "targetInfos",
                expected: "array of target info objects",
            }
        })?;

        Ok(infos
            .into_iter()
            .filter(|t| t.target_type == "page")
            .collect())
    }

    /// Close a tab; detaches any session attached to it
    pub async fn close_page(&self, target_id: &str) -> Result<()> {
        self.connection
            .call("Target.closeTarget", json!({"targetId": target_id}), None)
            .await?;
        Ok(())
    }

    /// Full teardown
    ///
    /// Asks the browser to close itself, closes the connection, then kills
    /// and reaps the child if we own one. The temp profile directory goes
    /// with it.
    pub async fn close(mut self) -> Result<()> {
        if !self.connection.is_closed() {
            // Best effort; the reply may never come if the browser obliges
            let _ = self
                .connection
                .call("Browser.close", json!({}), None)
                .await;
        }
        self.connection.close().await;

        if let Some(mut process) = self.process.take() {
            process.shutdown().await;
        }

        Ok(())
    }

    /// Release the connection without touching the browser process
    pub async fn disconnect(mut self) {
        self.connection.close().await;
        if let Some(mut process) = self.process.take() {
            process.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_browser_version_reply() {
        let json = r#"{
            "protocolVersion": "1.3",
            "product": "Chrome/120.0",
            "revision": "@abc",
            "userAgent": "UA",
            "jsVersion": "12.0"
        }"#;

        let version: BrowserVersion = serde_json::from_str(json).unwrap();
        assert_eq!(version.product, "Chrome/120.0");
        assert_eq!(version.protocol_version, "1.3");
        assert_eq!(version.revision, "@abc");
        assert_eq!(version.user_agent, "UA");
        assert_eq!(version.js_version, "12.0");
    }

    #[test]
    fn test_parse_target_info() {
        let json = r#"{
            "targetId": "T1",
            "type": "page",
            "title": "Example",
            "url": "https://example.com",
            "attached": false,
            "browserContextId": "C1"
        }"#;

        let info: TargetInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.target_id, "T1");
        assert_eq!(info.target_type, "page");
        assert!(!info.attached);
        assert_eq!(info.browser_context_id.as_deref(), Some("C1"));
    }
}
