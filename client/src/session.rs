//! Sessions - logical channels to individual targets
//!
//! A session is created by `Target.attachToTarget` and identified by the
//! opaque session id Chrome hands back. Every command issued through it is
//! stamped with that id, and inbound traffic carrying the id routes to the
//! session's subscribers. The handle holds a weak back-reference to the
//! connection, so the ownership graph stays acyclic and a dropped
//! connection simply makes session calls fail with `ConnectionClosed`.

use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use tracing::debug;

use chromite_transport::TransportError;

use crate::connection::ConnectionInner;
use crate::error::Result;
use crate::events::{EventFilter, Subscription};

/// A logical channel to one browser target
#[derive(Clone)]
pub struct Session {
    session_id: String,
    target_id: String,
    connection: Weak<ConnectionInner>,
}

impl Session {
    pub(crate) fn new(
        session_id: &str,
        target_id: &str,
        connection: Weak<ConnectionInner>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            target_id: target_id.to_string(),
            connection,
        }
    }

    /// The opaque session id stamped on this channel's traffic
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// The target this session is attached to
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    fn connection(&self) -> Result<Arc<ConnectionInner>> {
        self.connection
            .upgrade()
            .ok_or_else(|| TransportError::ConnectionClosed.into())
    }

    /// Send a command through this session and await the reply
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.connection()?
            .call(method, params, Some(&self.session_id))
            .await
    }

    /// Subscribe to this session's events, optionally narrowed by method prefix
    pub fn subscribe(&self, method_prefix: Option<&str>) -> Result<Subscription> {
        let filter = match method_prefix {
            Some(prefix) => EventFilter::method_in_session(prefix, &self.session_id),
            None => EventFilter::session(&self.session_id),
        };
        Ok(self.connection()?.subscribe(filter))
    }

    /// Detach from the target and release the local registration
    ///
    /// The tab stays open; closing it is `Target.closeTarget`. Late replies
    /// for commands still in flight are delivered normally.
    pub async fn detach(self) -> Result<()> {
        let connection = self.connection()?;
        connection
            .call(
                "Target.detachFromTarget",
                json!({"sessionId": self.session_id}),
                None,
            )
            .await?;
        connection.unregister_session(&self.session_id);
        debug!("detached session {}", self.session_id);
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("target_id", &self.target_id)
            .finish()
    }
}
