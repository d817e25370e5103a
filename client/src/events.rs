//! Event fan-out
//!
//! Inbound events are broadcast to every live subscription; each
//! subscription filters locally. The fan-out queue is bounded and lossy:
//! a subscriber that falls behind loses the oldest events first and can
//! read how many it missed.

use chromite_protocol::Event;
use tokio::sync::broadcast;
use tracing::warn;

/// What a subscription wants to see
///
/// `method_prefix` matches `Domain.` or any longer prefix of the event
/// method. A session-scoped filter matches only events stamped with that
/// session id; browser-level events (no session id) never reach it.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    method_prefix: Option<String>,
    session_id: Option<String>,
}

impl EventFilter {
    /// Every event on the connection
    pub fn any() -> Self {
        Self::default()
    }

    /// Events whose method starts with `prefix`, any scope
    pub fn method(prefix: &str) -> Self {
        Self {
            method_prefix: Some(prefix.to_string()),
            session_id: None,
        }
    }

    /// All events belonging to one session
    pub fn session(session_id: &str) -> Self {
        Self {
            method_prefix: None,
            session_id: Some(session_id.to_string()),
        }
    }

    /// Method prefix within one session
    pub fn method_in_session(prefix: &str, session_id: &str) -> Self {
        Self {
            method_prefix: Some(prefix.to_string()),
            session_id: Some(session_id.to_string()),
        }
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        if let Some(prefix) = &self.method_prefix {
            if !event.method.starts_with(prefix.as_str()) {
                return false;
            }
        }

        match &self.session_id {
            Some(session_id) => event.session_id.as_deref() == Some(session_id.as_str()),
            None => true,
        }
    }
}

/// A live event stream
///
/// Events arrive in the order the transport received them. Delivery is
/// lossy under backpressure; see [`Subscription::lost`].
pub struct Subscription {
    rx: Option<broadcast::Receiver<Event>>,
    filter: EventFilter,
    lost: u64,
}

impl Subscription {
    pub(crate) fn new(rx: Option<broadcast::Receiver<Event>>, filter: EventFilter) -> Self {
        Self {
            rx,
            filter,
            lost: 0,
        }
    }

    /// Next matching event; `None` once the connection is gone
    pub async fn next(&mut self) -> Option<Event> {
        let rx = self.rx.as_mut()?;

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event subscriber lagged, {} events dropped", n);
                    self.lost += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_next(&mut self) -> Option<Event> {
        let rx = self.rx.as_mut()?;

        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.lost += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Events dropped because this subscriber fell behind
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, session_id: Option<&str>) -> Event {
        Event {
            method: method.to_string(),
            params: json!({}),
            session_id: session_id.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_any_matches_everything() {
        let filter = EventFilter::any();
        assert!(filter.matches(&event("Page.loadEventFired", None)));
        assert!(filter.matches(&event("Network.requestWillBeSent", Some("S1"))));
    }

    #[test]
    fn test_method_prefix() {
        let filter = EventFilter::method("Page.");
        assert!(filter.matches(&event("Page.loadEventFired", Some("S1"))));
        assert!(!filter.matches(&event("Network.requestWillBeSent", Some("S1"))));
    }

    #[test]
    fn test_session_scope_excludes_browser_events() {
        let filter = EventFilter::session("S1");
        assert!(filter.matches(&event("Page.loadEventFired", Some("S1"))));
        assert!(!filter.matches(&event("Page.loadEventFired", Some("S2"))));
        // Browser-scoped events never reach session subscribers
        assert!(!filter.matches(&event("Target.targetCreated", None)));
    }

    #[test]
    fn test_method_in_session() {
        let filter = EventFilter::method_in_session("Page.", "S1");
        assert!(filter.matches(&event("Page.loadEventFired", Some("S1"))));
        assert!(!filter.matches(&event("Page.loadEventFired", None)));
        assert!(!filter.matches(&event("Network.loadingFinished", Some("S1"))));
    }

    #[tokio::test]
    async fn test_dead_subscription_yields_none() {
        let mut sub = Subscription::new(None, EventFilter::any());
        assert!(sub.next().await.is_none());
    }
}
