//! Chromite Client - drive Chromium-family browsers over the DevTools protocol
//!
//! The crate manages a headless or headed browser process and exposes the
//! protocol engine underneath: typed commands with correlated replies and
//! asynchronous event subscriptions, multiplexed across browser targets on
//! a single WebSocket or pipe transport.
//!
//! Two primitives carry everything:
//! - [`Connection::call`] sends a command and awaits its result
//! - [`Connection::subscribe`] observes server-pushed events
//!
//! [`Browser`] ties a supervised browser process to a connection:
//!
//! ```no_run
//! use chromite_client::{Browser, LaunchOptions};
//!
//! # async fn run() -> chromite_client::Result<()> {
//! let browser = Browser::launch(LaunchOptions::default()).await?;
//! let page = browser.new_page(Some("https://example.com")).await?;
//! let title = page
//!     .call("Runtime.evaluate", serde_json::json!({"expression": "document.title"}))
//!     .await?;
//! println!("{}", title["result"]["value"]);
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

mod browser;
mod chrome;
mod connection;
mod discovery;
mod error;
mod events;
mod launcher;
mod session;

pub use browser::*;
pub use chrome::*;
pub use connection::*;
pub use discovery::*;
pub use error::*;
pub use events::*;
pub use launcher::*;
pub use session::*;

pub use chromite_protocol as protocol;
pub use chromite_transport as transport;
