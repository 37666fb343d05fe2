//! # chatcore
//!
//! In-process chat message broker with fan-in from many producers and
//! fan-out to per-user inboxes.
//!
//! - **Message** - Immutable chat event
//! - **Registry** - Concurrent user id to inbox map
//! - **Router** - Single routing task with best-effort delivery
//! - **Broker** - Input queue, registry, router loop and shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐      ┌───────┐     ┌──────────┐     ┌─────────┐
//! │ Producer │─────▶│ Queue │────▶│  Router  │────▶│  Inbox  │
//! └──────────┘      └───────┘     └──────────┘     └─────────┘
//!                                      │
//!                                      ▼
//!                                ┌──────────┐
//!                                │ Registry │
//!                                └──────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use chatcore::{inbox, Broker, CancellationToken, Message};
//!
//! # async fn demo() -> Result<(), chatcore::BrokerError> {
//! let ctx = CancellationToken::new();
//! let broker = Broker::new(&ctx);
//! broker.spawn()?;
//!
//! let (tx, mut rx) = inbox(16);
//! broker.register_user("alice", tx);
//! broker.send(Message::broadcast("bob", "hi")).await?;
//! let _hi = rx.recv().await;
//!
//! ctx.cancel();
//! broker.closed().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod router;

pub use broker::{Broker, BrokerState};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use message::{Message, UserId};
pub use registry::{inbox, Inbox, InboxReceiver, Registry};
pub use router::{RouteOutcome, Router};
pub use tokio_util::sync::CancellationToken;
