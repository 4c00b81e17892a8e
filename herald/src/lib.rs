//! # herald
//!
//! Real-time event broadcaster. Producers publish short text events over
//! HTTP; any number of long-lived Server-Sent Events listeners receive them
//! as they arrive, either broadcast to everyone or addressed to one
//! consumer by ID.
//!
//! ## Features
//!
//! - **Broker**: lock-guarded subscriber registry with broadcast and
//!   addressed delivery
//! - **Streaming**: one SSE stream per consumer, announcing its ID on
//!   connect
//! - **Publish endpoint**: form-based `POST /push`
//! - **Configuration**: layered TOML files and `HERALD_` environment variables
//! - **Graceful shutdown**: streams end, listeners drain, broker closes
//!
//! ## Example
//!
//! ```rust,no_run
//! use herald::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     init_tracing(&config)?;
//!
//!     Server::new(config)?.serve().await
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod health;
pub mod ids;
pub mod observability;
pub mod publish;
pub mod server;
pub mod sse;
pub mod state;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::broker::{Broker, Event, Subscription, SubscriptionKey, BROADCAST};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::ids::{IdAllocator, SnowflakeAllocator};
    pub use crate::observability::init_tracing;
    pub use crate::server::Server;
    pub use crate::sse::StreamedEvent;
    pub use crate::state::AppState;
}
