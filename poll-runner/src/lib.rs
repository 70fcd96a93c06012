//! Poll runner - production wiring for the gridpoll core.
//!
//! Supplies the collaborators the core only defines as traits, and runs one
//! scheduler per endpoint.
//!
//! # Architecture
//!
//! ```text
//!      Identity provider (ROPC)            Public reports API
//!               ↑                                  ↑
//!     RopcIdentityProvider                   HttpApiClient
//!               ↑                                  ↑
//! ┌─────────────────────────────────────────────────────────┐
//! │        gridpoll core (TokenManager, Poller)              │
//! │  - plan window from watermark                            │
//! │  - fetch, persist, then commit                           │
//! └─────────────────────────────────────────────────────────┘
//!               ↓                                  ↓
//!         JsonFileSink                     FileWatermarkStore
//!     output/incremental/...                  state/*.json
//!               ↑
//! ┌─────────────────────────────────────────────────────────┐
//! │        PollManager                                        │
//! │  - one shared TokenManager                               │
//! │  - one EndpointScheduler per endpoint                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod identity;
pub mod manager;
pub mod registry;
pub mod runners;
pub mod sink;

// Re-export public types
pub use client::HttpApiClient;
pub use identity::RopcIdentityProvider;
pub use manager::{PollManager, Secrets};
pub use runners::scheduler::{EndpointScheduler, EndpointStatus};
pub use sink::JsonFileSink;
