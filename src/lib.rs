// Time source and timestamp type
pub mod clock;

// Error taxonomy
pub mod error;

// Access-token lifecycle
pub mod token;

// Window planning and granularity codec
pub mod window;

// Crash-safe file writes
pub mod atomic;

// Persisted polling progress
pub mod watermark;

// Per-endpoint polling parameters
pub mod endpoint;

// API client and result sink interfaces
pub mod collaborator;

// Poll-cycle state machine
pub mod poller;

// TOML configuration
pub mod config;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use collaborator::{ApiClient, LocationHint, ResultSink};
pub use config::{check_endpoints, load_config, PollerConfig};
pub use endpoint::EndpointSpec;
pub use error::{Phase, PollError};
pub use poller::{PollOutcome, PollResult, PollState, Poller};
pub use token::{AccessToken, ClientCredentials, IdentityProvider, IssuedToken, TokenManager};
pub use watermark::{FileWatermarkStore, Watermark, WatermarkStore};
pub use window::{plan, Granularity, TimeWindow};
