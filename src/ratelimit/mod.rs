//! Outbound rate limiting
//!
//! A fixed-length window per guarded resource that resets entirely once its
//! start is more than the window length in the past. Counters are persisted
//! so quota usage survives process restarts.
//!
//! Within a process the check-and-increment is serialised per resource.
//! Separate processes sharing the same state directory are not coordinated.

pub mod guard;
pub mod policy;
pub mod state;
pub mod store;

pub use guard::{RateLimitError, RateLimitGuard, DEFAULT_WINDOW_SECS};
pub use policy::{Identity, RateLimitConfig};
pub use state::{RateLimitState, WindowState};
pub use store::{FileRateLimitStore, InMemoryRateLimitStore, RateLimitStore};
