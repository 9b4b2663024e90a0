//! Routing + failover engine (spec §4.1, §4.2, §4.6): the rate limiter,
//! cooldown manager, and candidate resolver used by the proxy orchestrator.

pub mod cooldown;
pub mod events;
pub mod rate_limiter;
pub mod resolver;

pub use cooldown::CooldownManager;
pub use events::{FailoverEvent, FailoverLog, FailoverReason};
pub use rate_limiter::RateLimiter;
pub use resolver::{Candidate, ResolveError, ResolvedRoute, RoutingResolver};
