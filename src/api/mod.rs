//! HTTP surface for the proxy (spec §6.1, SPEC_FULL §6.1a).
//!
//! - `GET /health`, `GET /v1/models`, `ALL /v1/*` — the proxied surface.
//! - `/admin/routing/*` — ambient health/cooldown/events introspection.

mod admin;
mod auth;
mod error;
mod proxy;
mod routes;

pub use routes::serve;
