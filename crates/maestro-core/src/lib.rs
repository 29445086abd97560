//! `maestro-core` — configuration, errors, request context and shared helpers.
//!
//! Every other Maestro crate depends on this one. It carries:
//! - [`config::MaestroConfig`] — figment-layered configuration (TOML file +
//!   canonical environment keys),
//! - [`error::MaestroError`] — the top-level error enum with wire codes,
//! - [`ctx::Ctx`] — the explicit per-request correlation context,
//! - [`logging`] / [`metrics_defs`] — observability bootstrap,
//! - [`timeutil`] — timezone and cron-expression translation helpers.

pub mod config;
pub mod ctx;
pub mod error;
pub mod logging;
pub mod metrics_defs;
pub mod timeutil;

pub use config::MaestroConfig;
pub use ctx::Ctx;
pub use error::{MaestroError, Result};
