//! PeçaJá vehicle plate lookup: a plate API client wrapped in a TTL cache,
//! a per-client rate limiter and a circuit breaker, served over stdio JSON-RPC.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod envelope;
pub mod http;
pub mod lookup;
pub mod mapping;
pub mod methods;
pub mod plate;
pub mod rate_limit;
pub mod server;
pub mod types;

pub use config::Config;
pub use lookup::{LookupError, VehicleLookup};
pub use types::{Category, DataOrigin, LookupResult};
