//! Preconfigured blocking HTTP clients that share connection pools.
//!
//! Every client the factory hands out has redirect following disabled and the
//! same timeout on connect, read and write. Clients built from identical
//! settings are clones of one another and so reuse one connection pool.

pub mod config;
pub mod http;
pub mod proxy;
pub mod report;

pub use http::{
    check_timeout, client, client_with_timeout, default_factory, secure_client, ClientError,
    ClientFactory, ClientPool, ClientSettings, PoolSettings, Timeouts, DEFAULT_TIMEOUT,
};
pub use proxy::{ProxyError, ProxySettings};
pub use report::{log_error_response, ErrorReport};
