//! filehttpd - a prefork, thread-pooled HTTP/1.1 server for a single static
//! document root.
//!
//! A master process loads configuration, creates one listening socket, and
//! forks N worker processes that share it. Each worker runs a fixed pool of
//! handler threads draining a bounded connection queue, and keeps a private
//! LRU cache of small file bodies. Process-wide counters live in a shared
//! memory page guarded by a cross-process mutex.
//!
//! # Non-goals
//!
//! Dynamic content, HTTPS/TLS, HTTP/2, persistent connections, pipelining,
//! range requests, conditional GET, authentication, virtual hosting,
//! directory listings, chunked transfer encoding.
pub mod cache;
pub mod config;
pub mod errors;
pub mod logging;
pub mod master;
pub mod mime;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod worker;

pub(crate) mod http {
    pub(crate) mod pipeline;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}

pub use crate::{
    cache::Cache,
    config::{Config, ConfigError},
    errors::ServerError,
    master::Master,
    queue::ConnectionQueue,
    stats::SharedStats,
};
