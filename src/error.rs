//! Error types surfaced at process boundaries.
//!
//! Per-packet and per-control-message failures never reach here: they are
//! counted (see [`crate::counters`]) and logged, not propagated. `UpfError`
//! covers the handful of failures that can only happen once, at startup, and
//! that the orchestrator turns into a non-zero process exit.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpfError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open TUN device: {0}")]
    TunOpen(#[source] std::io::Error),

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("session table is full (capacity {capacity})")]
    SessionTableFull { capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },
}
