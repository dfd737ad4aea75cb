//! User-space 5G User Plane Function data plane: PFCP session state,
//! GTP-U forwarding, QoS enforcement, usage accounting, and NAT.

pub mod config;
pub mod control;
pub mod counters;
pub mod downlink;
pub mod error;
pub mod gtpu;
pub mod nat;
pub mod net;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod reaper;
pub mod rules;
pub mod session;
pub mod stats;
pub mod tun;
pub mod uplink;
