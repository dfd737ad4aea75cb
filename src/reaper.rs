//! C11 — NAT reaper. A single background thread that periodically evicts
//! idle NAT entries so a leaked flow doesn't pin a port forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::nat::NatTable;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub fn run(nat: Arc<NatTable>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(SWEEP_INTERVAL);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let expired = nat.cleanup();
        if expired > 0 {
            tracing::debug!(expired, "NAT reaper swept idle entries");
        }
    }
}
