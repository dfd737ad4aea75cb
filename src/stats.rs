//! C12 — periodic stats sampler. Reads [`Counters`] snapshots on an interval
//! and logs them; never touches the hot path, never mutates state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::counters::Counters;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

pub fn run(counters: Arc<Counters>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(SAMPLE_INTERVAL);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let snap = counters.snapshot();
        tracing::info!(
            received = snap.received,
            malformed = snap.malformed,
            session_miss = snap.session_miss,
            pdr_miss = snap.pdr_miss,
            qos_pps_dropped = snap.qos_pps_dropped,
            qos_mbr_dropped = snap.qos_mbr_dropped,
            urr_quota_exceeded = snap.urr_quota_exceeded,
            nat_exhausted = snap.nat_exhausted,
            queue_full_drop = snap.queue_full_drop,
            n3_tx = snap.n3_tx,
            n6_tx = snap.n6_tx,
            n9_tx = snap.n9_tx,
            "data-plane counters"
        );
    }
}
