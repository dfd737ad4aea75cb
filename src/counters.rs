//! C9 — observability counters. Plain atomics, sequentially consistent,
//! sampled read-only by the stats component (C12); nothing in the hot path
//! ever reads them back.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($name:ident),+ $(,)?) => {
        #[derive(Default)]
        pub struct Counters {
            $(pub $name: AtomicU64,)+
        }

        #[derive(Debug, Clone, Copy, Default, serde::Serialize)]
        pub struct CountersSnapshot {
            $(pub $name: u64,)+
        }

        impl Counters {
            pub fn snapshot(&self) -> CountersSnapshot {
                CountersSnapshot {
                    $($name: self.$name.load(Ordering::SeqCst),)+
                }
            }
        }
    };
}

counters! {
    received,
    malformed,
    non_gpdu,
    session_miss,
    pdr_miss,
    far_miss,
    qer_miss,
    urr_miss,
    qos_passed,
    qos_mbr_dropped,
    qos_pps_dropped,
    urr_tracked,
    urr_reports_triggered,
    urr_quota_exceeded,
    gtpu_dropped,
    n3_tx,
    n3_send_fail,
    n6_tx,
    n6_stub,
    n9_tx,
    nat_exhausted,
    queue_full_drop,
    nat_miss,
    echo_req,
    echo_resp,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let c = Counters::default();
        Counters::bump(&c.session_miss);
        Counters::bump(&c.session_miss);
        Counters::bump(&c.pdr_miss);
        let snap = c.snapshot();
        assert_eq!(snap.session_miss, 2);
        assert_eq!(snap.pdr_miss, 1);
        assert_eq!(snap.qos_passed, 0);
    }
}
