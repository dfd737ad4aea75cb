//! C1 — rule types installed into a session by control-plane handling and
//! consumed by the packet pipeline. Plain data plus the small amount of
//! stateful behavior (token-bucket refill, usage accounting) that only makes
//! sense living next to the fields it mutates.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

pub const MAX_RULES_PER_KIND: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Access,
    Core,
    Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficDirection {
    Uplink,
    Downlink,
}

/// Access ⇒ uplink, everything else ⇒ downlink (§4.4 step 6, §4.4 step 7).
pub fn direction_of(source_interface: Interface) -> TrafficDirection {
    match source_interface {
        Interface::Access => TrafficDirection::Uplink,
        Interface::Core | Interface::Peer => TrafficDirection::Downlink,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(v: u8) -> Self {
        match v {
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            1 => IpProtocol::Icmp,
            other => IpProtocol::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiveTupleFilter {
    pub protocol: IpProtocol,
    pub dest_port_low: u16,
    pub dest_port_high: u16,
}

impl FiveTupleFilter {
    pub fn matches(&self, protocol: IpProtocol, dest_port: u16) -> bool {
        protocol == self.protocol
            && dest_port >= self.dest_port_low
            && dest_port <= self.dest_port_high
    }
}

#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub id: u16,
    pub precedence: u32,
    pub source_interface: Interface,
    pub tunnel_id: Option<u32>,
    pub ue_ip: Option<Ipv4Addr>,
    pub application_id: Option<String>,
    pub filter: Option<FiveTupleFilter>,
    pub forwarding_rule_id: u16,
    pub qos_rule_id: Option<u16>,
    pub usage_rule_id: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingAction {
    Drop,
    Forward,
    Buffer,
}

#[derive(Debug, Clone, Copy)]
pub struct OuterHeader {
    pub teid: u32,
    pub dest_ip: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct ForwardingRule {
    pub id: u16,
    pub action: ForwardingAction,
    pub destination_interface: Interface,
    pub outer_header: Option<OuterHeader>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosOutcome {
    Passed,
    DroppedPps,
    DroppedMbr,
}

/// Token-bucket state for one rate constraint. `limit_per_sec` of zero
/// disables the constraint (`enforce` treats it as absent).
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    pub limit_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(limit_per_sec: f64, now: Instant) -> Self {
        TokenBucket {
            limit_per_sec,
            tokens: limit_per_sec,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + self.limit_per_sec * elapsed).min(self.limit_per_sec);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant, cost: f64) -> bool {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct QosRule {
    pub id: u16,
    pub flow_id: u8,
    pub pps_uplink: Option<TokenBucket>,
    pub pps_downlink: Option<TokenBucket>,
    pub mbr_uplink: Option<TokenBucket>,
    pub mbr_downlink: Option<TokenBucket>,
}

impl QosRule {
    pub fn new(id: u16, flow_id: u8) -> Self {
        QosRule {
            id,
            flow_id,
            pps_uplink: None,
            pps_downlink: None,
            mbr_uplink: None,
            mbr_downlink: None,
        }
    }

    /// §4.4 step 6: refill both constraints for the selected direction, reject
    /// on PPS first (cost 1 token), then on MBR (cost `payload_bits`).
    pub fn enforce(&mut self, now: Instant, direction: TrafficDirection, payload_bits: f64) -> QosOutcome {
        let pps = match direction {
            TrafficDirection::Uplink => &mut self.pps_uplink,
            TrafficDirection::Downlink => &mut self.pps_downlink,
        };
        if let Some(bucket) = pps {
            if !bucket.try_consume(now, 1.0) {
                return QosOutcome::DroppedPps;
            }
        }
        let mbr = match direction {
            TrafficDirection::Uplink => &mut self.mbr_uplink,
            TrafficDirection::Downlink => &mut self.mbr_downlink,
        };
        if let Some(bucket) = mbr {
            if !bucket.try_consume(now, payload_bits) {
                return QosOutcome::DroppedMbr;
            }
        }
        QosOutcome::Passed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    Tracked { report_triggered: bool },
    QuotaExceeded,
}

#[derive(Debug, Clone)]
pub struct UsageRule {
    pub id: u16,
    pub measure_volume: bool,
    pub measure_duration: bool,
    pub volume_threshold: Option<u64>,
    pub volume_quota: Option<u64>,
    pub time_threshold: Option<Duration>,
    pub time_quota: Option<Duration>,
    pub periodic_report_interval: Option<Duration>,
    pub uplink_bytes: u64,
    pub downlink_bytes: u64,
    pub total_bytes: u64,
    pub start_time: Instant,
    pub last_report_time: Instant,
    pub report_pending: bool,
    pub quota_exceeded: bool,
}

impl UsageRule {
    pub fn new(id: u16, now: Instant) -> Self {
        UsageRule {
            id,
            measure_volume: true,
            measure_duration: false,
            volume_threshold: None,
            volume_quota: None,
            time_threshold: None,
            time_quota: None,
            periodic_report_interval: None,
            uplink_bytes: 0,
            downlink_bytes: 0,
            total_bytes: 0,
            start_time: now,
            last_report_time: now,
            report_pending: false,
            quota_exceeded: false,
        }
    }

    /// Resolved in DESIGN.md: periodic reporting does not implicitly reset
    /// counters. This is the only operation that clears them.
    pub fn reset_counters(&mut self, now: Instant) {
        self.uplink_bytes = 0;
        self.downlink_bytes = 0;
        self.total_bytes = 0;
        self.start_time = now;
        self.last_report_time = now;
        self.report_pending = false;
        self.quota_exceeded = false;
    }

    /// §4.4 step 7. Accounts `bytes` against the running counters and
    /// returns whether the packet should still be forwarded.
    pub fn account(&mut self, now: Instant, direction: TrafficDirection, bytes: u64) -> UsageOutcome {
        if self.quota_exceeded {
            return UsageOutcome::QuotaExceeded;
        }

        match direction {
            TrafficDirection::Uplink => self.uplink_bytes += bytes,
            TrafficDirection::Downlink => self.downlink_bytes += bytes,
        }
        self.total_bytes += bytes;

        if let Some(quota) = self.volume_quota {
            if self.total_bytes >= quota {
                self.quota_exceeded = true;
                return UsageOutcome::QuotaExceeded;
            }
        }
        if let Some(quota) = self.time_quota {
            if now.saturating_duration_since(self.start_time) >= quota {
                self.quota_exceeded = true;
                return UsageOutcome::QuotaExceeded;
            }
        }

        let mut crossed = false;
        if let Some(threshold) = self.volume_threshold {
            if self.total_bytes >= threshold && !self.report_pending {
                crossed = true;
            }
        }
        if let Some(threshold) = self.time_threshold {
            if now.saturating_duration_since(self.start_time) >= threshold && !self.report_pending {
                crossed = true;
            }
        }
        if let Some(period) = self.periodic_report_interval {
            if now.saturating_duration_since(self.last_report_time) >= period {
                crossed = true;
                self.last_report_time = now;
            }
        }
        if crossed {
            self.report_pending = true;
        }
        UsageOutcome::Tracked {
            report_triggered: crossed,
        }
    }
}
