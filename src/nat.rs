//! C3 — stateful NAT table. Open-addressed as a fixed-length array scanned
//! linearly (no hash map): the table tops out at a few thousand entries and
//! every operation already pays for a linear rule scan elsewhere, so a hash
//! map would buy nothing but complexity.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatProtocol {
    Tcp,
    Udp,
    Icmp,
}

#[derive(Debug, Clone, Copy)]
struct NatSlot {
    allocated: bool,
    ue_ip: Ipv4Addr,
    ue_port: u16,
    protocol: NatProtocol,
    external_port: u16,
    owning_session: u64,
    last_activity: Instant,
    packets: u64,
    bytes: u64,
}

impl NatSlot {
    fn empty(now: Instant) -> Self {
        NatSlot {
            allocated: false,
            ue_ip: Ipv4Addr::UNSPECIFIED,
            ue_port: 0,
            protocol: NatProtocol::Udp,
            external_port: 0,
            owning_session: 0,
            last_activity: now,
            packets: 0,
            bytes: 0,
        }
    }

    fn is_live(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.allocated && now.saturating_duration_since(self.last_activity) <= idle_timeout
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NatEntry {
    pub ue_ip: Ipv4Addr,
    pub ue_port: u16,
    pub protocol: NatProtocol,
    pub external_ip: Ipv4Addr,
    pub external_port: u16,
    pub owning_session: u64,
}

impl From<(&NatSlot, Ipv4Addr)> for NatEntry {
    fn from((slot, external_ip): (&NatSlot, Ipv4Addr)) -> Self {
        NatEntry {
            ue_ip: slot.ue_ip,
            ue_port: slot.ue_port,
            protocol: slot.protocol,
            external_ip,
            external_port: slot.external_port,
            owning_session: slot.owning_session,
        }
    }
}

pub struct NatTable {
    slots: Mutex<Vec<NatSlot>>,
    next_port: Mutex<u32>,
    external_ip: Ipv4Addr,
    port_min: u16,
    port_max: u16,
    idle_timeout: Duration,
}

impl NatTable {
    pub fn new(capacity: usize, external_ip: Ipv4Addr, port_min: u16, port_max: u16, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        NatTable {
            slots: Mutex::new((0..capacity).map(|_| NatSlot::empty(now)).collect()),
            next_port: Mutex::new(port_min as u32),
            external_ip,
            port_min,
            port_max,
            idle_timeout,
        }
    }

    pub fn external_ip(&self) -> Ipv4Addr {
        self.external_ip
    }

    /// Looks up a live entry for `(ue_ip, ue_port, protocol)`, creating one if
    /// none exists and a slot (free, or an expired one reclaimed in place) is
    /// available. Touches and accounts `bytes` on every call that resolves an
    /// entry, matching "per-entry counters updated on every packet".
    pub fn get_or_create(
        &self,
        ue_ip: Ipv4Addr,
        ue_port: u16,
        protocol: NatProtocol,
        owning_session: u64,
        bytes: u64,
    ) -> Option<NatEntry> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();

        if let Some(slot) = slots.iter_mut().find(|s| {
            s.is_live(now, self.idle_timeout) && s.ue_ip == ue_ip && s.ue_port == ue_port && s.protocol == protocol
        }) {
            slot.last_activity = now;
            slot.packets += 1;
            slot.bytes += bytes;
            return Some(NatEntry::from((&*slot, self.external_ip)));
        }

        let idx = slots
            .iter()
            .position(|s| !s.allocated)
            .or_else(|| slots.iter().position(|s| !s.is_live(now, self.idle_timeout)))?;

        let external_port = self.allocate_port(&slots, protocol, now)?;
        slots[idx] = NatSlot {
            allocated: true,
            ue_ip,
            ue_port,
            protocol,
            external_port,
            owning_session,
            last_activity: now,
            packets: 1,
            bytes,
        };
        Some(NatEntry::from((&slots[idx], self.external_ip)))
    }

    pub fn lookup_by_external(&self, external_port: u16, protocol: NatProtocol, bytes: u64) -> Option<NatEntry> {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.iter_mut().find(|s| {
            s.is_live(now, self.idle_timeout) && s.external_port == external_port && s.protocol == protocol
        })?;
        slot.last_activity = now;
        slot.packets += 1;
        slot.bytes += bytes;
        Some(NatEntry::from((&*slot, self.external_ip)))
    }

    pub fn delete_by_session(&self, owning_session: u64) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let mut count = 0;
        for slot in slots.iter_mut() {
            if slot.allocated && slot.owning_session == owning_session {
                *slot = NatSlot::empty(Instant::now());
                count += 1;
            }
        }
        count
    }

    /// Expires entries idle past the timeout. Idempotent: a second call
    /// immediately after the first finds nothing left to expire.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        let mut count = 0;
        for slot in slots.iter_mut() {
            if slot.allocated && !slot.is_live(now, self.idle_timeout) {
                *slot = NatSlot::empty(now);
                count += 1;
            }
        }
        count
    }

    fn allocate_port(&self, slots: &[NatSlot], protocol: NatProtocol, now: Instant) -> Option<u16> {
        let range = (self.port_max - self.port_min + 1) as u32;
        let mut cursor = self.next_port.lock().unwrap();
        for _ in 0..range {
            let candidate = self.port_min + ((*cursor - self.port_min as u32) % range) as u16;
            *cursor = (*cursor + 1 - self.port_min as u32) % range + self.port_min as u32;
            let in_use = slots
                .iter()
                .any(|s| s.is_live(now, self.idle_timeout) && s.protocol == protocol && s.external_port == candidate);
            if !in_use {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NatTable {
        NatTable::new(4, Ipv4Addr::new(10, 45, 0, 1), 10_000, 10_010, Duration::from_millis(50))
    }

    #[test]
    fn get_or_create_is_idempotent_for_same_flow() {
        let t = table();
        let a = t.get_or_create(Ipv4Addr::new(10, 60, 0, 1), 1234, NatProtocol::Udp, 7, 100).unwrap();
        let b = t.get_or_create(Ipv4Addr::new(10, 60, 0, 1), 1234, NatProtocol::Udp, 7, 100).unwrap();
        assert_eq!(a.external_port, b.external_port);
    }

    #[test]
    fn lookup_by_external_round_trips() {
        let t = table();
        let created = t.get_or_create(Ipv4Addr::new(10, 60, 0, 2), 2000, NatProtocol::Tcp, 1, 10).unwrap();
        let looked_up = t.lookup_by_external(created.external_port, NatProtocol::Tcp, 10).unwrap();
        assert_eq!(looked_up.ue_ip, Ipv4Addr::new(10, 60, 0, 2));
        assert_eq!(looked_up.ue_port, 2000);
    }

    #[test]
    fn delete_by_session_clears_entries() {
        let t = table();
        let entry = t.get_or_create(Ipv4Addr::new(10, 60, 0, 3), 3000, NatProtocol::Udp, 42, 1).unwrap();
        assert_eq!(t.delete_by_session(42), 1);
        assert!(t.lookup_by_external(entry.external_port, NatProtocol::Udp, 1).is_none());
        assert_eq!(t.delete_by_session(42), 0);
    }

    #[test]
    fn cleanup_expires_idle_entries_and_is_idempotent() {
        let t = table();
        t.get_or_create(Ipv4Addr::new(10, 60, 0, 4), 4000, NatProtocol::Udp, 1, 1).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(t.cleanup(), 1);
        assert_eq!(t.cleanup(), 0);
    }

    #[test]
    fn table_full_returns_none() {
        let t = NatTable::new(1, Ipv4Addr::new(10, 45, 0, 1), 10_000, 10_010, Duration::from_secs(60));
        t.get_or_create(Ipv4Addr::new(10, 60, 0, 1), 1, NatProtocol::Udp, 1, 1).unwrap();
        assert!(t.get_or_create(Ipv4Addr::new(10, 60, 0, 2), 2, NatProtocol::Udp, 2, 1).is_none());
    }
}
