//! C2 — session store. A fixed-capacity table of sessions behind an outer
//! mutex used only for create/delete and store-wide scans; once a session is
//! located, callers take its own lock and never touch the outer one again.
//! Lock order is always store → session, and the two critical sections never
//! nest beyond the single `find_by_tunnel` scan that needs both at once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::UpfError;
use crate::rules::{DetectionRule, ForwardingRule, Interface, QosRule, UsageRule, MAX_RULES_PER_KIND};

#[derive(Debug, Default)]
pub struct SessionInner {
    pub detection: Vec<DetectionRule>,
    pub forwarding: Vec<ForwardingRule>,
    pub qos: Vec<QosRule>,
    pub usage: Vec<UsageRule>,
}

impl SessionInner {
    pub fn upsert_detection(&mut self, rule: DetectionRule) -> Result<(), UpfError> {
        upsert(&mut self.detection, rule, |r| r.id)
    }
    pub fn upsert_forwarding(&mut self, rule: ForwardingRule) -> Result<(), UpfError> {
        upsert(&mut self.forwarding, rule, |r| r.id)
    }
    pub fn upsert_qos(&mut self, rule: QosRule) -> Result<(), UpfError> {
        upsert(&mut self.qos, rule, |r| r.id)
    }
    pub fn upsert_usage(&mut self, rule: UsageRule) -> Result<(), UpfError> {
        upsert(&mut self.usage, rule, |r| r.id)
    }

    pub fn remove_detection(&mut self, id: u16) -> bool {
        remove(&mut self.detection, id, |r| r.id)
    }
    pub fn remove_forwarding(&mut self, id: u16) -> bool {
        remove(&mut self.forwarding, id, |r| r.id)
    }
    pub fn remove_qos(&mut self, id: u16) -> bool {
        remove(&mut self.qos, id, |r| r.id)
    }
    pub fn remove_usage(&mut self, id: u16) -> bool {
        remove(&mut self.usage, id, |r| r.id)
    }

    /// §4.4 step 3: highest precedence first, ties broken by lowest rule id.
    pub fn best_detection_rule(&self, source_interface: Interface, tunnel_id: u32) -> Option<&DetectionRule> {
        self.detection
            .iter()
            .filter(|r| r.source_interface == source_interface && r.tunnel_id == Some(tunnel_id))
            .max_by(|a, b| a.precedence.cmp(&b.precedence).then(b.id.cmp(&a.id)))
    }
}

fn upsert<T>(vec: &mut Vec<T>, item: T, id_of: impl Fn(&T) -> u16) -> Result<(), UpfError> {
    let id = id_of(&item);
    if let Some(slot) = vec.iter_mut().find(|existing| id_of(existing) == id) {
        *slot = item;
        return Ok(());
    }
    if vec.len() >= MAX_RULES_PER_KIND {
        return Err(UpfError::InvalidConfig(format!(
            "rule table full (capacity {MAX_RULES_PER_KIND})"
        )));
    }
    vec.push(item);
    Ok(())
}

fn remove<T>(vec: &mut Vec<T>, id: u16, id_of: impl Fn(&T) -> u16) -> bool {
    let before = vec.len();
    vec.retain(|item| id_of(item) != id);
    vec.len() != before
}

pub struct Session {
    pub local_id: u64,
    pub peer_id: u64,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new(local_id: u64, peer_id: u64) -> Self {
        Session {
            local_id,
            peer_id,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct SessionStore {
    slots: Mutex<Vec<Option<Arc<Session>>>>,
    next_id: AtomicU64,
    live: AtomicUsize,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        SessionStore {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            next_id: AtomicU64::new(1),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn create(&self, peer_id: u64) -> Result<Arc<Session>, UpfError> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(UpfError::SessionTableFull {
                capacity: self.capacity,
            })?;
        let local_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(local_id, peer_id));
        *slot = Some(session.clone());
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    pub fn find_by_local(&self, local_id: u64) -> Option<Arc<Session>> {
        let slots = self.slots.lock().unwrap();
        slots.iter().flatten().find(|s| s.local_id == local_id).cloned()
    }

    /// Scans allocated sessions, then each candidate's own detection rules,
    /// for one whose PDI matches `(source_interface, tunnel_id)`. The store
    /// lock and the per-session lock are briefly held together here — this
    /// is the one place lock order (store → session) is exercised, never
    /// the reverse.
    pub fn find_by_tunnel(&self, tunnel_id: u32, source_interface: Interface) -> Option<Arc<Session>> {
        let slots = self.slots.lock().unwrap();
        for session in slots.iter().flatten() {
            let inner = session.lock();
            let hit = inner
                .detection
                .iter()
                .any(|d| d.source_interface == source_interface && d.tunnel_id == Some(tunnel_id));
            drop(inner);
            if hit {
                return Some(session.clone());
            }
        }
        None
    }

    pub fn delete(&self, local_id: u64) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots
            .iter_mut()
            .find(|s| matches!(s, Some(session) if session.local_id == local_id))
        {
            *slot = None;
            self.live.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ForwardingAction, ForwardingRule};

    fn sample_detection(id: u16, tunnel_id: u32, precedence: u32) -> DetectionRule {
        DetectionRule {
            id,
            precedence,
            source_interface: Interface::Access,
            tunnel_id: Some(tunnel_id),
            ue_ip: None,
            application_id: None,
            filter: None,
            forwarding_rule_id: 1,
            qos_rule_id: None,
            usage_rule_id: None,
        }
    }

    #[test]
    fn create_assigns_unique_nonzero_ids() {
        let store = SessionStore::new(4);
        let a = store.create(100).unwrap();
        let b = store.create(100).unwrap();
        assert_ne!(a.local_id, 0);
        assert_ne!(b.local_id, 0);
        assert_ne!(a.local_id, b.local_id);
    }

    #[test]
    fn create_fails_when_full() {
        let store = SessionStore::new(1);
        store.create(1).unwrap();
        assert!(matches!(store.create(2), Err(UpfError::SessionTableFull { .. })));
    }

    #[test]
    fn delete_frees_slot_for_reuse() {
        let store = SessionStore::new(1);
        let s = store.create(1).unwrap();
        assert!(store.delete(s.local_id));
        assert_eq!(store.live_count(), 0);
        assert!(store.create(2).is_ok());
    }

    #[test]
    fn find_by_tunnel_matches_on_interface_and_teid() {
        let store = SessionStore::new(4);
        let session = store.create(1).unwrap();
        session.lock().upsert_detection(sample_detection(1, 0xAAAA, 10)).unwrap();

        let found = store.find_by_tunnel(0xAAAA, Interface::Access).unwrap();
        assert_eq!(found.local_id, session.local_id);
        assert!(store.find_by_tunnel(0xBBBB, Interface::Access).is_none());
    }

    #[test]
    fn best_detection_rule_prefers_higher_precedence() {
        let mut inner = SessionInner::default();
        inner.upsert_detection(sample_detection(1, 1, 5)).unwrap();
        inner.upsert_detection(sample_detection(2, 1, 50)).unwrap();
        let best = inner.best_detection_rule(Interface::Access, 1).unwrap();
        assert_eq!(best.id, 2);
    }

    #[test]
    fn upsert_replaces_existing_id_in_place() {
        let mut inner = SessionInner::default();
        inner
            .upsert_forwarding(ForwardingRule {
                id: 1,
                action: ForwardingAction::Drop,
                destination_interface: Interface::Core,
                outer_header: None,
            })
            .unwrap();
        inner
            .upsert_forwarding(ForwardingRule {
                id: 1,
                action: ForwardingAction::Forward,
                destination_interface: Interface::Core,
                outer_header: None,
            })
            .unwrap();
        assert_eq!(inner.forwarding.len(), 1);
        assert_eq!(inner.forwarding[0].action, ForwardingAction::Forward);
    }
}
