//! C5 — the packet pipeline. Workers pull from the shared queue and run every
//! step of §4.4 for one packet under at most one session lock, then drop it
//! before touching the queue again.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::counters::Counters;
use crate::gtpu::{self, PduSessionDirection};
use crate::nat::{NatProtocol, NatTable};
use crate::net;
use crate::queue::PacketQueue;
use crate::rules::{direction_of, ForwardingAction, Interface, IpProtocol};
use crate::session::SessionStore;
use crate::tun::TunDevice;

pub struct PipelineContext {
    pub store: Arc<SessionStore>,
    pub nat: Arc<NatTable>,
    pub counters: Arc<Counters>,
    pub queue: Arc<PacketQueue>,
    pub data_socket: Arc<UdpSocket>,
    pub tun: Arc<dyn TunDevice>,
    pub tunnel_port: u16,
}

pub fn worker_loop(ctx: Arc<PipelineContext>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match ctx.queue.dequeue_wait() {
            Some(packet) => process_packet(&ctx, packet.data, packet.peer),
            None => continue,
        }
    }
}

fn nat_protocol_of(protocol: IpProtocol) -> Option<NatProtocol> {
    match protocol {
        IpProtocol::Tcp => Some(NatProtocol::Tcp),
        IpProtocol::Udp => Some(NatProtocol::Udp),
        IpProtocol::Icmp => Some(NatProtocol::Icmp),
        IpProtocol::Other(_) => None,
    }
}

/// Runs one datagram through the full §4.4 pipeline. Exposed (rather than
/// private to the worker loop) so integration tests can drive a single
/// packet without standing up real sockets.
pub fn process_packet(ctx: &PipelineContext, data: Vec<u8>, _peer: SocketAddr) {
    ctx.counters.received.fetch_add(1, Ordering::SeqCst);

    let header = match gtpu::decode(&data) {
        Some(h) => h,
        None => {
            ctx.counters.malformed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    if header.message_type != gtpu::GPDU {
        ctx.counters.non_gpdu.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let session = match ctx.store.find_by_tunnel(header.tunnel_id, Interface::Access) {
        Some(s) => s,
        None => {
            ctx.counters.session_miss.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    let mut inner = session.lock();
    let now = Instant::now();
    let payload = &data[header.payload_offset..];

    let detection = match inner.best_detection_rule(Interface::Access, header.tunnel_id) {
        Some(d) => d.clone(),
        None => {
            ctx.counters.pdr_miss.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    let forwarding = match inner.forwarding.iter().find(|f| f.id == detection.forwarding_rule_id).cloned() {
        Some(f) => f,
        None => {
            ctx.counters.far_miss.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    let direction = direction_of(detection.source_interface);
    let payload_bits = (payload.len() * 8) as f64;

    if let Some(qos_id) = detection.qos_rule_id {
        match inner.qos.iter_mut().find(|q| q.id == qos_id) {
            Some(qos) => match qos.enforce(now, direction, payload_bits) {
                crate::rules::QosOutcome::Passed => {
                    ctx.counters.qos_passed.fetch_add(1, Ordering::SeqCst);
                }
                crate::rules::QosOutcome::DroppedPps => {
                    ctx.counters.qos_pps_dropped.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                crate::rules::QosOutcome::DroppedMbr => {
                    ctx.counters.qos_mbr_dropped.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            },
            None => {
                ctx.counters.qer_miss.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    }

    if let Some(usage_id) = detection.usage_rule_id {
        match inner.usage.iter_mut().find(|u| u.id == usage_id) {
            Some(usage) => {
                ctx.counters.urr_tracked.fetch_add(1, Ordering::SeqCst);
                match usage.account(now, direction, payload.len() as u64) {
                    crate::rules::UsageOutcome::Tracked { report_triggered } => {
                        if report_triggered {
                            ctx.counters.urr_reports_triggered.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    crate::rules::UsageOutcome::QuotaExceeded => {
                        ctx.counters.urr_quota_exceeded.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                }
            }
            None => {
                ctx.counters.urr_miss.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    }

    let payload = payload.to_vec();
    drop(inner);

    match forwarding.action {
        ForwardingAction::Drop | ForwardingAction::Buffer => {
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
        }
        ForwardingAction::Forward => match forwarding.destination_interface {
            Interface::Access | Interface::Peer => {
                forward_via_tunnel(ctx, &forwarding, &payload);
            }
            Interface::Core => {
                forward_to_core(ctx, session.local_id, &payload);
            }
        },
    }
}

fn forward_via_tunnel(ctx: &PipelineContext, forwarding: &crate::rules::ForwardingRule, payload: &[u8]) {
    let outer = match &forwarding.outer_header {
        Some(o) => o,
        None => {
            tracing::error!("forwarding rule missing outer-header descriptor for tunnel send");
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    let mut buf = vec![0u8; payload.len() + 8];
    let n = match gtpu::encode_gpdu(&mut buf, outer.teid, payload) {
        Some(n) => n,
        None => {
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    let dest = SocketAddr::from((outer.dest_ip, ctx.tunnel_port));
    match ctx.data_socket.send_to(&buf[..n], dest) {
        Ok(_) => {
            match forwarding.destination_interface {
                Interface::Peer => ctx.counters.n9_tx.fetch_add(1, Ordering::SeqCst),
                _ => ctx.counters.n3_tx.fetch_add(1, Ordering::SeqCst),
            };
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to send G-PDU");
            ctx.counters.n3_send_fail.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn forward_to_core(ctx: &PipelineContext, session_id: u64, payload: &[u8]) {
    let mut payload = payload.to_vec();
    let view = match net::parse_ipv4(&payload) {
        Some(v) => v,
        None => {
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    let proto = match nat_protocol_of(view.protocol) {
        Some(p) => p,
        None => {
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    let src_port = match net::transport_key(&payload, &view, true) {
        Some(p) => p,
        None => {
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    let entry = match ctx.nat.get_or_create(view.src, src_port, proto, session_id, payload.len() as u64) {
        Some(e) => e,
        None => {
            tracing::warn!("NAT table exhausted, dropping uplink packet");
            ctx.counters.nat_exhausted.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    net::rewrite_nat(&mut payload, &view, entry.external_ip, entry.external_port, true);

    if ctx.tun.is_stub() {
        ctx.counters.n6_stub.fetch_add(1, Ordering::SeqCst);
        return;
    }
    match ctx.tun.write_packet(&payload) {
        Ok(()) => {
            ctx.counters.n6_tx.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to write packet to TUN device");
            ctx.counters.gtpu_dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[allow(dead_code)]
fn direction_label(direction: PduSessionDirection) -> &'static str {
    match direction {
        PduSessionDirection::Uplink => "uplink",
        PduSessionDirection::Downlink => "downlink",
    }
}

#[allow(dead_code)]
fn loopback() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DetectionRule, ForwardingRule, OuterHeader, QosRule};
    use std::net::UdpSocket;

    fn make_ctx() -> (Arc<PipelineContext>, SocketAddr) {
        let store = Arc::new(SessionStore::new(8));
        let nat = Arc::new(NatTable::new(16, Ipv4Addr::new(10, 45, 0, 1), 10_000, 10_100, std::time::Duration::from_secs(60)));
        let counters = Arc::new(Counters::default());
        let queue = Arc::new(PacketQueue::new(16));
        let data_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let peer_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer_socket.local_addr().unwrap();
        drop(peer_socket);
        let tun: Arc<dyn TunDevice> = Arc::new(crate::tun::StubTun);
        let ctx = Arc::new(PipelineContext {
            store,
            nat,
            counters,
            queue,
            data_socket,
            tun,
            tunnel_port: 2152,
        });
        (ctx, peer_addr)
    }

    #[test]
    fn malformed_packet_counts_and_does_not_panic() {
        let (ctx, peer) = make_ctx();
        process_packet(&ctx, vec![0u8; 2], peer);
        assert_eq!(ctx.counters.malformed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_tunnel_counts_session_miss() {
        let (ctx, peer) = make_ctx();
        let mut buf = [0u8; 16];
        let n = gtpu::encode_gpdu(&mut buf, 0x1234, b"x").unwrap();
        process_packet(&ctx, buf[..n].to_vec(), peer);
        assert_eq!(ctx.counters.session_miss.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_action_increments_gtpu_dropped() {
        let (ctx, peer) = make_ctx();
        let session = ctx.store.create(1).unwrap();
        {
            let mut inner = session.lock();
            inner
                .upsert_detection(DetectionRule {
                    id: 1,
                    precedence: 10,
                    source_interface: Interface::Access,
                    tunnel_id: Some(0xAAAA),
                    ue_ip: None,
                    application_id: None,
                    filter: None,
                    forwarding_rule_id: 1,
                    qos_rule_id: None,
                    usage_rule_id: None,
                })
                .unwrap();
            inner
                .upsert_forwarding(ForwardingRule {
                    id: 1,
                    action: ForwardingAction::Drop,
                    destination_interface: Interface::Core,
                    outer_header: None,
                })
                .unwrap();
        }

        let mut buf = [0u8; 32];
        let n = gtpu::encode_gpdu(&mut buf, 0xAAAA, b"payload").unwrap();
        process_packet(&ctx, buf[..n].to_vec(), peer);
        assert_eq!(ctx.counters.gtpu_dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mbr_exhaustion_drops_packet() {
        let (ctx, peer) = make_ctx();
        let session = ctx.store.create(1).unwrap();
        {
            let mut inner = session.lock();
            inner
                .upsert_detection(DetectionRule {
                    id: 1,
                    precedence: 10,
                    source_interface: Interface::Access,
                    tunnel_id: Some(0xBEEF),
                    ue_ip: None,
                    application_id: None,
                    filter: None,
                    forwarding_rule_id: 1,
                    qos_rule_id: Some(1),
                    usage_rule_id: None,
                })
                .unwrap();
            inner
                .upsert_forwarding(ForwardingRule {
                    id: 1,
                    action: ForwardingAction::Drop,
                    destination_interface: Interface::Core,
                    outer_header: None,
                })
                .unwrap();
            let mut qos = QosRule::new(1, 5);
            qos.mbr_uplink = Some(crate::rules::TokenBucket::new(0.0, Instant::now()));
            inner.upsert_qos(qos).unwrap();
        }

        let mut buf = [0u8; 32];
        let n = gtpu::encode_gpdu(&mut buf, 0xBEEF, b"payload").unwrap();
        process_packet(&ctx, buf[..n].to_vec(), peer);
        assert_eq!(ctx.counters.qos_mbr_dropped.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.counters.gtpu_dropped.load(Ordering::SeqCst), 0);
    }
}
