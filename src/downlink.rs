//! C7 — downlink receiver. Reads IPv4 datagrams off the TUN device, reverses
//! the NAT translation, and re-encapsulates them in GTP-U toward the access
//! side of the owning session.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::counters::Counters;
use crate::gtpu;
use crate::nat::{NatProtocol, NatTable};
use crate::net;
use crate::rules::{Interface, IpProtocol};
use crate::session::SessionStore;
use crate::tun::TunDevice;

pub struct DownlinkContext {
    pub tun: Arc<dyn TunDevice>,
    pub nat: Arc<NatTable>,
    pub store: Arc<SessionStore>,
    pub data_socket: Arc<UdpSocket>,
    pub counters: Arc<Counters>,
    pub tunnel_port: u16,
}

pub fn run(ctx: Arc<DownlinkContext>, stop: Arc<AtomicBool>) {
    if ctx.tun.is_stub() {
        // Nothing will ever arrive on a stub device; idle without spinning.
        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        return;
    }

    let mut buf = vec![0u8; 65536];
    while !stop.load(Ordering::Relaxed) {
        match ctx.tun.read_packet(&mut buf) {
            // The real device is opened O_NONBLOCK; Ok(0) means "nothing
            // ready", not EOF. Back off briefly instead of busy-spinning.
            Ok(0) => std::thread::sleep(std::time::Duration::from_millis(2)),
            Ok(n) => process_downlink(&ctx, &mut buf[..n]),
            Err(e) => {
                tracing::error!(error = %e, "TUN read failed");
            }
        }
    }
}

/// Runs one TUN-sourced IPv4 datagram through NAT reversal and GTP-U
/// re-encapsulation. Exposed for the same reason as `pipeline::process_packet`.
pub fn process_downlink(ctx: &DownlinkContext, payload: &mut [u8]) {
    let view = match net::parse_ipv4(payload) {
        Some(v) => v,
        None => return,
    };
    let proto = match view.protocol {
        IpProtocol::Tcp => NatProtocol::Tcp,
        IpProtocol::Udp => NatProtocol::Udp,
        IpProtocol::Icmp => NatProtocol::Icmp,
        IpProtocol::Other(_) => return,
    };
    let dest_port = match net::transport_key(payload, &view, false) {
        Some(p) => p,
        None => return,
    };

    let entry = match ctx.nat.lookup_by_external(dest_port, proto, payload.len() as u64) {
        Some(e) => e,
        None => {
            ctx.counters.nat_miss.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    net::rewrite_nat(payload, &view, entry.ue_ip, entry.ue_port, false);

    let session = match ctx.store.find_by_local(entry.owning_session) {
        Some(s) => s,
        None => {
            ctx.counters.session_miss.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    let (teid, dest_ip) = {
        let inner = session.lock();
        let detection = match inner.detection.iter().find(|d| d.source_interface == Interface::Core) {
            Some(d) => d,
            None => {
                ctx.counters.pdr_miss.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };
        let forwarding = match inner.forwarding.iter().find(|f| f.id == detection.forwarding_rule_id) {
            Some(f) => f,
            None => {
                ctx.counters.far_miss.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };
        match &forwarding.outer_header {
            Some(o) => (o.teid, o.dest_ip),
            None => {
                ctx.counters.far_miss.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    };

    let mut buf = vec![0u8; payload.len() + 8];
    let n = match gtpu::encode_gpdu(&mut buf, teid, payload) {
        Some(n) => n,
        None => return,
    };
    let dest = SocketAddr::from((dest_ip, ctx.tunnel_port));
    match ctx.data_socket.send_to(&buf[..n], dest) {
        Ok(_) => {
            ctx.counters.n3_tx.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to send downlink G-PDU");
            ctx.counters.n3_send_fail.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_ctx() -> Arc<DownlinkContext> {
        Arc::new(DownlinkContext {
            tun: Arc::new(crate::tun::StubTun),
            nat: Arc::new(NatTable::new(16, Ipv4Addr::new(10, 45, 0, 1), 10_000, 10_100, std::time::Duration::from_secs(60))),
            store: Arc::new(SessionStore::new(8)),
            data_socket: Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap()),
            counters: Arc::new(Counters::default()),
            tunnel_port: 2152,
        })
    }

    fn build_udp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let udp_len = 8 + payload.len();
        let total_len = 20 + udp_len;
        let mut pkt = vec![0u8; total_len];
        pkt[0] = 0x45;
        pkt[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        pkt[8] = 64;
        pkt[9] = 17;
        pkt[12..16].copy_from_slice(&src.octets());
        pkt[16..20].copy_from_slice(&dst.octets());
        pkt[20..22].copy_from_slice(&src_port.to_be_bytes());
        pkt[22..24].copy_from_slice(&dst_port.to_be_bytes());
        pkt[24..26].copy_from_slice(&(udp_len as u16).to_be_bytes());
        pkt[28..].copy_from_slice(payload);
        pkt
    }

    #[test]
    fn unknown_external_port_counts_nat_miss() {
        let ctx = make_ctx();
        let mut pkt = build_udp(Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(10, 45, 0, 1), 53, 10_050, b"x");
        process_downlink(&ctx, &mut pkt);
        assert_eq!(ctx.counters.nat_miss.load(Ordering::SeqCst), 1);
    }
}
