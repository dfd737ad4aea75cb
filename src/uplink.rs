//! C6 — uplink receiver. Owns the data-plane UDP socket's receive side:
//! every datagram is either a GTP-U echo (answered inline, never queued) or
//! handed to the worker pool via the bounded queue.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::counters::Counters;
use crate::gtpu;
use crate::queue::{Packet, PacketQueue};

pub struct UplinkContext {
    pub socket: Arc<UdpSocket>,
    pub queue: Arc<PacketQueue>,
    pub counters: Arc<Counters>,
}

pub fn run(ctx: Arc<UplinkContext>, stop: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 65536];
    while !stop.load(Ordering::Relaxed) {
        match ctx.socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                let data = &buf[..n];
                if gtpu::is_echo_request(data) {
                    gtpu::handle_echo_request(&ctx.socket, data, peer);
                    ctx.counters.echo_req.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                if gtpu::is_echo_response(data) {
                    ctx.counters.echo_resp.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                let packet = Packet { data: data.to_vec(), peer };
                if !ctx.queue.enqueue(packet) {
                    ctx.counters.queue_full_drop.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "uplink recv failed");
            }
        }
    }
}
