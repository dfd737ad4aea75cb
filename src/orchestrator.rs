//! C10 — orchestrator. Binds the control and data sockets, opens the TUN
//! device, and owns every background thread's lifetime. Nothing here touches
//! a packet directly; it only wires the pieces from the other modules
//! together and tears them down in reverse order on shutdown.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::control::ControlContext;
use crate::counters::Counters;
use crate::error::UpfError;
use crate::nat::NatTable;
use crate::pipeline::PipelineContext;
use crate::queue::PacketQueue;
use crate::session::SessionStore;
use crate::tun;
use crate::{downlink, reaper, stats, uplink};

/// Sockets poll this often for the stop flag between recv attempts, so
/// shutdown never blocks on an indefinite read.
const SOCKET_POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Orchestrator {
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl Orchestrator {
    /// Binds both UDP sockets, opens (or stubs) the TUN device, and spawns
    /// every worker/background thread. Returns as soon as the data plane is
    /// running; callers decide how long to keep it alive before calling
    /// [`Orchestrator::shutdown`].
    pub fn start(config: Config) -> Result<Self, UpfError> {
        config.validate()?;

        let control_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.control_port));
        let control_socket = UdpSocket::bind(control_addr).map_err(|source| UpfError::SocketBind {
            addr: control_addr,
            source,
        })?;
        control_socket
            .set_read_timeout(Some(SOCKET_POLL_TIMEOUT))
            .map_err(|source| UpfError::SocketBind {
                addr: control_addr,
                source,
            })?;

        let data_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.tunnel_port));
        let data_socket = UdpSocket::bind(data_addr).map_err(|source| UpfError::SocketBind {
            addr: data_addr,
            source,
        })?;
        data_socket
            .set_read_timeout(Some(SOCKET_POLL_TIMEOUT))
            .map_err(|source| UpfError::SocketBind {
                addr: data_addr,
                source,
            })?;
        let data_socket = Arc::new(data_socket);

        let tun_device: Arc<dyn tun::TunDevice> = Arc::from(tun::open_or_stub("upf0"));

        let store = Arc::new(SessionStore::new(config.session_table_size));
        let nat = Arc::new(NatTable::new(
            config.nat_table_size,
            config.external_ip,
            config.external_port_min,
            config.external_port_max,
            config.nat_idle_timeout(),
        ));
        let counters = Arc::new(Counters::default());
        let queue = Arc::new(PacketQueue::new(config.queue_capacity));

        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        let control_ctx = Arc::new(ControlContext::new(store.clone(), nat.clone(), config.external_ip));

        {
            let control_ctx = control_ctx.clone();
            let control_socket = control_socket;
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name("pfcp-control".into())
                .spawn(move || run_control_loop(control_ctx, control_socket, stop))
                .map_err(UpfError::ThreadSpawn)?;
            handles.push(handle);
        }

        {
            let ctx = Arc::new(uplink::UplinkContext {
                socket: data_socket.clone(),
                queue: queue.clone(),
                counters: counters.clone(),
            });
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name("uplink".into())
                .spawn(move || uplink::run(ctx, stop))
                .map_err(UpfError::ThreadSpawn)?;
            handles.push(handle);
        }

        for worker_idx in 0..config.worker_count {
            let ctx = Arc::new(PipelineContext {
                store: store.clone(),
                nat: nat.clone(),
                counters: counters.clone(),
                queue: queue.clone(),
                data_socket: data_socket.clone(),
                tun: tun_device.clone(),
                tunnel_port: config.tunnel_port,
            });
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{worker_idx}"))
                .spawn(move || crate::pipeline::worker_loop(ctx, stop))
                .map_err(UpfError::ThreadSpawn)?;
            handles.push(handle);
        }

        {
            let ctx = Arc::new(downlink::DownlinkContext {
                tun: tun_device.clone(),
                nat: nat.clone(),
                store: store.clone(),
                data_socket: data_socket.clone(),
                counters: counters.clone(),
                tunnel_port: config.tunnel_port,
            });
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name("downlink".into())
                .spawn(move || downlink::run(ctx, stop))
                .map_err(UpfError::ThreadSpawn)?;
            handles.push(handle);
        }

        {
            let nat = nat.clone();
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name("nat-reaper".into())
                .spawn(move || reaper::run(nat, stop))
                .map_err(UpfError::ThreadSpawn)?;
            handles.push(handle);
        }

        {
            let counters = counters.clone();
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name("stats".into())
                .spawn(move || stats::run(counters, stop))
                .map_err(UpfError::ThreadSpawn)?;
            handles.push(handle);
        }

        tracing::info!(
            control_port = config.control_port,
            tunnel_port = config.tunnel_port,
            workers = config.worker_count,
            tun_stub = tun_device.is_stub(),
            "UPF data plane started"
        );

        Ok(Orchestrator {
            stop,
            handles: Mutex::new(handles),
            counters,
        })
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Signals every thread to stop and joins them all. Idempotent: a second
    /// call finds an empty handle list and returns immediately.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if let Err(e) = handle.join() {
                tracing::error!(thread = %name, error = ?e, "worker thread panicked");
            }
        }
    }
}

fn run_control_loop(ctx: Arc<ControlContext>, socket: UdpSocket, stop: Arc<AtomicBool>) {
    let mut buf = vec![0u8; 4096];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                if let Some(reply) = crate::control::dispatch(&ctx, &buf[..n], peer) {
                    if let Err(e) = socket.send_to(&reply, peer) {
                        tracing::error!(error = %e, %peer, "failed to send PFCP reply");
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "control socket recv failed");
            }
        }
    }
}
