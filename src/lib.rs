use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use nix::poll::{poll, PollFd, PollFlags};
use tidy_tuntap::Tun;
use tracing::{debug, warn};

mod err;
pub use err::*;

pub mod link;
pub mod tcp;
pub mod wire;

mod sock;
pub use sock::{TcpListener, TcpStream};

use tcp::{Dual, Quad, TcpConfig, TcpConnection};

/// One live connection plus the wakeup channels its blocking handles sleep
/// on. Readers wait on `rvar`, writers on `wvar`, and `evar` covers
/// connection-level events (establishment, teardown).
#[derive(Debug)]
pub(crate) struct ConnEntry {
    pub(crate) conn: TcpConnection,
    pub(crate) rvar: Arc<Condvar>,
    pub(crate) wvar: Arc<Condvar>,
    pub(crate) evar: Arc<Condvar>,
    pub(crate) reset: Arc<AtomicBool>,
    /// Port of the listener this connection arrived on, if it opened
    /// passively.
    pub(crate) listen_port: Option<u16>,
    /// Whether the listener has been told about it yet.
    pub(crate) announced: bool,
}

impl ConnEntry {
    fn new(conn: TcpConnection, listen_port: Option<u16>) -> Self {
        ConnEntry {
            conn,
            rvar: Arc::new(Condvar::new()),
            wvar: Arc::new(Condvar::new()),
            evar: Arc::new(Condvar::new()),
            reset: Arc::new(AtomicBool::new(false)),
            listen_port,
            announced: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Acceptor {
    pub(crate) cvar: Arc<Condvar>,
    pub(crate) ready: Vec<Quad>,
}

#[derive(Debug)]
pub(crate) struct Manager {
    pub(crate) cfg: TcpConfig,
    pub(crate) bound: HashMap<u16, Acceptor>,
    pub(crate) conns: HashMap<Quad, ConnEntry>,
    pub(crate) next_port: u16,
}

impl Manager {
    fn alloc_port(&mut self) -> Result<u16, Error> {
        for _ in 0..u16::MAX {
            let candidate = self.next_port;
            self.next_port = if self.next_port == u16::MAX {
                49152
            } else {
                self.next_port + 1
            };

            let in_use = self.bound.contains_key(&candidate)
                || self.conns.keys().any(|quad| quad.src.port == candidate);
            if !in_use {
                return Ok(candidate);
            }
        }

        Err(Error::NoEphemeralPorts)
    }
}

/// A user-space TCP stack bound to a TUN device.
///
/// A background thread owns the device: it ticks every connection, drains
/// their outbound segments onto the wire, and dispatches inbound segments
/// back to them. The blocking [`TcpListener`] and [`TcpStream`] handles talk
/// to the same connections through the shared manager.
#[derive(Debug)]
pub struct TcpStack {
    manager: Arc<Mutex<Manager>>,
    addr: Ipv4Addr,
    jh: thread::JoinHandle<()>,
}

impl TcpStack {
    pub fn new(name: &str, addr: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, Error> {
        Self::with_config(name, addr, mask, TcpConfig::default())
    }

    pub fn with_config(
        name: &str,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
        cfg: TcpConfig,
    ) -> Result<Self, Error> {
        let tun = Tun::new(name, false)?;
        tun.set_addr(addr)?;
        tun.set_netmask(mask)?;
        tun.bring_up()?;

        let manager = Arc::new(Mutex::new(Manager {
            cfg,
            bound: HashMap::new(),
            conns: HashMap::new(),
            next_port: 49152,
        }));

        let jh = {
            let manager = manager.clone();

            thread::spawn(move || segment_loop(tun, manager))
        };

        Ok(TcpStack { manager, addr, jh })
    }

    /// Start listening on `port`. Completed handshakes queue up behind the
    /// returned listener's `accept`.
    pub fn bind(&self, port: u16) -> Result<TcpListener, Error> {
        let mut manager = self.manager.lock().unwrap();

        if manager.bound.contains_key(&port) {
            return Err(Error::PortInUse(port));
        }

        let cvar = Arc::new(Condvar::new());
        manager.bound.insert(
            port,
            Acceptor {
                cvar: cvar.clone(),
                ready: Vec::new(),
            },
        );

        Ok(TcpListener {
            port,
            manager: self.manager.clone(),
            cvar,
        })
    }

    /// Open a connection to `remote:port` and block until the handshake
    /// completes or the attempt is refused.
    pub fn connect(&self, remote: Ipv4Addr, port: u16) -> Result<TcpStream, Error> {
        let mut manager = self.manager.lock().unwrap();

        let local_port = manager.alloc_port()?;
        let quad = Quad {
            src: Dual {
                ipv4: self.addr,
                port: local_port,
            },
            dst: Dual {
                ipv4: remote,
                port,
            },
        };

        let mut conn = TcpConnection::new(manager.cfg.clone());
        conn.connect();

        let entry = ConnEntry::new(conn, None);
        let rvar = entry.rvar.clone();
        let wvar = entry.wvar.clone();
        let evar = entry.evar.clone();
        let reset = entry.reset.clone();
        manager.conns.insert(quad, entry);

        loop {
            if reset.load(Ordering::Acquire) {
                return Err(Error::ConnectionRefused);
            }

            match manager.conns.get(&quad) {
                None => return Err(Error::ConnectionRefused),
                Some(entry) if entry.conn.established() => break,
                Some(_) => manager = evar.wait(manager).unwrap(),
            }
        }

        Ok(TcpStream {
            manager: self.manager.clone(),
            quad,
            rvar,
            wvar,
            evar,
            reset,
            closed: false,
        })
    }

    pub fn join(self) {
        self.jh.join().unwrap();
    }
}

fn segment_loop(mut tun: Tun, manager: Arc<Mutex<Manager>>) -> ! {
    let mut last_tick = Instant::now();

    loop {
        let mut buf = [0u8; 1500];

        {
            let mut manager = manager.lock().unwrap();

            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_millis() as u64;
            if dt > 0 {
                last_tick = now;
                for entry in manager.conns.values_mut() {
                    entry.conn.tick(dt);
                }
            }

            for (quad, entry) in manager.conns.iter_mut() {
                while let Some(seg) = entry.conn.segments_out_mut().pop_front() {
                    let packet = wire::serialize(quad, &seg);
                    if let Err(e) = tun.write(&packet) {
                        warn!("failed to write segment to tun device: {e}");
                    }
                }
            }

            // Reap connections that have finished or aborted, once nothing
            // readable is left behind, and wake everyone blocked on them.
            let dead: Vec<Quad> = manager
                .conns
                .iter()
                .filter(|(_, entry)| {
                    !entry.conn.active()
                        && (entry.conn.inbound_stream().error()
                            || entry.conn.inbound_stream().buffer_empty())
                })
                .map(|(quad, _)| *quad)
                .collect();

            for quad in dead {
                if let Some(entry) = manager.conns.remove(&quad) {
                    if entry.conn.inbound_stream().error() {
                        entry.reset.store(true, Ordering::Release);
                    }
                    entry.rvar.notify_all();
                    entry.wvar.notify_all();
                    entry.evar.notify_all();
                    debug!(?quad, "connection reaped");
                }
            }
        }

        let mut pfd = [PollFd::new(tun.as_raw_fd(), PollFlags::POLLIN)];
        match poll(&mut pfd[..], 1) {
            Ok(n) if n > 0 => {}
            _ => continue,
        }

        let n = match tun.read(&mut buf) {
            Ok(n) => n,
            Err(_) => continue,
        };

        let Some((peer_quad, seg)) = wire::parse(&buf[..n]) else {
            continue;
        };
        // key connections by their local endpoint first
        let quad = peer_quad.flip();

        let mut manager = manager.lock().unwrap();
        let Manager {
            conns, bound, cfg, ..
        } = &mut *manager;

        if let Some(entry) = conns.get_mut(&quad) {
            entry.conn.segment_received(&seg);

            entry.rvar.notify_all();
            entry.wvar.notify_all();
            entry.evar.notify_all();

            if let (Some(port), false) = (entry.listen_port, entry.announced) {
                if entry.conn.established() {
                    entry.announced = true;
                    if let Some(acceptor) = bound.get_mut(&port) {
                        acceptor.ready.push(quad);
                        acceptor.cvar.notify_one();
                    }
                }
            }
        } else if seg.header.syn && !seg.header.ack && bound.contains_key(&quad.src.port) {
            // Passive open: feeding the SYN to a fresh connection makes its
            // own sender answer with the SYN/ACK on the next drain.
            let mut conn = TcpConnection::new(cfg.clone());
            conn.segment_received(&seg);
            conns.insert(quad, ConnEntry::new(conn, Some(quad.src.port)));
        } else {
            debug!(?quad, "segment for unknown connection dropped");
        }
    }
}
