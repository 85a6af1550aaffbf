use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::tcp::Quad;
use crate::{Error, Manager};

/// Blocking accept handle for a bound port.
#[derive(Debug)]
pub struct TcpListener {
    pub(crate) port: u16,
    pub(crate) manager: Arc<Mutex<Manager>>,
    pub(crate) cvar: Arc<Condvar>,
}

impl TcpListener {
    /// Block until a peer completes a handshake against this port.
    pub fn accept(&self) -> Result<TcpStream, Error> {
        let mut manager = self.manager.lock().unwrap();

        loop {
            let ready = {
                let acceptor = manager
                    .bound
                    .get_mut(&self.port)
                    .ok_or(Error::PortClosed(self.port))?;
                acceptor.ready.pop()
            };

            match ready {
                Some(quad) => match manager.conns.get(&quad) {
                    Some(entry) => {
                        return Ok(TcpStream {
                            manager: self.manager.clone(),
                            quad,
                            rvar: entry.rvar.clone(),
                            wvar: entry.wvar.clone(),
                            evar: entry.evar.clone(),
                            reset: entry.reset.clone(),
                            closed: false,
                        });
                    }
                    // the connection died between handshake and accept
                    None => continue,
                },
                None => manager = self.cvar.wait(manager).unwrap(),
            }
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let mut manager = self.manager.lock().unwrap();

        manager.bound.remove(&self.port);
    }
}

/// Blocking byte-stream handle for one connection. Reads block until data
/// or EOF, writes block until the outbound stream has room.
#[derive(Debug)]
pub struct TcpStream {
    pub(crate) manager: Arc<Mutex<Manager>>,
    pub(crate) quad: Quad,
    pub(crate) rvar: Arc<Condvar>,
    pub(crate) wvar: Arc<Condvar>,
    pub(crate) evar: Arc<Condvar>,
    pub(crate) reset: Arc<AtomicBool>,
    pub(crate) closed: bool,
}

impl TcpStream {
    /// Close the write half; the FIN follows any buffered data out. Reads
    /// keep working until the peer closes its side.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut manager = self.manager.lock().unwrap();

        if let Some(entry) = manager.conns.get_mut(&self.quad) {
            entry.conn.end_input_stream();
        }
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut manager = self.manager.lock().unwrap();

        loop {
            if self.reset.load(Ordering::Acquire) {
                return Err(Error::ConnectionReset.into());
            }

            let Some(entry) = manager.conns.get_mut(&self.quad) else {
                // finished and reaped after the last byte was drained
                return Ok(0);
            };

            let stream = entry.conn.inbound_stream_mut();
            if stream.error() {
                return Err(Error::ConnectionReset.into());
            }

            if !stream.buffer_empty() {
                let data = stream.read(buf.len());
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }

            if stream.input_ended() {
                return Ok(0);
            }

            manager = self.rvar.wait(manager).unwrap();
        }
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "Write half of the stream is closed",
            ));
        }

        let mut manager = self.manager.lock().unwrap();

        loop {
            if self.reset.load(Ordering::Acquire) {
                return Err(Error::ConnectionReset.into());
            }

            let Some(entry) = manager.conns.get_mut(&self.quad) else {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "Connection is closed",
                ));
            };

            if entry.conn.remaining_outbound_capacity() > 0 {
                return Ok(entry.conn.write(buf));
            }

            manager = self.wvar.wait(manager).unwrap();
        }
    }

    /// Block until everything written has been sent and acknowledged.
    fn flush(&mut self) -> io::Result<()> {
        let mut manager = self.manager.lock().unwrap();

        loop {
            if self.reset.load(Ordering::Acquire) {
                return Err(Error::ConnectionReset.into());
            }

            let Some(entry) = manager.conns.get(&self.quad) else {
                return Ok(());
            };

            if entry.conn.outbound_bytes_buffered() == 0 && entry.conn.bytes_in_flight() == 0 {
                return Ok(());
            }

            manager = self.wvar.wait(manager).unwrap();
        }
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.close();
    }
}
