//! Per-server bounded connection pools with lazy connect-and-handshake.
//!
//! Each server gets its own queue of idle connections plus an atomic count
//! of connections currently outstanding (idle or checked out). A `pop`
//! first tries the idle queue; if it's empty and the server is still under
//! its connection limit, a fresh connection is dialed and PING-handshaken;
//! once the limit is reached, `pop` blocks on the idle queue until some
//! other caller pushes a connection back. Connections are never closed
//! proactively — only dropped when the pool itself is torn down.

mod error;

use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
pub use error::PoolError;
use tracing::{debug, instrument};
use wire_protocol::{Message, MessageKind, Safety};

/// The wire protocol's fixed port. The pool owns appending this to a
/// bare host, the same way the server list it's given is host-only.
pub const DEFAULT_PORT: u16 = 4711;

/// A checked-out connection to one server. Returning it to the pool is the
/// caller's responsibility via [`ConnectionPool::push`]; dropping it
/// instead simply closes the socket and frees its slot in the outstanding
/// count — the pool notices on the next `pop` for that server.
pub struct Connection {
    stream: TcpStream,
    server_index: u32,
}

impl Connection {
    pub fn server_index(&self) -> u32 {
        self.server_index
    }

    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

struct ServerSlot {
    address: String,
    max_connections: usize,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    outstanding: AtomicUsize,
}

/// A collection of per-server connection pools, e.g. one `ConnectionPool`
/// for the data servers and a second, separate instance for the metadata
/// servers.
pub struct ConnectionPool {
    servers: Vec<ServerSlot>,
    port: u16,
}

impl ConnectionPool {
    /// `addresses[i]` is the bare host (no port) for server index `i`;
    /// the pool appends `port` to it itself on every dial, the same way
    /// the wire protocol fixes the port rather than leaving it to
    /// whatever string configuration happens to supply. Every server
    /// shares the same `max_connections` ceiling.
    pub fn new(addresses: Vec<String>, max_connections: usize, port: u16) -> Self {
        let max_connections = max_connections.max(1);
        let servers = addresses
            .into_iter()
            .map(|address| {
                let (idle_tx, idle_rx) = crossbeam_channel::bounded(max_connections);
                ServerSlot {
                    address,
                    max_connections,
                    idle_tx,
                    idle_rx,
                    outstanding: AtomicUsize::new(0),
                }
            })
            .collect();

        Self { servers, port }
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Checks out a connection to `server_index`, reusing an idle one if
    /// available, dialing a new one if the server is under its connection
    /// limit, or blocking for one to be returned otherwise.
    #[instrument(skip(self))]
    pub fn pop(&self, server_index: u32) -> Result<Connection, PoolError> {
        let slot = self
            .servers
            .get(server_index as usize)
            .ok_or(PoolError::UnknownServer(server_index))?;

        if let Ok(conn) = slot.idle_rx.try_recv() {
            debug!(server_index, "reused idle connection");
            return Ok(conn);
        }

        loop {
            let current = slot.outstanding.load(Ordering::SeqCst);
            if current >= slot.max_connections {
                debug!(server_index, "pool at capacity, blocking for a return");
                return slot.idle_rx.recv().map_err(|_| PoolError::Closed);
            }

            if slot
                .outstanding
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                match connect_and_handshake(&slot.address, self.port, server_index) {
                    Ok(conn) => {
                        debug!(server_index, address = %slot.address, "dialed new connection");
                        return Ok(conn);
                    }
                    Err(err) => {
                        slot.outstanding.fetch_sub(1, Ordering::SeqCst);
                        return Err(err);
                    }
                }
            }
            // Lost the race to claim a slot; re-read and try again.
        }
    }

    /// Returns a connection to its server's idle queue for reuse. Never
    /// fails: a full queue would mean more connections are idle than were
    /// ever handed out, which would be an invariant violation upstream.
    #[instrument(skip(self, conn), fields(server_index = conn.server_index))]
    pub fn push(&self, conn: Connection) {
        let index = conn.server_index as usize;
        if let Some(slot) = self.servers.get(index) {
            debug!(server_index = index, "returning connection to idle queue");
            let _ = slot.idle_tx.send(conn);
        }
    }
}

fn connect_and_handshake(host: &str, port: u16, server_index: u32) -> Result<Connection, PoolError> {
    let address = format!("{host}:{port}");
    let mut stream = TcpStream::connect(&address).map_err(|source| PoolError::Connect {
        address: address.clone(),
        source,
    })?;
    stream.set_nodelay(true).map_err(|source| PoolError::Connect {
        address: address.clone(),
        source,
    })?;

    let mut ping = Message::new(MessageKind::Ping, 0);
    ping.set_safety(Safety::Network);
    ping.send(&mut stream).map_err(|source| PoolError::Handshake {
        address: address.to_string(),
        source,
    })?;

    let mut reply = Message::new_reply(&ping);
    reply.receive(&mut stream).map_err(|source| PoolError::Handshake {
        address: address.to_string(),
        source,
    })?;

    Ok(Connection { stream, server_index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Starts a loopback listener that answers every PING with a reply and
    /// keeps accepting connections until the test drops the returned
    /// listener address's owning thread (i.e. process exit). Returns the
    /// bare host and the ephemeral port it bound, since a real pool always
    /// appends its own port rather than trusting one embedded in the host
    /// string.
    fn spawn_echo_server() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                thread::spawn(move || {
                    let mut request = Message::new(MessageKind::Ping, 0);
                    if request.receive(&mut stream).is_err() {
                        return;
                    }
                    let mut reply = Message::reply_to(&request, 0);
                    reply.set_safety(Safety::Network);
                    let _ = reply.send(&mut stream);
                    // keep the connection open for pooling; idle read to
                    // detect when the test drops it.
                    let mut buf = [0u8; 1];
                    let _ = stream.read(&mut buf);
                });
            }
        });

        ("127.0.0.1".to_string(), port)
    }

    #[test]
    fn pop_dials_and_handshakes_a_fresh_connection() {
        let (host, port) = spawn_echo_server();
        let pool = ConnectionPool::new(vec![host], 2, port);

        let conn = pool.pop(0).unwrap();
        assert_eq!(conn.server_index(), 0);
    }

    #[test]
    fn pushed_connection_is_reused_without_redialing() {
        let (host, port) = spawn_echo_server();
        let pool = ConnectionPool::new(vec![host], 1, port);

        let conn = pool.pop(0).unwrap();
        pool.push(conn);

        // A second pop must come from the idle queue, not a second dial,
        // since max_connections is 1 and the first connection now lives in
        // the queue rather than being dropped.
        let reused = pool.pop(0).unwrap();
        assert_eq!(reused.server_index(), 0);
    }

    #[test]
    fn pop_blocks_until_a_connection_is_returned_at_capacity() {
        let (host, port) = spawn_echo_server();
        let pool = std::sync::Arc::new(ConnectionPool::new(vec![host], 1, port));

        let held = pool.pop(0).unwrap();

        let pool2 = std::sync::Arc::clone(&pool);
        let waiter = thread::spawn(move || pool2.pop(0).unwrap());

        // Give the waiter a moment to block on the idle queue, then return
        // the held connection; the waiter must unblock with it.
        thread::sleep(std::time::Duration::from_millis(50));
        pool.push(held);

        let got = waiter.join().unwrap();
        assert_eq!(got.server_index(), 0);
    }

    #[test]
    fn unknown_server_index_is_reported() {
        let pool = ConnectionPool::new(vec![], 1, DEFAULT_PORT);
        assert!(matches!(pool.pop(0), Err(PoolError::UnknownServer(0))));
    }
}
