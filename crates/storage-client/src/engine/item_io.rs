//! Item I/O engine (C7): fans a group of read/write/status/delete
//! operations against one item out across its data servers, optionally
//! guarded by a distributed lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conn_pool::{Connection, ConnectionPool};
use dist_lock::Lock;
use tracing::{debug, instrument};
use wire_protocol::{Message, MessageKind, Safety};

use crate::batch::Operation;
use crate::client::StorageClient;
use crate::engine::dispatch;
use crate::error::StorageError;
use crate::model::{Item, ItemStatus};
use crate::semantics::{Atomicity, Concurrency, Consistency, Semantics};

const STATUS_FLAG_SIZE: u32 = 0b01;
const STATUS_FLAG_MTIME: u32 = 0b10;
const STATUS_CACHE_TTL: Duration = Duration::from_secs(1);

fn send_and_receive(
    conn: &mut Connection,
    message: &Message,
    expect_reply: bool,
) -> Result<Option<Message>, StorageError> {
    message.send(conn.stream())?;
    if !expect_reply {
        return Ok(None);
    }

    let mut reply = Message::new_reply(message);
    reply.receive(conn.stream())?;
    if reply.count() != message.count() {
        return Err(wire_protocol::CodecError::SubOperationMismatch {
            request: message.count(),
            reply: reply.count(),
        }
        .into());
    }
    Ok(Some(reply))
}

/// Sends the lazy per-(item, server) `DATA_CREATE` piggy-back the first
/// time this process touches this item on this server, forcing a network
/// reply regardless of batch safety so the following write can rely on the
/// object already existing before it lands.
fn maybe_send_create(conn: &mut Connection, item: &Item, server_index: u32) -> Result<(), StorageError> {
    if !item.mark_created_if_first(server_index) {
        return Ok(());
    }
    let path = item.path();
    let mut create = Message::new(MessageKind::DataCreate, path.len() + 8);
    create.force_safety(Safety::Network);
    create.add_operation();
    create.append_string(&path);
    send_and_receive(conn, &create, true)?;
    Ok(())
}

fn maybe_lock(client: &StorageClient, semantics: &Semantics, item: &Item) -> Option<Lock> {
    if semantics.atomicity() == Atomicity::None {
        None
    } else {
        Some(Lock::new(Arc::clone(client.metadata_backend()), "locks", item.path()))
    }
}

/// One chunk's destination inside a user-supplied read buffer.
struct ReadTarget {
    buffer: Arc<Mutex<Vec<u8>>>,
    buffer_pos: usize,
    bytes_read: Arc<AtomicU64>,
}

#[instrument(skip(client, semantics, ops), fields(ops = ops.len()))]
pub fn read(client: &StorageClient, semantics: &Semantics, ops: Vec<Operation>) -> bool {
    let n = client.server_count();
    let item = match ops.first() {
        Some(Operation::ItemRead { item, .. }) => Arc::clone(item),
        _ => return ops.is_empty(),
    };

    let mut messages: Vec<Option<Message>> = (0..n).map(|_| None).collect();
    let mut targets: Vec<Vec<ReadTarget>> = (0..n).map(|_| Vec::new()).collect();
    let mut lock = maybe_lock(client, semantics, &item);

    for op in &ops {
        let Operation::ItemRead { offset, length, buffer, bytes_read, .. } = op else {
            unreachable!("read group must contain only ItemRead operations")
        };
        if *length == 0 {
            continue;
        }

        for chunk in item.distribution().reset(*length, *offset) {
            let idx = chunk.server_index as usize;
            let message = messages[idx].get_or_insert_with(|| {
                let mut m = Message::new(MessageKind::DataRead, 64);
                m.set_safety(Safety::Network);
                m.append_string(&item.path());
                m
            });
            message.add_operation();
            message.append_8(chunk.chunk_length);
            message.append_8(chunk.chunk_offset);

            targets[idx].push(ReadTarget {
                buffer: Arc::clone(buffer),
                buffer_pos: (chunk.chunk_offset - offset) as usize,
                bytes_read: Arc::clone(bytes_read),
            });

            if let Some(lock) = lock.as_mut() {
                lock.add(chunk.block_id);
            }
        }
    }

    if let Some(lock) = lock.as_mut() {
        if lock.acquire().is_err() {
            return false;
        }
    }

    let jobs: Vec<_> = messages
        .into_iter()
        .zip(targets)
        .enumerate()
        .filter_map(|(server_index, (message, targets))| message.map(|m| (server_index as u32, m, targets)))
        .map(|(server_index, message, targets)| {
            debug!(kind = ?MessageKind::DataRead, server_index, byte_length = message.body_len(), "dispatching message");
            let pool = Arc::clone(client.data_pool());
            let item = Arc::clone(&item);
            move || -> Result<(), StorageError> { run_read_worker(pool, item, server_index, message, targets) }
        })
        .collect();

    let results = dispatch(client.runner(), jobs);
    let ok = results.into_iter().all(|r| r.is_ok());

    if let Some(lock) = lock.as_mut() {
        let _ = lock.release();
    }

    ok
}

fn run_read_worker(
    pool: Arc<ConnectionPool>,
    item: Arc<Item>,
    server_index: u32,
    message: Message,
    targets: Vec<ReadTarget>,
) -> Result<(), StorageError> {
    let mut conn = pool.pop(server_index)?;
    maybe_send_create(&mut conn, &item, server_index)?;

    let mut reply = send_and_receive(&mut conn, &message, true)?.expect("DATA_READ always replies");

    for target in targets {
        let nbytes = reply.get_8()? as usize;
        if nbytes > 0 {
            let data = reply.get_n(nbytes)?;
            let mut buffer = target.buffer.lock().unwrap();
            let end = (target.buffer_pos + nbytes).min(buffer.len());
            let copy_len = end.saturating_sub(target.buffer_pos);
            buffer[target.buffer_pos..end].copy_from_slice(&data[..copy_len]);
            target.bytes_read.fetch_add(copy_len as u64, Ordering::SeqCst);
        }
    }

    pool.push(conn);
    Ok(())
}

struct WriteTarget {
    chunk_length: u64,
    bytes_written: Arc<AtomicU64>,
}

#[instrument(skip(client, semantics, ops), fields(ops = ops.len()))]
pub fn write(client: &StorageClient, semantics: &Semantics, ops: Vec<Operation>) -> bool {
    let n = client.server_count();
    let item = match ops.first() {
        Some(Operation::ItemWrite { item, .. }) => Arc::clone(item),
        _ => return ops.is_empty(),
    };

    let mut messages: Vec<Option<Message>> = (0..n).map(|_| None).collect();
    let mut targets: Vec<Vec<WriteTarget>> = (0..n).map(|_| Vec::new()).collect();
    let mut lock = maybe_lock(client, semantics, &item);

    for op in &ops {
        let Operation::ItemWrite { offset, data, bytes_written, .. } = op else {
            unreachable!("write group must contain only ItemWrite operations")
        };
        if data.is_empty() {
            continue;
        }
        let length = data.len() as u64;

        for chunk in item.distribution().reset(length, *offset) {
            let idx = chunk.server_index as usize;
            let message = messages[idx].get_or_insert_with(|| {
                let mut m = Message::new(MessageKind::DataWrite, 64);
                m.set_safety(semantics.safety());
                m.append_string(&item.path());
                m
            });

            let local_start = (chunk.chunk_offset - offset) as usize;
            let local_end = local_start + chunk.chunk_length as usize;
            let span: Arc<[u8]> = Arc::from(&data[local_start..local_end]);

            message.add_operation();
            message.append_8(chunk.chunk_length);
            message.append_8(chunk.chunk_offset);
            message.add_send_span(span);

            targets[idx].push(WriteTarget {
                chunk_length: chunk.chunk_length,
                bytes_written: Arc::clone(bytes_written),
            });

            if let Some(lock) = lock.as_mut() {
                lock.add(chunk.block_id);
            }
        }
    }

    if let Some(lock) = lock.as_mut() {
        if lock.acquire().is_err() {
            return false;
        }
    }

    let jobs: Vec<_> = messages
        .into_iter()
        .zip(targets)
        .enumerate()
        .filter_map(|(server_index, (message, targets))| message.map(|m| (server_index as u32, m, targets)))
        .map(|(server_index, message, targets)| {
            debug!(kind = ?MessageKind::DataWrite, server_index, byte_length = message.body_len(), "dispatching message");
            let pool = Arc::clone(client.data_pool());
            let item = Arc::clone(&item);
            move || -> Result<(), StorageError> { run_write_worker(pool, item, server_index, message, targets) }
        })
        .collect();

    let results = dispatch(client.runner(), jobs);
    let ok = results.into_iter().all(|r| r.is_ok());

    if let Some(lock) = lock.as_mut() {
        let _ = lock.release();
    }

    ok
}

fn run_write_worker(
    pool: Arc<ConnectionPool>,
    item: Arc<Item>,
    server_index: u32,
    message: Message,
    targets: Vec<WriteTarget>,
) -> Result<(), StorageError> {
    let mut conn = pool.pop(server_index)?;
    maybe_send_create(&mut conn, &item, server_index)?;

    let expect_reply = message.safety().requires_reply();
    let reply = send_and_receive(&mut conn, &message, expect_reply)?;

    match reply {
        Some(mut reply) => {
            for target in targets {
                let nbytes = reply.get_8()?;
                target.bytes_written.fetch_add(nbytes, Ordering::SeqCst);
            }
        }
        None => {
            // No acknowledgement was requested; credit the full chunk
            // length optimistically, matching the batch's chosen safety.
            for target in targets {
                target.bytes_written.fetch_add(target.chunk_length, Ordering::SeqCst);
            }
        }
    }

    pool.push(conn);
    Ok(())
}

#[instrument(skip(client, semantics, ops), fields(ops = ops.len()))]
pub fn get_status(client: &StorageClient, semantics: &Semantics, ops: Vec<Operation>) -> bool {
    let item = match ops.first() {
        Some(Operation::ItemGetStatus { item, .. }) => Arc::clone(item),
        _ => return ops.is_empty(),
    };

    let status = match fetch_status(client, semantics, &item) {
        Ok(status) => status,
        Err(_) => return false,
    };

    for op in &ops {
        let Operation::ItemGetStatus { out, .. } = op else {
            unreachable!("status group must contain only ItemGetStatus operations")
        };
        *out.lock().unwrap() = Some(status);
    }

    true
}

fn fetch_status(client: &StorageClient, semantics: &Semantics, item: &Arc<Item>) -> Result<ItemStatus, StorageError> {
    if semantics.consistency() != Consistency::Immediate {
        if let Some(age) = item.status_age() {
            if age < STATUS_CACHE_TTL {
                return Ok(item.status());
            }
        }
    }

    if semantics.concurrency() == Concurrency::None {
        return fetch_status_from_backend(client, item);
    }

    fetch_status_from_data_servers(client, item)
}

fn fetch_status_from_backend(client: &StorageClient, item: &Arc<Item>) -> Result<ItemStatus, StorageError> {
    let bytes = client
        .metadata_backend()
        .get("items", &item.path())?
        .ok_or_else(|| StorageError::NotFound(item.path()))?;

    let status = crate::model::Item::status_from_document(&bytes)?.unwrap_or(ItemStatus { size: 0, modification_time: 0 });
    item.refresh_status(status.size, status.modification_time);
    Ok(item.status())
}

fn fetch_status_from_data_servers(client: &StorageClient, item: &Arc<Item>) -> Result<ItemStatus, StorageError> {
    let n = client.server_count();
    let path = item.path();

    let jobs: Vec<_> = (0..n)
        .map(|server_index| {
            let pool = Arc::clone(client.data_pool());
            let item = Arc::clone(item);
            let path = path.clone();
            move || -> Result<(Option<u64>, Option<u64>), StorageError> {
                let mut conn = pool.pop(server_index)?;
                maybe_send_create(&mut conn, &item, server_index)?;

                let mut message = Message::new(MessageKind::DataStatus, path.len() + 16);
                message.set_safety(Safety::Network);
                message.add_operation();
                message.append_string(&path);
                message.append_4(STATUS_FLAG_SIZE | STATUS_FLAG_MTIME);

                let mut reply = send_and_receive(&mut conn, &message, true)?.expect("DATA_STATUS always replies");
                let mtime = Some(reply.get_8()?);
                let size = Some(reply.get_8()?);

                pool.push(conn);
                Ok((mtime, size))
            }
        })
        .collect();

    let results = dispatch(client.runner(), jobs);

    let mut total_size = 0u64;
    let mut max_mtime = 0u64;
    for result in results {
        let (mtime, size) = result?;
        if let Some(m) = mtime {
            max_mtime = max_mtime.max(m);
        }
        if let Some(s) = size {
            total_size += s;
        }
    }

    item.refresh_status(total_size, max_mtime);
    Ok(item.status())
}

/// The data-server half of item deletion: one `DATA_DELETE` message per
/// server, carrying every deleted item's path as its own sub-operation.
/// The metadata half (`engine::item_meta::delete_metadata`) runs
/// alongside this, not through this function.
#[instrument(skip(client, ops), fields(ops = ops.len()))]
pub fn delete_data(client: &StorageClient, ops: &[Operation]) -> bool {
    let n = client.server_count();
    let paths: Vec<String> = ops
        .iter()
        .map(|op| match op {
            Operation::ItemDelete { item } => item.path(),
            _ => unreachable!("delete group must contain only ItemDelete operations"),
        })
        .collect();

    if paths.is_empty() {
        return true;
    }

    let jobs: Vec<_> = (0..n)
        .map(|server_index| {
            let pool = Arc::clone(client.data_pool());
            let paths = paths.clone();
            move || -> Result<(), StorageError> {
                let mut conn = pool.pop(server_index)?;
                let mut message = Message::new(MessageKind::DataDelete, 64);
                message.set_safety(Safety::Network);
                for path in &paths {
                    message.add_operation();
                    message.append_string(path);
                }
                debug!(kind = ?MessageKind::DataDelete, server_index, byte_length = message.body_len(), "dispatching message");
                send_and_receive(&mut conn, &message, true)?;
                pool.push(conn);
                Ok(())
            }
        })
        .collect();

    dispatch(client.runner(), jobs).into_iter().all(|r| r.is_ok())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    use distribution::DistributionPolicy;
    use meta_backend::InMemoryBackend;

    use super::*;
    use crate::batch::Batch;
    use crate::config::Config;
    use crate::model::{Collection, Credentials};

    /// A byte store per item path, addressed by offset, standing in for a
    /// real data server's on-disk file.
    type Store = Arc<StdMutex<HashMap<String, Vec<u8>>>>;

    struct FakeServer {
        host: String,
        port: u16,
        create_count: Arc<AtomicUsize>,
    }

    /// Starts a loopback data server understanding PING plus the DATA_*
    /// kinds the item I/O engine sends. `bind_host` lets two fake servers
    /// share one fixed port by listening on distinct loopback addresses
    /// (127.0.0.1, 127.0.0.2, ...), matching how `ConnectionPool` is only
    /// ever given one port for every server it dials.
    fn spawn_fake_data_server(bind_host: &str, port: Option<u16>) -> FakeServer {
        let listener = TcpListener::bind((bind_host, port.unwrap_or(0))).unwrap();
        let bound = listener.local_addr().unwrap();
        let create_count = Arc::new(AtomicUsize::new(0));
        let store: Store = Arc::new(StdMutex::new(HashMap::new()));

        let counter = Arc::clone(&create_count);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let counter = Arc::clone(&counter);
                let store = Arc::clone(&store);
                thread::spawn(move || serve_connection(stream, counter, store));
            }
        });

        FakeServer { host: bound.ip().to_string(), port: bound.port(), create_count }
    }

    fn serve_connection(mut stream: TcpStream, create_count: Arc<AtomicUsize>, store: Store) {
        loop {
            let mut request = Message::new(MessageKind::Ping, 0);
            if request.receive(&mut stream).is_err() {
                return;
            }

            match request.kind() {
                MessageKind::Ping => {
                    let reply = Message::reply_to(&request, 0);
                    if reply.send(&mut stream).is_err() {
                        return;
                    }
                }
                MessageKind::DataCreate => {
                    create_count.fetch_add(1, Ordering::SeqCst);
                    let path = request.get_string().unwrap();
                    store.lock().unwrap().entry(path).or_default();
                    let mut reply = Message::reply_to(&request, 0);
                    reply.add_operation();
                    if reply.send(&mut stream).is_err() {
                        return;
                    }
                }
                MessageKind::DataWrite => {
                    let path = request.get_string().unwrap();
                    let mut acked = Vec::new();
                    for _ in 0..request.count() {
                        let length = request.get_8().unwrap() as usize;
                        let offset = request.get_8().unwrap() as usize;
                        let data = request.get_n(length).unwrap();

                        let mut store = store.lock().unwrap();
                        let buf = store.entry(path.clone()).or_default();
                        let end = offset + length;
                        if buf.len() < end {
                            buf.resize(end, 0);
                        }
                        buf[offset..end].copy_from_slice(&data);
                        acked.push(length as u64);
                    }

                    if request.safety().requires_reply() {
                        let mut reply = Message::reply_to(&request, 0);
                        for nbytes in acked {
                            reply.add_operation();
                            reply.append_8(nbytes);
                        }
                        if reply.send(&mut stream).is_err() {
                            return;
                        }
                    }
                }
                MessageKind::DataRead => {
                    let path = request.get_string().unwrap();
                    let mut slices = Vec::new();
                    for _ in 0..request.count() {
                        let length = request.get_8().unwrap() as usize;
                        let offset = request.get_8().unwrap() as usize;
                        let store = store.lock().unwrap();
                        let buf = store.get(&path).cloned().unwrap_or_default();
                        let end = (offset + length).min(buf.len());
                        let slice = if offset < buf.len() { buf[offset..end].to_vec() } else { Vec::new() };
                        slices.push(slice);
                    }

                    let mut reply = Message::reply_to(&request, 0);
                    for slice in slices {
                        reply.add_operation();
                        reply.append_8(slice.len() as u64);
                        reply.append_bytes(&slice);
                    }
                    if reply.send(&mut stream).is_err() {
                        return;
                    }
                }
                MessageKind::DataStatus | MessageKind::DataDelete | MessageKind::MetaGet => {
                    return;
                }
            }
        }
    }

    /// Builds a two-data-server client backed by fake servers sharing one
    /// port across two distinct loopback addresses.
    fn two_server_client() -> (StorageClient, FakeServer, FakeServer) {
        let server0 = spawn_fake_data_server("127.0.0.1", None);
        let server1 = spawn_fake_data_server("127.0.0.2", Some(server0.port));

        let config = Config {
            data_servers: vec![server0.host.clone(), server1.host.clone()],
            metadata_servers: vec!["127.0.0.1".to_string()],
            max_connections: 2,
            block_size: 4,
            default_distribution: DistributionPolicy::round_robin(4),
        };
        let pool = Arc::new(ConnectionPool::new(
            vec![server0.host.clone(), server1.host.clone()],
            2,
            server0.port,
        ));
        let client = StorageClient::new_with_pool(config, Arc::new(InMemoryBackend::new()), pool);
        (client, server0, server1)
    }

    #[test]
    fn write_then_read_round_trips_the_same_bytes() {
        let (client, ..) = two_server_client();
        let collection = Collection::new("photos").unwrap();
        let item = client.new_item(Arc::clone(&collection), "cat.png", Credentials::none()).unwrap();

        let payload = b"hello there, world!".to_vec();

        let mut write_batch = Batch::new(Semantics::default());
        let bytes_written = write_batch.write_item(Arc::clone(&item), 0, payload.clone());
        assert!(write_batch.execute(&client));
        assert_eq!(bytes_written.load(Ordering::SeqCst), payload.len() as u64);

        let mut read_batch = Batch::new(Semantics::default());
        let (buffer, bytes_read) = read_batch.read_item(Arc::clone(&item), 0, payload.len() as u64);
        assert!(read_batch.execute(&client));

        assert_eq!(bytes_read.load(Ordering::SeqCst), payload.len() as u64);
        assert_eq!(*buffer.lock().unwrap(), payload);
    }

    #[test]
    fn create_is_sent_at_most_once_per_server_for_an_item() {
        let (client, server0, server1) = two_server_client();
        let collection = Collection::new("photos").unwrap();
        let item = client.new_item(Arc::clone(&collection), "dog.png", Credentials::none()).unwrap();

        // Two separate batches touching both servers (distribution with
        // B=4 round-robin over 2 servers spreads an 8-byte write across
        // both); the second write must not re-send DATA_CREATE.
        for _ in 0..2 {
            let mut batch = Batch::new(Semantics::default());
            batch.write_item(Arc::clone(&item), 0, b"12345678".to_vec());
            assert!(batch.execute(&client));
        }

        assert_eq!(server0.create_count.load(Ordering::SeqCst), 1);
        assert_eq!(server1.create_count.load(Ordering::SeqCst), 1);
    }
}
