//! Test helpers and in-memory collaborators for discovery tests
//!
//! `FakeSentinel` answers `list_masters` from a scripted reply and
//! `FakeConnector` hands out numbered handles while recording every
//! connect and close. `silent_server` and `SentinelServer` are real TCP
//! listeners for exercising the Redis collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::TransportOptions;
use crate::discovery::address::NodeAddress;
use crate::discovery::connector::NodeConnector;
use crate::discovery::querier::{QueryFailure, SentinelQuerier};
use crate::error::{Error, Result};

/// Master address `10.0.0.<n>:6379`
pub fn addr(n: u8) -> NodeAddress {
    NodeAddress::new(format!("10.0.0.{n}"), 6379)
}

/// Poll `condition` until it holds, failing the test after ~1s of tries
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Scripted sentinel behaviour
#[derive(Debug, Clone)]
pub enum Reply {
    Masters(Vec<NodeAddress>),
    /// Answer after a delay
    Delayed(Duration, Vec<NodeAddress>),
    Unreachable,
    /// Never answer
    Hang,
}

pub struct FakeSentinel {
    endpoint: NodeAddress,
    reply: Mutex<Reply>,
    call_times: Mutex<Vec<Instant>>,
    closed: AtomicBool,
    fail_close: AtomicBool,
}

impl FakeSentinel {
    pub fn new(n: u8, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            endpoint: NodeAddress::new(format!("10.0.1.{n}"), 26379),
            reply: Mutex::new(reply),
            call_times: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        })
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.call_times.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SentinelQuerier for FakeSentinel {
    fn endpoint(&self) -> &NodeAddress {
        &self.endpoint
    }

    async fn list_masters(&self) -> std::result::Result<Vec<NodeAddress>, QueryFailure> {
        self.call_times.lock().push(Instant::now());
        let reply = self.reply.lock().clone();

        match reply {
            Reply::Masters(masters) => Ok(masters),
            Reply::Delayed(delay, masters) => {
                tokio::time::sleep(delay).await;
                Ok(masters)
            }
            Reply::Unreachable => Err(QueryFailure::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: "connection refused".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Connection("sentinel close failed".to_string()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Handle produced by [`FakeConnector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeHandle {
    pub address: NodeAddress,
    pub id: u64,
}

struct Gate {
    address: NodeAddress,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[derive(Default)]
pub struct FakeConnector {
    next_id: AtomicU64,
    created: Mutex<Vec<FakeHandle>>,
    closed: Mutex<Vec<FakeHandle>>,
    close_attempts: AtomicUsize,
    refused: Mutex<HashSet<NodeAddress>>,
    failing_close: Mutex<HashSet<NodeAddress>>,
    seen_options: Mutex<Vec<TransportOptions>>,
    gate: Mutex<Option<Gate>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A handle that was never recorded as created
    pub fn handle_for(&self, address: &NodeAddress) -> FakeHandle {
        FakeHandle {
            address: address.clone(),
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Make `connect` to `address` fail
    pub fn refuse(&self, address: NodeAddress) {
        self.refused.lock().insert(address);
    }

    /// Make `close` of `address` fail
    pub fn fail_close(&self, address: NodeAddress) {
        self.failing_close.lock().insert(address);
    }

    /// Block `connect` to `address` until `release` is notified.
    ///
    /// `entered` is notified once the connect has started.
    pub fn gate(&self, address: NodeAddress) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock() = Some(Gate {
            address,
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        (entered, release)
    }

    pub fn created_addresses(&self) -> Vec<NodeAddress> {
        sorted(self.created.lock().iter().map(|h| h.address.clone()).collect())
    }

    /// Addresses whose handle closed successfully
    pub fn closed_addresses(&self) -> Vec<NodeAddress> {
        sorted(self.closed.lock().iter().map(|h| h.address.clone()).collect())
    }

    pub fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }

    pub fn seen_options(&self) -> Vec<TransportOptions> {
        self.seen_options.lock().clone()
    }
}

fn sorted(mut addresses: Vec<NodeAddress>) -> Vec<NodeAddress> {
    addresses.sort();
    addresses
}

#[async_trait]
impl NodeConnector for FakeConnector {
    type Handle = FakeHandle;

    async fn connect(&self, address: &NodeAddress, options: &TransportOptions) -> Result<FakeHandle> {
        self.seen_options.lock().push(options.clone());

        let gate = self
            .gate
            .lock()
            .as_ref()
            .filter(|gate| gate.address == *address)
            .map(|gate| (Arc::clone(&gate.entered), Arc::clone(&gate.release)));
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        if self.refused.lock().contains(address) {
            return Err(Error::Connection(format!("{address} refused")));
        }

        let handle = self.handle_for(address);
        self.created.lock().push(handle.clone());
        Ok(handle)
    }

    async fn close(&self, handle: FakeHandle) -> Result<()> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_close.lock().contains(&handle.address) {
            return Err(Error::Connection(format!("{} close failed", handle.address)));
        }

        let mut closed = self.closed.lock();
        assert!(!closed.contains(&handle), "handle {handle:?} closed twice");
        closed.push(handle);
        Ok(())
    }
}

/// Local listener that accepts connections and never sends a byte
pub async fn silent_server() -> NodeAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    NodeAddress::new("127.0.0.1", port)
}

/// Minimal RESP server standing in for a sentinel.
///
/// Answers every command with `+OK` except `SENTINEL`, which gets a
/// one-master reply. The first `silent_connections` connections never
/// answer `SENTINEL`.
pub struct SentinelServer {
    pub address: NodeAddress,
    pub master: NodeAddress,
    connections: Arc<AtomicUsize>,
}

impl SentinelServer {
    pub async fn start(silent_connections: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let master = addr(1);
        let connections = Arc::new(AtomicUsize::new(0));

        tokio::spawn({
            let connections = Arc::clone(&connections);
            let master = master.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_resp(stream, master.clone(), n < silent_connections));
                }
            }
        });

        Self {
            address: NodeAddress::new("127.0.0.1", port),
            master,
            connections,
        }
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_resp(stream: TcpStream, master: NodeAddress, silent: bool) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    while let Some(command) = read_command(&mut reader).await {
        let reply = if command.first().is_some_and(|c| c.eq_ignore_ascii_case("SENTINEL")) {
            if silent {
                continue;
            }
            masters_reply(&master)
        } else {
            "+OK\r\n".to_string()
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Read one RESP array of bulk strings; `None` on EOF or garbage
async fn read_command<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Option<Vec<String>> {
    let header = read_line(reader).await?;
    let count: usize = header.strip_prefix('*')?.parse().ok()?;

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len: usize = read_line(reader).await?.strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        parts.push(String::from_utf8(buf).ok()?);
    }
    Some(parts)
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end().to_string()),
    }
}

fn masters_reply(master: &NodeAddress) -> String {
    let fields = [
        "name".to_string(),
        "cache".to_string(),
        "ip".to_string(),
        master.host().to_string(),
        "port".to_string(),
        master.port().to_string(),
    ];
    let mut reply = format!("*1\r\n*{}\r\n", fields.len());
    for field in fields {
        reply.push_str(&format!("${}\r\n{}\r\n", field.len(), field));
    }
    reply
}
