//! Measurement channels.
//!
//! A channel is one ordered delivery path to one collection endpoint. Any
//! number of producer threads push already-formatted lines into an unbounded
//! queue; a single worker thread owns the transport and is the only writer.
//!
//! Worker states:
//!
//! ```text
//! Connecting --first message--> Connected{header_sent: false} -> Connected{header_sent: true}
//!        ^                                  | write failure
//!        |                                  v
//!        +------ Reconnecting{attempt} <- Disconnected
//!
//! any state -> Closed (after the shutdown marker has been drained)
//! ```
//!
//! Every connection instance starts with the protocol header followed by
//! every schema definition written so far, so a collector that only sees the
//! new connection can still interpret the rows that follow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use oml_types::{METADATA_SCHEMA_COLUMNS, METADATA_SCHEMA_INDEX, METADATA_SCHEMA_NAME};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport};

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Name of the channel every domain gets unless told otherwise.
pub const DEFAULT_CHANNEL: &str = "default";

/// An item in a channel's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A schema-definition row. Replayed in the header after a reconnect.
    Schema(String),
    /// A data or metadata row.
    Data(String),
    /// End of stream. Nothing queued after it is delivered.
    Shutdown,
}

impl Message {
    fn line(&self) -> Option<&str> {
        match self {
            Message::Schema(line) | Message::Data(line) => Some(line),
            Message::Shutdown => None,
        }
    }
}

/// Identity fields sent at the start of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub protocol: u32,
    pub domain: String,
    pub start_time: SystemTime,
    pub sender_id: String,
    pub app_name: String,
}

impl ProtocolHeader {
    /// Header lines, ending with the blank separator line.
    pub fn lines(&self) -> Vec<String> {
        let start = self
            .start_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        vec![
            format!("protocol: {}", self.protocol),
            "content: text".to_string(),
            format!("domain: {}", self.domain),
            format!("start-time: {}", start),
            format!("sender-id: {}", self.sender_id),
            format!("app-name: {}", self.app_name),
            format!(
                "schema: {} {} {}",
                METADATA_SCHEMA_INDEX, METADATA_SCHEMA_NAME, METADATA_SCHEMA_COLUMNS
            ),
            String::new(),
        ]
    }

    /// Full header text including replayed schema rows.
    pub fn render(&self, schemas: &[String]) -> String {
        let mut lines = self.lines();
        lines.extend(schemas.iter().cloned());
        lines.join("\n")
    }
}

/// Back-off between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl ReconnectPolicy {
    /// Retry forever with a fixed delay.
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before the given (1-based) attempt.
    pub fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

/// Worker-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Started without a connection; the first delivery connects.
    Connecting,
    Disconnected,
    Connected { header_sent: bool },
    Reconnecting { attempt: u32 },
    Closed,
}

/// One ordered, independently reconnecting delivery path.
///
/// Dropping a channel closes it.
pub struct Channel {
    name: String,
    destination: String,
    tx: Sender<Message>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Channel {
    /// Open the transport and start the worker.
    ///
    /// The first connection is made synchronously so that a bad or
    /// unreachable URI is reported here rather than retried forever.
    pub fn open(
        name: impl Into<String>,
        mut connector: Box<dyn Connector>,
        header: ProtocolHeader,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        let name = name.into();
        let transport = connector.connect()?;
        info!(channel = %name, uri = %connector.describe(), "channel connected");
        Self::start(name, connector, header, policy, Some(transport))
    }

    /// Start the worker without connecting.
    ///
    /// The worker connects when the first message arrives and treats a
    /// failure like a lost connection, so pushing never waits on I/O and
    /// transport errors stay with the worker.
    pub fn spawn(
        name: impl Into<String>,
        connector: Box<dyn Connector>,
        header: ProtocolHeader,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        Self::start(name.into(), connector, header, policy, None)
    }

    fn start(
        name: String,
        connector: Box<dyn Connector>,
        header: ProtocolHeader,
        policy: ReconnectPolicy,
        transport: Option<Box<dyn Transport>>,
    ) -> Result<Self> {
        let destination = connector.describe();
        let state = match transport {
            Some(_) => ChannelState::Connected { header_sent: false },
            None => ChannelState::Connecting,
        };
        let (tx, rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();

        let worker = Worker {
            name: name.clone(),
            destination: destination.clone(),
            connector,
            header,
            policy,
            rx,
            shutdown_rx,
            closing: false,
            state,
            transport,
            schemas: Vec::new(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("oml-channel-{}", name))
            .spawn(move || worker.run())?;

        Ok(Self {
            name,
            destination,
            tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue a message. Never blocks on I/O; ignored once the channel is closed.
    pub fn push(&self, message: Message) {
        if self.closed.load(Ordering::Acquire) {
            debug!(channel = %self.name, "dropping message pushed after close");
            return;
        }
        if self.tx.send(message).is_err() {
            debug!(channel = %self.name, "channel worker is gone");
        }
    }

    /// Number of messages waiting for the worker.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destination description (the collection URI).
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Check if `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drain everything queued so far, then stop the worker.
    ///
    /// Blocks until the worker exits. Safe to call more than once and from
    /// several threads; only the first call waits.
    pub fn close(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        self.closed.store(true, Ordering::Release);
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(());
        }
        if handle.join().is_err() {
            warn!(channel = %self.name, "channel worker panicked");
        }
        info!(channel = %self.name, uri = %self.destination, "channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The consumer side of a channel. Sole owner of the transport.
struct Worker {
    name: String,
    destination: String,
    connector: Box<dyn Connector>,
    header: ProtocolHeader,
    policy: ReconnectPolicy,
    rx: Receiver<Message>,
    shutdown_rx: Receiver<()>,
    /// Set once the shutdown signal has been seen during a back-off.
    closing: bool,
    state: ChannelState,
    transport: Option<Box<dyn Transport>>,
    /// Schema rows handed to a transport so far, in announcement order.
    schemas: Vec<String>,
}

impl Worker {
    fn run(mut self) {
        loop {
            let first = match self.rx.recv() {
                Ok(Message::Shutdown) | Err(_) => break,
                Ok(message) => message,
            };

            let (batch, end_of_stream) = self.drain_after(first);
            if !self.deliver(&batch) {
                let dropped = batch.len() + self.rx.len();
                warn!(
                    channel = %self.name,
                    uri = %self.destination,
                    dropped,
                    "giving up on undelivered messages while closing"
                );
                break;
            }
            if end_of_stream {
                break;
            }
        }
        self.shutdown_transport();
    }

    /// Collect `first` and everything already queued behind it, stopping at
    /// the shutdown marker.
    fn drain_after(&self, first: Message) -> (Vec<Message>, bool) {
        let mut batch = vec![first];
        loop {
            match self.rx.try_recv() {
                Ok(Message::Shutdown) => return (batch, true),
                Ok(message) => batch.push(message),
                Err(TryRecvError::Empty) => return (batch, false),
                Err(TryRecvError::Disconnected) => return (batch, true),
            }
        }
    }

    /// Write a batch, reconnecting as often as needed.
    ///
    /// Returns false only if the channel is closing and the endpoint stays
    /// unreachable.
    fn deliver(&mut self, batch: &[Message]) -> bool {
        let text = batch
            .iter()
            .filter_map(Message::line)
            .collect::<Vec<_>>()
            .join("\n");

        loop {
            match self.state {
                ChannelState::Connected { header_sent: false } => {
                    let header = self.header.render(&self.schemas);
                    match self.write(&header) {
                        Ok(()) => self.state = ChannelState::Connected { header_sent: true },
                        Err(e) => self.connection_lost(e),
                    }
                }
                ChannelState::Connected { header_sent: true } => match self.write(&text) {
                    Ok(()) => {
                        self.schemas.extend(batch.iter().filter_map(|m| match m {
                            Message::Schema(line) => Some(line.clone()),
                            _ => None,
                        }));
                        return true;
                    }
                    Err(e) => self.connection_lost(e),
                },
                ChannelState::Connecting => match self.connector.connect() {
                    Ok(transport) => {
                        info!(channel = %self.name, uri = %self.destination, "channel connected");
                        self.transport = Some(transport);
                        self.state = ChannelState::Connected { header_sent: false };
                    }
                    Err(e) => {
                        warn!(channel = %self.name, uri = %self.destination, error = %e, "connect failed, retrying");
                        self.state = ChannelState::Disconnected;
                    }
                },
                ChannelState::Disconnected | ChannelState::Reconnecting { .. } => {
                    if !self.reconnect() {
                        return false;
                    }
                }
                ChannelState::Closed => return false,
            }
        }
    }

    fn write(&mut self, text: &str) -> std::io::Result<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.write_line(text),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no transport",
            )),
        }
    }

    fn connection_lost(&mut self, err: std::io::Error) {
        warn!(channel = %self.name, uri = %self.destination, error = %err, "write failed, reconnecting");
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close();
        }
        self.state = ChannelState::Disconnected;
    }

    /// Retry until connected.
    ///
    /// A close request cuts the current back-off short and triggers an
    /// attempt right away. After that the worker waits at most one more
    /// back-off period for the endpoint before giving up.
    fn reconnect(&mut self) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.state = ChannelState::Reconnecting { attempt };
            let delay = self.policy.delay(attempt);

            let last_attempt = if self.closing {
                std::thread::sleep(delay);
                true
            } else {
                self.closing = matches!(
                    self.shutdown_rx.recv_timeout(delay),
                    Ok(()) | Err(RecvTimeoutError::Disconnected)
                );
                false
            };

            info!(channel = %self.name, uri = %self.destination, attempt, "trying to reconnect");
            match self.connector.connect() {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.state = ChannelState::Connected { header_sent: false };
                    info!(channel = %self.name, uri = %self.destination, "reconnected");
                    return true;
                }
                Err(Error::Connection { source, .. }) if !last_attempt => {
                    warn!(channel = %self.name, uri = %self.destination, error = %source, "reconnect failed");
                }
                Err(e) if !last_attempt => {
                    warn!(channel = %self.name, uri = %self.destination, error = %e, "reconnect failed");
                }
                Err(_) => {
                    self.state = ChannelState::Closed;
                    return false;
                }
            }
        }
    }

    fn shutdown_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!(channel = %self.name, error = %e, "error while closing transport");
            }
        }
        self.state = ChannelState::Closed;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    const HEADER_LINES: usize = 8;

    fn data_lines(sink: &Sink) -> Vec<String> {
        sink.lines()
            .into_iter()
            .filter(|l| l.starts_with("row"))
            .collect()
    }

    #[test]
    fn header_layout() {
        let lines = header().lines();
        assert_eq!(
            lines,
            vec![
                "protocol: 4",
                "content: text",
                "domain: foo",
                "start-time: 1700000000",
                "sender-id: n1",
                "app-name: demo",
                "schema: 0 _experiment_metadata subject:string key:string value:string",
                "",
            ]
        );
        assert_eq!(lines.len(), HEADER_LINES);
    }

    #[test]
    fn header_precedes_data_and_order_is_kept() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(10));
        for i in 0..100 {
            channel.push(Message::Data(format!("row{}", i)));
        }
        channel.close();

        let sink = connector.sink.lock();
        let lines = sink.lines();
        assert_eq!(lines[0], "protocol: 4");
        assert_eq!(lines[HEADER_LINES - 1], "");
        let expected: Vec<String> = (0..100).map(|i| format!("row{}", i)).collect();
        assert_eq!(data_lines(&sink), expected);
        assert_eq!(sink.connections, 1);
    }

    #[test]
    fn empty_channel_writes_nothing() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(10));
        channel.close();
        assert!(connector.sink.lock().writes.is_empty());
    }

    #[test]
    fn close_is_idempotent_and_drops_late_pushes() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(10));
        channel.push(Message::Data("row-before".into()));
        channel.close();
        channel.close();
        channel.push(Message::Data("row-after".into()));

        let sink = connector.sink.lock();
        assert_eq!(data_lines(&sink), vec!["row-before"]);
        assert!(channel.is_closed());
    }

    #[test]
    fn failed_write_reconnects_and_replays_schemas() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(20));

        channel.push(Message::Schema("schema-row-1".into()));
        channel.push(Message::Data("row1".into()));
        // wait until the first batch is on the wire
        wait_for(|| connector.sink.lock().lines().iter().any(|l| l == "row1"));

        connector.sink.lock().fail_writes = 1;
        let started = Instant::now();
        channel.push(Message::Data("row2".into()));
        wait_for(|| connector.sink.lock().connections == 2);
        assert!(started.elapsed() >= Duration::from_millis(20), "no back-off");

        channel.push(Message::Data("row3".into()));
        channel.close();

        let sink = connector.sink.lock();
        let lines = sink.lines();
        let headers: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| *l == "protocol: 4")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(headers.len(), 2);

        // second header replays the schema before any row
        let second = &lines[headers[1]..];
        assert_eq!(second[HEADER_LINES], "schema-row-1");
        assert_eq!(&second[HEADER_LINES + 1..], &["row2", "row3"]);
        assert_eq!(data_lines(&sink), vec!["row1", "row2", "row3"]);
    }

    #[test]
    fn failed_header_write_is_retried() {
        let connector = MemoryConnector::default();
        connector.sink.lock().fail_writes = 1;
        let channel = open(&connector, Duration::from_millis(5));
        channel.push(Message::Data("row1".into()));
        channel.close();

        let sink = connector.sink.lock();
        assert_eq!(sink.connections, 2);
        assert_eq!(sink.lines()[0], "protocol: 4");
        assert_eq!(data_lines(&sink), vec!["row1"]);
    }

    #[test]
    fn unannounced_schema_in_failed_batch_is_sent_once() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(5));
        channel.push(Message::Data("row0".into()));
        wait_for(|| connector.sink.lock().lines().iter().any(|l| l == "row0"));

        connector.sink.lock().fail_writes = 1;
        channel.push(Message::Schema("schema-row-1".into()));
        channel.push(Message::Data("row1".into()));
        channel.close();

        let sink = connector.sink.lock();
        let count = sink.lines().iter().filter(|l| *l == "schema-row-1").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn retries_until_the_endpoint_comes_back() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(5));
        {
            let mut sink = connector.sink.lock();
            sink.fail_writes = 1;
            sink.fail_connects = 3;
        }
        channel.push(Message::Data("row1".into()));
        wait_for(|| connector.sink.lock().connections == 2);
        channel.close();

        assert_eq!(data_lines(&connector.sink.lock()), vec!["row1"]);
    }

    #[test]
    fn close_during_outage_does_not_hang() {
        let connector = MemoryConnector::default();
        let channel = open(&connector, Duration::from_millis(50));
        {
            let mut sink = connector.sink.lock();
            sink.fail_writes = 1;
            sink.refuse = true;
        }
        channel.push(Message::Data("row1".into()));

        let started = Instant::now();
        channel.close();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(data_lines(&connector.sink.lock()).is_empty());
    }

    #[test]
    fn close_waits_one_back_off_for_the_endpoint() {
        let connector = MemoryConnector::default();
        let channel = Arc::new(open(&connector, Duration::from_millis(300)));
        {
            let mut sink = connector.sink.lock();
            sink.fail_writes = 1;
            sink.refuse = true;
        }
        channel.push(Message::Data("row1".into()));
        channel.push(Message::Data("row2".into()));
        // the worker is backing off once the failed write is consumed
        wait_for(|| connector.sink.lock().fail_writes == 0);

        let closer = {
            let channel = channel.clone();
            std::thread::spawn(move || channel.close())
        };
        std::thread::sleep(Duration::from_millis(50));
        connector.sink.lock().refuse = false;
        closer.join().unwrap();

        assert_eq!(data_lines(&connector.sink.lock()), vec!["row1", "row2"]);
    }

    #[test]
    fn spawned_channel_connects_on_first_message() {
        let connector = MemoryConnector::default();
        connector.sink.lock().refuse = true;
        let channel = Channel::spawn(
            "test",
            Box::new(connector.clone()),
            header(),
            ReconnectPolicy::fixed(Duration::from_millis(5)),
        )
        .unwrap();
        assert_eq!(connector.sink.lock().connections, 0);

        channel.push(Message::Data("row1".into()));
        std::thread::sleep(Duration::from_millis(20));
        connector.sink.lock().refuse = false;
        wait_for(|| connector.sink.lock().connections == 1);
        channel.close();

        let sink = connector.sink.lock();
        assert_eq!(sink.lines()[0], "protocol: 4");
        assert_eq!(data_lines(&sink), vec!["row1"]);
    }

    #[test]
    fn idle_spawned_channel_never_connects() {
        let connector = MemoryConnector::default();
        let channel = Channel::spawn(
            "test",
            Box::new(connector.clone()),
            header(),
            ReconnectPolicy::default(),
        )
        .unwrap();
        channel.close();
        assert_eq!(connector.sink.lock().connections, 0);
    }

    #[test]
    fn open_fails_for_unreachable_endpoint() {
        let connector = MemoryConnector::default();
        connector.sink.lock().refuse = true;
        let result = Channel::open(
            "test",
            Box::new(connector.clone()),
            header(),
            ReconnectPolicy::default(),
        );
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let connector = MemoryConnector::default();
        let channel = Arc::new(open(&connector, Duration::from_millis(5)));

        let producers: Vec<_> = (0..8)
            .map(|p| {
                let channel = channel.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        channel.push(Message::Data(format!("row-{}-{}", p, i)));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        channel.close();

        let sink = connector.sink.lock();
        let rows = data_lines(&sink);
        assert_eq!(rows.len(), 8 * 500);
        // per-producer order is preserved
        for p in 0..8 {
            let prefix = format!("row-{}-", p);
            let seen: Vec<usize> = rows
                .iter()
                .filter_map(|r| r.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn policy_delay_is_fixed() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(7));
        assert_eq!(policy.delay(1), Duration::from_millis(7));
        assert_eq!(policy.delay(100), Duration::from_millis(7));
        assert_eq!(ReconnectPolicy::default().delay(1), DEFAULT_RECONNECT_DELAY);
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
