//! TCP client for the gateway's interval-bar socket.
//!
//! [`FeedConnection`] owns the socket. Its write half sits behind one async
//! mutex so commands never interleave; the read half moves into a spawned
//! reader task together with a [`FeedProcessor`] that frames, decodes, updates
//! health, fans out to listeners and pushes onto the event queue, in that order.

use barfeed_metadata::GatewayConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::error::FeedError;
use crate::framer::{encode_latin1, LineFramer};
use crate::health::{ConnectionHealth, ConnectionState, FeedHealth};
use crate::listener::{FeedListener, ListenerSet};
use crate::message::{FeedEvent, RawMessage};
use crate::metrics::FeedMetrics;
use crate::queue::EventSender;
use crate::watch::{
    check_symbol, unwatch_command, WatchRequest, DISCONNECT, REQUEST_WATCHES, UNWATCH_ALL,
};

const READ_BUF_SIZE: usize = 64 * 1024;
const CONNECT_COMMAND: &str = "S,CONNECT\r\n";

fn set_protocol_command(version: &str) -> String {
    format!("S,SET PROTOCOL,{}\r\n", version)
}

fn set_client_name_command(name: &str) -> String {
    format!("S,SET CLIENT NAME,{}\r\n", name)
}

/// Everything the reader does with bytes once they are off the socket
pub struct FeedProcessor {
    name: String,
    protocol: String,
    framer: LineFramer,
    dispatcher: Dispatcher,
    health: Arc<FeedHealth>,
    listeners: Arc<ListenerSet>,
    queue: Option<EventSender>,
    metrics: FeedMetrics,
}

impl FeedProcessor {
    pub fn new(
        name: impl Into<String>,
        protocol: impl Into<String>,
        dispatcher: Dispatcher,
        health: Arc<FeedHealth>,
        listeners: Arc<ListenerSet>,
    ) -> Self {
        let name = name.into();
        Self {
            metrics: FeedMetrics::new(name.clone()),
            name,
            protocol: protocol.into(),
            framer: LineFramer::new(),
            dispatcher,
            health,
            listeners,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: EventSender) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Feed raw socket bytes; returns the number of complete lines handled.
    ///
    /// Stops at the first fatal error, leaving later lines unprocessed.
    pub async fn feed(&mut self, bytes: &[u8]) -> Result<usize, FeedError> {
        self.framer.feed(bytes);
        let mut handled = 0;
        while let Some(line) = self.framer.next_message() {
            self.process_line(&line).await?;
            handled += 1;
        }
        Ok(handled)
    }

    pub async fn process_line(&self, line: &str) -> Result<(), FeedError> {
        let msg = RawMessage::parse(line);
        self.metrics.inc_message(msg.primary_key());

        let event = match self.dispatcher.dispatch(&msg) {
            Ok(event) => event,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(feed = %self.name, error = %e, line = %line, "Dropping record");
                self.metrics.inc_decode_failure();
                return Ok(());
            }
        };

        let event = self.apply(event)?;
        trace!(feed = %self.name, event = event.label(), "Decoded");
        self.listeners.notify(&event);

        if let Some(queue) = &self.queue {
            queue.push(event).await?;
            self.metrics.set_queue_in_flight(queue.in_flight());
        }
        Ok(())
    }

    /// Protocol check and health transitions, before any listener sees the event
    fn apply(&self, event: FeedEvent) -> Result<FeedEvent, FeedError> {
        match event {
            FeedEvent::CurrentProtocol(ref actual) => {
                if *actual != self.protocol {
                    return Err(FeedError::ProtocolVersionMismatch {
                        conn: self.name.clone(),
                        expected: self.protocol.clone(),
                        actual: actual.clone(),
                    });
                }
                debug!(feed = %self.name, protocol = %actual, "Protocol confirmed");
            }
            FeedEvent::ServerConnected => {
                self.health.mark_connected();
                info!(feed = %self.name, "Feed is fresh");
            }
            FeedEvent::ServerDisconnected => {
                self.health.mark_stale();
                warn!(feed = %self.name, "Feed is stale");
            }
            FeedEvent::ReconnectFailed => {
                self.health.mark_reconnect_failed();
                self.metrics.set_reconnect_failed();
                error!(feed = %self.name, "Gateway failed to reconnect to its upstream");
            }
            FeedEvent::Stats(mut stats) => {
                if !self.health.is_connected() {
                    stats.market_time = None;
                }
                return Ok(FeedEvent::Stats(stats));
            }
            FeedEvent::Bar { kind, .. } => self.metrics.inc_bar(kind),
            _ => {}
        }
        self.metrics.set_health(self.health.health());
        Ok(event)
    }

    /// Bytes held back waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.framer.pending()
    }
}

struct Reader {
    name: String,
    read_half: OwnedReadHalf,
    processor: FeedProcessor,
    read_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    health: Arc<FeedHealth>,
}

impl Reader {
    async fn run(mut self) -> Result<(), FeedError> {
        let mut buf = vec![0u8; READ_BUF_SIZE];

        let result = loop {
            if *self.shutdown.borrow() {
                break Ok(());
            }

            let read = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                read = timeout(self.read_timeout, self.read_half.read(&mut buf)) => read,
            };

            match read {
                // nothing arrived within the bounded wait
                Err(_) => continue,
                Ok(Ok(0)) => {
                    break Err(FeedError::transport(&self.name, "connection closed by gateway"));
                }
                Ok(Ok(n)) => {
                    if let Err(e) = self.processor.feed(&buf[..n]).await {
                        break Err(e);
                    }
                }
                Ok(Err(e)) => break Err(FeedError::transport(&self.name, e)),
            }
        };

        match &result {
            Ok(()) => info!(feed = %self.name, "Reader stopped"),
            Err(e) => {
                error!(feed = %self.name, error = %e, "Reader terminated");
                self.health.mark_disconnected();
                self.health.set_state(ConnectionState::Closed);
            }
        }
        result
    }
}

/// Client connection to the gateway.
///
/// Health follows what the gateway reports about its upstream source and falls
/// back to `Disconnected` once the socket is gone. After a transport or
/// protocol fault the reader exits and the caller decides whether to
/// [`FeedConnection::connect`] again.
pub struct FeedConnection {
    name: String,
    config: GatewayConfig,
    health: Arc<FeedHealth>,
    listeners: Arc<ListenerSet>,
    queue: Option<EventSender>,
    metrics: FeedMetrics,
    writer: Mutex<Option<OwnedWriteHalf>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reader: Option<JoinHandle<Result<(), FeedError>>>,
}

impl FeedConnection {
    pub fn new(name: impl Into<String>, config: GatewayConfig) -> Self {
        let name = name.into();
        Self {
            metrics: FeedMetrics::new(name.clone()),
            name,
            config,
            health: Arc::new(FeedHealth::new()),
            listeners: Arc::new(ListenerSet::new()),
            queue: None,
            writer: Mutex::new(None),
            shutdown_tx: None,
            reader: None,
        }
    }

    /// Push every accepted event onto `queue` after listener fan-out
    pub fn with_queue(mut self, queue: EventSender) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_name(&self) -> &str {
        &self.config.client_name
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.health()
    }

    /// Shared handle for the health server
    pub fn health_handle(&self) -> Arc<FeedHealth> {
        self.health.clone()
    }

    /// Whether the gateway says its upstream source is connected
    pub fn connected(&self) -> bool {
        self.health.is_connected()
    }

    /// Latched for the life of this connection once the gateway reports a failed reconnect
    pub fn reconnect_failed(&self) -> bool {
        self.health.reconnect_failed()
    }

    pub fn state(&self) -> ConnectionState {
        self.health.state()
    }

    pub fn reader_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn add_listener(&self, listener: Arc<dyn FeedListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FeedListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Open the socket, run the handshake and start the reader
    pub async fn connect(&mut self) -> Result<(), FeedError> {
        if self.reader_running() {
            return Err(FeedError::AlreadyConnected(self.name.clone()));
        }
        self.reader = None;

        let addr = self.config.addr();
        info!(feed = %self.name, addr = %addr, "Connecting to gateway");
        self.health.set_state(ConnectionState::Connecting);

        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                self.health.set_state(ConnectionState::Closed);
                return Err(FeedError::transport(&self.name, e));
            }
        };
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        self.health.set_state(ConnectionState::Handshake);
        if let Err(e) = self.handshake().await {
            *self.writer.lock().await = None;
            self.health.set_state(ConnectionState::Closed);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut processor = FeedProcessor::new(
            self.name.clone(),
            self.config.protocol.clone(),
            Dispatcher::with_bars(self.name.clone()),
            self.health.clone(),
            self.listeners.clone(),
        );
        if let Some(queue) = &self.queue {
            processor = processor.with_queue(queue.clone());
        }

        let reader = Reader {
            name: self.name.clone(),
            read_half,
            processor,
            read_timeout: self.config.read_timeout(),
            shutdown: shutdown_rx,
            health: self.health.clone(),
        };
        self.reader = Some(tokio::spawn(reader.run()));
        self.shutdown_tx = Some(shutdown_tx);
        self.health.set_state(ConnectionState::Running);

        info!(
            feed = %self.name,
            client = %self.config.client_name,
            protocol = %self.config.protocol,
            "Connected to gateway"
        );
        Ok(())
    }

    async fn handshake(&self) -> Result<(), FeedError> {
        self.send_cmd(&set_protocol_command(&self.config.protocol))
            .await?;
        self.send_cmd(&set_client_name_command(&self.config.client_name))
            .await?;
        self.send_cmd(CONNECT_COMMAND).await
    }

    /// Subscribe to interval bars
    pub async fn watch(&self, request: &WatchRequest) -> Result<(), FeedError> {
        let cmd = request.to_command()?;
        self.send_cmd(&cmd).await?;
        info!(
            feed = %self.name,
            symbol = %request.symbol,
            request_id = %request.request_id(),
            "Watch requested"
        );
        Ok(())
    }

    pub async fn unwatch(&self, symbol: &str) -> Result<(), FeedError> {
        check_symbol(symbol)?;
        self.send_cmd(&unwatch_command(symbol)).await
    }

    pub async fn unwatch_all(&self) -> Result<(), FeedError> {
        self.send_cmd(UNWATCH_ALL).await
    }

    /// The gateway answers with a `WATCHES` system record
    pub async fn request_watches(&self) -> Result<(), FeedError> {
        self.send_cmd(REQUEST_WATCHES).await
    }

    /// Ask the gateway to drop its upstream connection
    pub async fn send_disconnect(&self) -> Result<(), FeedError> {
        self.send_cmd(DISCONNECT).await
    }

    async fn send_cmd(&self, cmd: &str) -> Result<(), FeedError> {
        let bytes = encode_latin1(cmd).ok_or_else(|| {
            FeedError::InvalidWatch(format!("command {:?} is not ISO-8859-1", cmd.trim_end()))
        })?;

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| FeedError::NotConnected(self.name.clone()))?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| FeedError::transport(&self.name, e))?;

        debug!(feed = %self.name, command = %cmd.trim_end(), "Sent command");
        Ok(())
    }

    /// Wait for the reader to exit on its own and return why it stopped
    pub async fn closed(&mut self) -> Result<(), FeedError> {
        let Some(handle) = self.reader.as_mut() else {
            return Ok(());
        };
        let result = handle.await.unwrap_or_else(|e| {
            Err(FeedError::Shutdown(format!("{} reader panicked: {}", self.name, e)))
        });
        self.reader = None;
        self.shutdown_tx = None;
        self.health.set_state(ConnectionState::Closed);
        result
    }

    /// Stop the reader, join it within the configured bound and close the socket.
    ///
    /// Returns the reader's own error if it had already failed.
    pub async fn disconnect(&mut self) -> Result<(), FeedError> {
        self.health.set_state(ConnectionState::Disconnecting);
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(true).ok();
        }

        let result = match self.reader.take() {
            Some(handle) => self.join_reader(handle).await,
            None => Ok(()),
        };

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(feed = %self.name, error = %e, "Socket shutdown failed");
            }
        }

        self.health.mark_disconnected();
        self.health.set_state(ConnectionState::Closed);
        self.metrics.set_health(self.health.health());
        info!(feed = %self.name, "Disconnected from gateway");
        result
    }

    async fn join_reader(
        &self,
        mut handle: JoinHandle<Result<(), FeedError>>,
    ) -> Result<(), FeedError> {
        let bound = self.config.join_timeout();
        match timeout(bound, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(FeedError::Shutdown(format!(
                "{} reader panicked: {}",
                self.name, e
            ))),
            Err(_) => {
                handle.abort();
                error!(feed = %self.name, timeout_secs = bound.as_secs(), "Reader still alive after join timeout");
                Err(FeedError::Shutdown(format!(
                    "{} reader did not stop within {:?}",
                    self.name, bound
                )))
            }
        }
    }
}
