//! Session Engine
//!
//! A session is a single task owning the transport, the command queue, the
//! frame parser and the poller set. Every event source (caller requests,
//! inbound bytes, the pacing tick and the poll tick) is a branch of one
//! `select!` loop, so handlers never interleave and no state is shared.
//! [`ObdSession`] is the cloneable handle that sends requests to it.

use crate::config::SessionConfig;
use crate::event::{SessionEvent, SessionEvents};
use crate::state::{SessionState, SessionStatus};
use obd_protocol::{
    init_sequence, Command, Connector, FrameParser, ObdError, ParameterCatalog, Reading,
    StandardCatalog,
};
use obd_scheduler::{PacingWriter, PollingScheduler};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between handles and the session task
const REQUEST_BUFFER: usize = 64;

/// Transport reads worth of bytes kept while waiting for a prompt
const PENDING_READS: usize = 16;

/// Operations a handle can ask the session task to perform
#[derive(Debug)]
enum Request {
    Connect {
        address: Option<String>,
        channel: Option<u8>,
    },
    Disconnect,
    Write {
        message: String,
        expected_replies: u8,
    },
    RequestValueByName(String),
    AddPoller(String),
    RemovePoller(String),
    RemoveAllPollers,
    StartPolling(Option<Duration>),
    StopPolling,
    Shutdown,
}

enum Message {
    /// Request plus acknowledgement sent once it has been fully handled
    Op(Request, oneshot::Sender<()>),
    Status(oneshot::Sender<SessionStatus>),
}

/// Handle to a running session.
///
/// Operations return once the session task has handled them. Failures are
/// never returned; they arrive as [`SessionEvent::Error`].
#[derive(Debug, Clone)]
pub struct ObdSession {
    requests: mpsc::Sender<Message>,
}

impl ObdSession {
    /// Spawn a session task on the current runtime
    pub fn spawn<C: Connector>(
        connector: C,
        catalog: Arc<dyn ParameterCatalog>,
        config: SessionConfig,
    ) -> (Self, SessionEvents) {
        let (requests, inbox) = mpsc::channel(REQUEST_BUFFER);
        let (events, observer) = mpsc::unbounded_channel();

        let actor = SessionActor {
            pacing: PacingWriter::new(config.pacing_interval(), config.queue_capacity),
            scheduler: PollingScheduler::new(config.scheduler_config()),
            parser: FrameParser::with_limit(config.read_buffer_size * PENDING_READS),
            connector,
            catalog,
            config,
            state: SessionState::Disconnected,
            reader: None,
            writer: None,
            events,
        };
        tokio::spawn(actor.run(inbox));

        (Self { requests }, observer)
    }

    /// Spawn a session using the built-in parameter catalog
    pub fn with_standard_catalog<C: Connector>(
        connector: C,
        config: SessionConfig,
    ) -> (Self, SessionEvents) {
        Self::spawn(connector, Arc::new(StandardCatalog::new()), config)
    }

    /// Open the transport and queue the adapter setup commands
    pub async fn connect(&self, address: Option<&str>, channel: Option<u8>) {
        self.call(Request::Connect {
            address: address.map(str::to_string),
            channel,
        })
        .await
    }

    /// Cancel both timers, drop queued commands and pollers, close the transport
    pub async fn disconnect(&self) {
        self.call(Request::Disconnect).await
    }

    /// Queue a raw command (AT command or mode+pid request) without terminator.
    /// `expected_replies` of `None` or 0 waits for the adapter prompt.
    pub async fn write(&self, message: &str, expected_replies: Option<u8>) {
        self.call(Request::Write {
            message: message.to_string(),
            expected_replies: expected_replies.unwrap_or(0),
        })
        .await
    }

    /// Queue the request for a catalog parameter
    pub async fn request_value_by_name(&self, name: &str) {
        self.call(Request::RequestValueByName(name.to_string()))
            .await
    }

    pub async fn add_poller(&self, name: &str) {
        self.call(Request::AddPoller(name.to_string())).await
    }

    pub async fn remove_poller(&self, name: &str) {
        self.call(Request::RemovePoller(name.to_string())).await
    }

    pub async fn remove_all_pollers(&self) {
        self.call(Request::RemoveAllPollers).await
    }

    /// Start polling every `interval`, or at a period derived from the
    /// pacing interval and poller count when `None`
    pub async fn start_polling(&self, interval: Option<Duration>) {
        self.call(Request::StartPolling(interval)).await
    }

    /// Stop polling; the poller set is kept
    pub async fn stop_polling(&self) {
        self.call(Request::StopPolling).await
    }

    /// Tear the session down and end its task
    pub async fn shutdown(&self) {
        self.call(Request::Shutdown).await
    }

    /// Snapshot of the session, `None` once the task has ended
    pub async fn status(&self) -> Option<SessionStatus> {
        let (reply, status) = oneshot::channel();
        self.requests.send(Message::Status(reply)).await.ok()?;
        status.await.ok()
    }

    async fn call(&self, request: Request) {
        let (ack, done) = oneshot::channel();
        if self.requests.send(Message::Op(request, ack)).await.is_err() {
            warn!("OBD session task has stopped, request dropped");
            return;
        }
        let _ = done.await;
    }
}

struct SessionActor<C: Connector> {
    connector: C,
    catalog: Arc<dyn ParameterCatalog>,
    config: SessionConfig,
    state: SessionState,
    reader: Option<ReadHalf<C::Stream>>,
    writer: Option<WriteHalf<C::Stream>>,
    /// Receive buffer and framing
    parser: FrameParser,
    /// Command queue and pacing tick
    pacing: PacingWriter,
    /// Active poller set and poll tick
    scheduler: PollingScheduler,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<C: Connector> SessionActor<C> {
    async fn run(mut self, mut inbox: mpsc::Receiver<Message>) {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            tokio::select! {
                biased;

                message = inbox.recv() => match message {
                    Some(Message::Op(request, ack)) => {
                        let shutdown = matches!(request, Request::Shutdown);
                        self.handle(request).await;
                        let _ = ack.send(());
                        if shutdown {
                            break;
                        }
                    }
                    Some(Message::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    None => {
                        self.teardown(SessionState::Disconnected).await;
                        break;
                    }
                },
                read = read_chunk(self.reader.as_mut(), &mut buf) => match read {
                    Ok(0) => self.fail_read("adapter closed the connection".to_string()).await,
                    Ok(n) => self.on_data(&buf[..n]),
                    Err(e) => self.fail_read(e.to_string()).await,
                },
                command = self.pacing.tick() => {
                    if let Some(command) = command {
                        self.write_command(command).await;
                    }
                }
                batch = self.scheduler.tick() => {
                    debug!("Polling {} parameters", batch.len());
                    for command in batch {
                        self.enqueue(command);
                    }
                }
            }
        }

        info!("OBD session task stopped");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Connect { address, channel } => self.connect(address, channel).await,
            Request::Disconnect => {
                if self.state == SessionState::Disconnected {
                    self.emit_debug("Already disconnected".to_string());
                } else {
                    info!("Disconnecting OBD session");
                    self.teardown(SessionState::Disconnected).await;
                }
            }
            Request::Write {
                message,
                expected_replies,
            } => {
                self.enqueue(Command::with_replies(message, expected_replies));
            }
            Request::RequestValueByName(name) => {
                if let Some(request) = self.lookup_request(&name) {
                    self.enqueue(Command::new(request));
                }
            }
            Request::AddPoller(name) => {
                if let Some(request) = self.lookup_request(&name) {
                    if self.scheduler.pollers_mut().add(name.as_str(), request) {
                        self.refresh_polling();
                    } else {
                        self.emit_debug(format!("Poller {} is already active", name));
                    }
                }
            }
            Request::RemovePoller(name) => {
                if self.scheduler.pollers_mut().remove(&name) {
                    self.refresh_polling();
                } else {
                    self.emit_debug(format!("No active poller named {}", name));
                }
            }
            Request::RemoveAllPollers => {
                self.scheduler.pollers_mut().clear();
                self.refresh_polling();
            }
            Request::StartPolling(interval) => {
                if self.state != SessionState::Ready {
                    warn!("Cannot start polling while {}", self.state);
                    self.report(ObdError::NotConnected);
                    return;
                }
                let period = self.scheduler.start(interval);
                self.emit_debug(format!("Polling started every {:?}", period));
            }
            Request::StopPolling => self.scheduler.stop(),
            Request::Shutdown => {
                if self.state != SessionState::Disconnected {
                    self.teardown(SessionState::Disconnected).await;
                }
            }
        }
    }

    async fn connect(&mut self, address: Option<String>, channel: Option<u8>) {
        if !self.state.can_connect() {
            warn!("Rejecting connect while {}", self.state);
            self.report(ObdError::InvalidState {
                operation: "connect",
                state: self.state.to_string(),
            });
            return;
        }

        self.set_state(SessionState::Connecting);
        let stream = match self.connector.connect(address, channel).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open OBD adapter: {}", e);
                self.report(e);
                self.set_state(SessionState::Disconnected);
                return;
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.set_state(SessionState::Initializing);

        let accepted = init_sequence(self.config.protocol, self.config.adaptive_timing)
            .into_iter()
            .all(|command| self.enqueue(command));
        if !accepted {
            error!("Adapter setup commands did not fit in the command queue");
            self.teardown(SessionState::Failed).await;
            return;
        }

        self.set_state(SessionState::Ready);
        self.pacing.start();
        info!("OBD adapter connected");
        self.emit(SessionEvent::Connected);
    }

    fn lookup_request(&mut self, name: &str) -> Option<String> {
        match self.catalog.lookup(name) {
            Some(def) => Some(def.request()),
            None => {
                warn!("Unknown OBD parameter {}", name);
                self.report(ObdError::UnknownParameter(name.to_string()));
                None
            }
        }
    }

    /// Queue a command, reporting and dropping it when it cannot be accepted
    fn enqueue(&mut self, command: Command) -> bool {
        if !self.state.accepts_writes() {
            warn!("Dropping {}: adapter not connected", command);
            self.report(ObdError::NotConnected);
            return false;
        }
        match self.pacing.enqueue(command) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping command: {}", e);
                self.report(e);
                false
            }
        }
    }

    /// Keep a derived poll period in step with the poller count
    fn refresh_polling(&mut self) {
        if let Some(period) = self.scheduler.refresh() {
            self.emit_debug(format!("Poll interval now {:?}", period));
        }
    }

    async fn write_command(&mut self, command: Command) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        debug!("Writing {}", command);
        let wire = command.to_wire();
        let result = match writer.write_all(&wire).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!("Write to OBD adapter failed: {}", e);
            self.report(ObdError::TransportWrite(e.to_string()));
            self.pacing.stop();
            self.scheduler.pollers_mut().clear();
            self.emit_debug(
                "Pacing stopped and pollers cleared, connection is probably lost".to_string(),
            );
            self.teardown(SessionState::Failed).await;
        }
    }

    fn on_data(&mut self, chunk: &[u8]) {
        let readings = self.parser.feed(chunk, self.catalog.as_ref());
        let discarded = self.parser.take_discarded();
        if discarded > 0 {
            self.emit_debug(format!("Discarded {} bytes received without a prompt", discarded));
        }
        for reading in readings {
            if let Reading::Raw { text, .. } = &reading {
                self.emit_debug(ObdError::UnrecognizedReply(text.clone()).to_string());
            }
            debug!("Received {}", reading);
            self.emit(SessionEvent::DataReceived(reading));
        }
    }

    async fn fail_read(&mut self, reason: String) {
        error!("OBD adapter connection lost: {}", reason);
        self.report(ObdError::TransportRead(reason));
        self.teardown(SessionState::Failed).await;
    }

    /// Cancel both timers, drop queued commands, pollers and buffered bytes,
    /// close the transport.
    async fn teardown(&mut self, target: SessionState) {
        self.pacing.stop();
        self.pacing.clear();
        self.scheduler.stop();
        self.scheduler.pollers_mut().clear();
        self.parser.clear();

        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Transport close failed: {}", e);
            }
        }

        self.set_state(target);
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            queued: self.pacing.queue_len(),
            pending_bytes: self.parser.pending_len(),
            pollers: self.scheduler.pollers().names(),
            pacing_active: self.pacing.is_active(),
            polling_active: self.scheduler.is_polling(),
            poll_interval: self.scheduler.period(),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {} -> {}", self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn report(&self, error: ObdError) {
        self.emit(SessionEvent::Error(error));
    }

    fn emit_debug(&self, message: String) {
        debug!("{}", message);
        self.emit(SessionEvent::Debug(message));
    }

    fn emit(&self, event: SessionEvent) {
        // Observer may have gone away; the session keeps running
        let _ = self.events.send(event);
    }
}

/// Read from the transport, or wait forever when there is none
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: Option<&mut R>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::{AdapterStatus, Value};
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWrite, DuplexStream, ReadBuf};

    /// Connector backed by an in-memory ELM327 that records every command
    struct MockAdapterConnector {
        seen: mpsc::UnboundedSender<String>,
    }

    impl Connector for MockAdapterConnector {
        type Stream = DuplexStream;

        fn connect(
            &mut self,
            _address: Option<String>,
            _channel: Option<u8>,
        ) -> impl Future<Output = Result<DuplexStream, ObdError>> + Send {
            let (client, adapter) = tokio::io::duplex(4096);
            tokio::spawn(run_mock_adapter(adapter, self.seen.clone()));
            async move { Ok(client) }
        }
    }

    async fn run_mock_adapter(mut stream: DuplexStream, seen: mpsc::UnboundedSender<String>) {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
                continue;
            }
            let command = String::from_utf8_lossy(&line).to_string();
            line.clear();
            let _ = seen.send(command.clone());

            let reply = match command.as_str() {
                "HANGUP" => return,
                "ATZ" => "\r\rELM327 v1.5\r\r>",
                c if c.starts_with("AT") => "OK\r\r>",
                "010C" | "010C1" => "410C1AF8\r\r>",
                "010D" | "010D1" => "410D28\r\r>",
                "03" => "4301330000000000\r\r>",
                _ => "NO DATA\r\r>",
            };
            if stream.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    struct FailingConnector;

    impl Connector for FailingConnector {
        type Stream = DuplexStream;

        fn connect(
            &mut self,
            address: Option<String>,
            _channel: Option<u8>,
        ) -> impl Future<Output = Result<DuplexStream, ObdError>> + Send {
            let device = address.unwrap_or_default();
            async move { Err(ObdError::TransportConnect(format!("{}: no such device", device))) }
        }
    }

    /// Stream that never yields data and rejects every write
    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenPipe {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down")))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenPipeConnector;

    impl Connector for BrokenPipeConnector {
        type Stream = BrokenPipe;

        fn connect(
            &mut self,
            _address: Option<String>,
            _channel: Option<u8>,
        ) -> impl Future<Output = Result<BrokenPipe, ObdError>> + Send {
            async { Ok(BrokenPipe) }
        }
    }

    /// Adapter at the wrong baud rate: garbage and never a prompt
    struct NoisyAdapterConnector;

    impl Connector for NoisyAdapterConnector {
        type Stream = DuplexStream;

        fn connect(
            &mut self,
            _address: Option<String>,
            _channel: Option<u8>,
        ) -> impl Future<Output = Result<DuplexStream, ObdError>> + Send {
            let (client, mut adapter) = tokio::io::duplex(1 << 16);
            tokio::spawn(async move {
                if adapter.write_all(&[b'~'; 5120]).await.is_ok() {
                    std::future::pending::<()>().await;
                }
            });
            async move { Ok(client) }
        }
    }

    fn mock_session(
        config: SessionConfig,
    ) -> (ObdSession, SessionEvents, mpsc::UnboundedReceiver<String>) {
        let (seen, commands) = mpsc::unbounded_channel();
        let (session, events) =
            ObdSession::with_standard_catalog(MockAdapterConnector { seen }, config);
        (session, events, commands)
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn readings(events: &[SessionEvent]) -> Vec<&Reading> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::DataReceived(reading) => Some(reading),
                _ => None,
            })
            .collect()
    }

    fn errors(events: &[SessionEvent]) -> Vec<&ObdError> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_initializes_adapter() {
        let (session, mut events, mut commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;

        assert_eq!(
            drain(&mut events),
            vec![
                SessionEvent::StateChanged(SessionState::Connecting),
                SessionEvent::StateChanged(SessionState::Initializing),
                SessionEvent::StateChanged(SessionState::Ready),
                SessionEvent::Connected,
            ]
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            drain(&mut commands),
            vec!["ATZ", "ATL0", "ATS0", "ATH0", "ATE0", "ATAT2", "ATSP0"]
        );

        let events = drain(&mut events);
        let statuses: Vec<_> = readings(&events).iter().filter_map(|r| r.status()).collect();
        assert_eq!(statuses, vec![AdapterStatus::Ok; 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_by_name_round_trip() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.request_value_by_name("rpm").await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let events = drain(&mut events);
        let rpm = readings(&events)
            .into_iter()
            .find(|r| r.name() == Some("rpm"))
            .cloned();
        assert_eq!(
            rpm,
            Some(Reading::Value {
                mode: 0x41,
                pid: Some(0x0C),
                name: "rpm".to_string(),
                value: Value::Number(1726.0),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trouble_codes_request() {
        let (session, mut events, mut commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.request_value_by_name("requestdtc").await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(drain(&mut commands).last().map(String::as_str), Some("03"));
        let events = drain(&mut events);
        let codes = readings(&events)
            .into_iter()
            .find_map(|r| r.value().cloned());
        assert_eq!(codes, Some(Value::Codes(vec!["P0133".to_string()])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_before_connect_is_rejected() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.write("010D", None).await;

        assert_eq!(drain(&mut events), vec![SessionEvent::Error(ObdError::NotConnected)]);
        assert_eq!(session.status().await.unwrap().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_overflow_keeps_queue() {
        let config = SessionConfig {
            queue_capacity: 8,
            ..Default::default()
        };
        let (session, mut events, _commands) = mock_session(config);
        session.connect(None, None).await;
        // 7 setup commands are queued, one slot left
        session.write("010C", None).await;
        session.write("010D", None).await;

        let events = drain(&mut events);
        assert_eq!(errors(&events), vec![&ObdError::QueueOverflow { capacity: 8 }]);
        assert_eq!(session.status().await.unwrap().queued, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_overflow_fails_connect() {
        let config = SessionConfig {
            queue_capacity: 3,
            ..Default::default()
        };
        let (session, mut events, mut commands) = mock_session(config);
        session.connect(None, None).await;

        assert_eq!(
            drain(&mut events),
            vec![
                SessionEvent::StateChanged(SessionState::Connecting),
                SessionEvent::StateChanged(SessionState::Initializing),
                SessionEvent::Error(ObdError::QueueOverflow { capacity: 3 }),
                SessionEvent::StateChanged(SessionState::Failed),
            ]
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(drain(&mut commands).is_empty());
        let status = session.status().await.unwrap();
        assert_eq!(status.queued, 0);
        assert!(!status.pacing_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_writes_in_order() {
        let (session, _events, mut commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        for pid in ["0105", "010C", "010D"] {
            session.write(pid, None).await;
        }

        // 7 setup commands + 3 requests, one per 50ms tick
        tokio::time::sleep(Duration::from_millis(480)).await;
        assert_eq!(drain(&mut commands).len(), 9);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(drain(&mut commands), vec!["010D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_twice_runs_one_timer() {
        let (session, mut events, mut commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.add_poller("vss").await;
        session.start_polling(Some(Duration::from_millis(200))).await;
        session.start_polling(Some(Duration::from_millis(200))).await;

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let polls = drain(&mut commands).into_iter().filter(|c| c == "010D1").count();
        assert_eq!(polls, 10);

        let events = drain(&mut events);
        let speeds = readings(&events)
            .into_iter()
            .filter(|r| r.name() == Some("vss"))
            .count();
        assert_eq!(speeds, 10);

        let status = session.status().await.unwrap();
        assert!(status.polling_active);
        assert_eq!(status.poll_interval, Some(Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_interval_tracks_added_pollers() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.add_poller("vss").await;
        session.start_polling(None).await;
        for name in ["rpm", "temp", "load_pct", "map", "iat"] {
            session.add_poller(name).await;
        }

        // 50ms x 6 pollers x 2
        let status = session.status().await.unwrap();
        assert_eq!(status.poll_interval, Some(Duration::from_millis(600)));

        tokio::time::sleep(Duration::from_secs(15)).await;

        let events = drain(&mut events);
        assert!(errors(&events).is_empty());
        assert!(session.status().await.unwrap().queued < 7);

        session.remove_poller("iat").await;
        session.remove_poller("map").await;
        assert_eq!(
            session.status().await.unwrap().poll_interval,
            Some(Duration::from_millis(400))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_keeps_pollers() {
        let (session, _events, mut commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.add_poller("vss").await;
        session.add_poller("rpm").await;
        session.start_polling(None).await;
        assert_eq!(
            session.status().await.unwrap().poll_interval,
            Some(Duration::from_millis(200))
        );

        session.stop_polling().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let polls = drain(&mut commands)
            .into_iter()
            .filter(|c| c == "010D1" || c == "010C1")
            .count();
        assert_eq!(polls, 0);
        let status = session.status().await.unwrap();
        assert!(!status.polling_active);
        assert_eq!(status.pollers, vec!["vss", "rpm"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_management() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.add_poller("vss").await;
        session.add_poller("vss").await;
        session.add_poller("temp").await;
        session.add_poller("flux").await;
        session.remove_poller("vss").await;

        let events = drain(&mut events);
        assert!(events.contains(&SessionEvent::Debug("Poller vss is already active".to_string())));
        assert_eq!(
            errors(&events),
            vec![&ObdError::UnknownParameter("flux".to_string())]
        );
        assert_eq!(session.status().await.unwrap().pollers, vec!["temp"]);

        session.remove_all_pollers().await;
        assert!(session.status().await.unwrap().pollers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polling_requires_ready() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.add_poller("vss").await;
        session.start_polling(None).await;

        assert_eq!(drain(&mut events), vec![SessionEvent::Error(ObdError::NotConnected)]);
        assert!(!session.status().await.unwrap().polling_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_state() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.add_poller("vss").await;
        session.start_polling(None).await;
        session.write("010C", None).await;

        session.disconnect().await;

        let status = session.status().await.unwrap();
        assert_eq!(status.state, SessionState::Disconnected);
        assert_eq!(status.queued, 0);
        assert_eq!(status.pending_bytes, 0);
        assert!(status.pollers.is_empty());
        assert!(!status.pacing_active);
        assert!(!status.polling_active);

        drain(&mut events);
        session.write("010D", None).await;
        assert_eq!(drain(&mut events), vec![SessionEvent::Error(ObdError::NotConnected)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_ready_is_rejected() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        drain(&mut events);

        session.connect(None, None).await;
        assert_eq!(
            drain(&mut events),
            vec![SessionEvent::Error(ObdError::InvalidState {
                operation: "connect",
                state: "ready".to_string(),
            })]
        );
        assert_eq!(session.status().await.unwrap().state, SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_stays_disconnected() {
        let (session, mut events) =
            ObdSession::with_standard_catalog(FailingConnector, SessionConfig::default());
        session.connect(Some("/dev/rfcomm9"), Some(14)).await;

        assert_eq!(
            drain(&mut events),
            vec![
                SessionEvent::StateChanged(SessionState::Connecting),
                SessionEvent::Error(ObdError::TransportConnect(
                    "/dev/rfcomm9: no such device".to_string()
                )),
                SessionEvent::StateChanged(SessionState::Disconnected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_stops_session() {
        let (session, mut events) =
            ObdSession::with_standard_catalog(BrokenPipeConnector, SessionConfig::default());
        session.connect(None, None).await;
        session.add_poller("vss").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = drain(&mut events);
        assert_eq!(errors(&events), vec![&ObdError::TransportWrite("link down".to_string())]);
        assert_eq!(
            events.last(),
            Some(&SessionEvent::StateChanged(SessionState::Failed))
        );

        let status = session.status().await.unwrap();
        assert!(!status.pacing_active);
        assert!(status.pollers.is_empty());
        assert_eq!(status.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_hangup_fails_then_reconnects() {
        let (session, mut events, _commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.write("HANGUP", None).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let before = drain(&mut events);
        assert!(matches!(errors(&before).as_slice(), [ObdError::TransportRead(_)]));
        assert_eq!(session.status().await.unwrap().state, SessionState::Failed);

        session.connect(None, None).await;
        assert_eq!(session.status().await.unwrap().state, SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_without_prompt_is_capped() {
        let (session, mut events) =
            ObdSession::with_standard_catalog(NoisyAdapterConnector, SessionConfig::default());
        session.connect(None, None).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 16 reads of 256 bytes are kept
        let status = session.status().await.unwrap();
        assert_eq!(status.pending_bytes, 4096);
        assert_eq!(status.state, SessionState::Ready);

        let discarded: usize = drain(&mut events)
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Debug(message) => message
                    .strip_prefix("Discarded ")
                    .and_then(|rest| rest.split(' ').next())
                    .and_then(|count| count.parse::<usize>().ok()),
                _ => None,
            })
            .sum();
        assert_eq!(discarded, 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_do_not_share_state() {
        let (first, _first_events, _a) = mock_session(SessionConfig::default());
        let (second, _second_events, _b) = mock_session(SessionConfig::default());
        first.connect(None, None).await;
        second.connect(None, None).await;

        first.add_poller("rpm").await;
        first.write("0105", None).await;

        let first_status = first.status().await.unwrap();
        let second_status = second.status().await.unwrap();
        assert_eq!(first_status.pollers, vec!["rpm"]);
        assert!(second_status.pollers.is_empty());
        assert_eq!(first_status.queued, second_status.queued + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_task() {
        let (session, _events, _commands) = mock_session(SessionConfig::default());
        session.connect(None, None).await;
        session.shutdown().await;

        assert!(session.status().await.is_none());
    }
}
