//! One client connection bridged to one shell.
//!
//! A [`Session`] spawns the shell, relays bytes in both directions and tears
//! both sides down together. Whichever side ends first, the other one is
//! force-closed: a process exit closes the socket, and a socket close, error
//! or shutdown terminates the process.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use protocol::{ControlMessage, InboundFrame};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pty::{PtyIo, PtyProcess, SpawnOptions};
use super::registry::{SessionEntry, SessionId, SessionInfo, SessionRegistry};
use super::state::{CloseReason, SessionState};
use crate::config::SessionConfig;

/// How long output already produced by an exited shell may still be flushed.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How long a terminated shell gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for the exit after SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// How long the close frame may take to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Inbound bytes queued for the shell before the socket stops being read.
const INPUT_BACKLOG_LIMIT: usize = 1024 * 1024;

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

/// Input accepted from the socket but not yet handed to the PTY writer.
#[derive(Debug, Default)]
struct InputBacklog {
    frames: VecDeque<Vec<u8>>,
    bytes: usize,
}

impl InputBacklog {
    fn push(&mut self, data: Vec<u8>) {
        self.bytes += data.len();
        self.frames.push_back(data);
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        let data = self.frames.pop_front()?;
        self.bytes -= data.len();
        Some(data)
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn is_full(&self) -> bool {
        self.bytes >= INPUT_BACKLOG_LIMIT
    }
}

/// A single-use bridge between one WebSocket and one PTY process.
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    config: Arc<SessionConfig>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    state: SessionState,
}

impl Session {
    /// Creates a session in the `Starting` state.
    pub fn new(
        config: Arc<SessionConfig>,
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer: None,
            config,
            registry,
            shutdown,
            state: SessionState::Starting,
        }
    }

    /// Records the client's address for logging and the registry.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Runs the session to completion and returns why it ended.
    ///
    /// Never panics on I/O failure: every error is logged and turned into a
    /// [`CloseReason`]. When this returns, the socket has been closed and the
    /// process terminated or reaped.
    pub async fn run<S>(mut self, ws: WebSocketStream<S>) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let options = SpawnOptions::from_config(&self.config);
        let entry = self.registry.register(SessionInfo {
            id: self.id.clone(),
            peer: self.peer,
            pid: None,
            shell: options.shell.clone(),
            cwd: options.cwd.clone(),
            size: options.size,
            state: self.state,
            started_at: Instant::now(),
        });

        let (mut sink, mut stream) = ws.split();

        let (mut process, mut io) = match PtyProcess::spawn(options) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(session_id = %self.id, peer = ?self.peer, error = %e, "Failed to spawn shell");
                let reason = CloseReason::SpawnFailed(e.to_string());
                self.transition(&entry, SessionState::Closing);
                close_socket(&mut sink, &reason).await;
                self.transition(&entry, SessionState::Closed);
                self.log_close(&reason);
                return reason;
            }
        };

        entry.set_process(process.pid(), process.shell());
        self.transition(&entry, SessionState::Active);
        info!(
            session_id = %self.id,
            peer = ?self.peer,
            pid = ?process.pid(),
            shell = %process.shell(),
            size = %process.size(),
            "Session started"
        );

        let shutdown = self.shutdown.clone();
        let mut backlog = InputBacklog::default();
        let mut output_done = false;
        let mut writer_gone = false;

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break CloseReason::Shutdown,

                exit = &mut io.exit => break match exit {
                    Ok(Ok(exit)) => CloseReason::ProcessExited { code: exit.code, signal: exit.signal },
                    Ok(Err(e)) => CloseReason::ProcessWaitFailed(e.to_string()),
                    Err(_) => CloseReason::ProcessWaitFailed("waiter thread ended".to_string()),
                },

                failed = &mut io.input_failed, if !writer_gone => match failed {
                    Ok(e) => {
                        warn!(session_id = %self.id, error = %e, "Failed to write to PTY");
                        break CloseReason::ProcessWriteFailed(e.to_string());
                    }
                    Err(_) => writer_gone = true,
                },

                permit = io.input.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(data) = backlog.pop() {
                            permit.send(data);
                        }
                    }
                    Err(_) => {
                        warn!(session_id = %self.id, "PTY writer stopped");
                        break CloseReason::ProcessWriteFailed("writer stopped".to_string());
                    }
                },

                chunk = io.output.recv(), if !output_done => match chunk {
                    Some(Ok(data)) => {
                        let sent = tokio::select! {
                            sent = sink.send(Message::Binary(data)) => sent,
                            _ = shutdown.cancelled() => break CloseReason::Shutdown,
                        };
                        if let Err(e) = sent {
                            warn!(session_id = %self.id, error = %e, "Failed to forward output to socket");
                            break CloseReason::SocketWriteFailed(e.to_string());
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %self.id, error = %e, "Error reading from PTY");
                        break CloseReason::ProcessReadFailed(e.to_string());
                    }
                    None => {
                        // EOF usually means the exit notification is right behind.
                        debug!(session_id = %self.id, "PTY output reached EOF");
                        output_done = true;
                    }
                },

                frame = stream.next(), if !backlog.is_full() => match frame {
                    Some(Ok(message)) => {
                        if let Err(reason) = self.handle_message(&entry, &mut process, &mut backlog, message) {
                            break reason;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(session_id = %self.id, error = %e, "Socket error");
                        break CloseReason::SocketError(e.to_string());
                    }
                    None => break CloseReason::SocketClosed,
                },
            }
        };

        self.transition(&entry, SessionState::Closing);
        self.teardown(&reason, &mut process, &mut io, &mut sink).await;
        drop(io);
        drop(process);
        self.transition(&entry, SessionState::Closed);

        self.log_close(&reason);
        reason
    }

    /// Handles one inbound WebSocket message.
    ///
    /// `Err` carries the reason the session must close.
    fn handle_message(
        &self,
        entry: &SessionEntry,
        process: &mut PtyProcess,
        backlog: &mut InputBacklog,
        message: Message,
    ) -> Result<(), CloseReason> {
        match message {
            Message::Text(text) => self.handle_frame(entry, process, backlog, text.as_bytes()),
            Message::Binary(data) => self.handle_frame(entry, process, backlog, &data),
            Message::Close(frame) => {
                debug!(session_id = %self.id, frame = ?frame, "Client sent close frame");
                Err(CloseReason::SocketClosed)
            }
            // Pongs are queued by tungstenite itself.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(()),
        }
    }

    fn handle_frame(
        &self,
        entry: &SessionEntry,
        process: &mut PtyProcess,
        backlog: &mut InputBacklog,
        payload: &[u8],
    ) -> Result<(), CloseReason> {
        match self.config.framing.decode(payload) {
            Ok(InboundFrame::Control(message)) => self.apply_control(entry, process, message),
            Ok(InboundFrame::Data(data)) => {
                if !data.is_empty() {
                    backlog.push(data.to_vec());
                }
            }
            Err(e) => warn!(
                session_id = %self.id,
                framing = %self.config.framing,
                len = payload.len(),
                error = %e,
                "Dropping malformed inbound frame"
            ),
        }
        Ok(())
    }

    fn apply_control(&self, entry: &SessionEntry, process: &mut PtyProcess, message: ControlMessage) {
        let Some(size) = message.terminal_size() else {
            return;
        };

        match process.resize(size) {
            Ok(()) => entry.set_size(size),
            // A failed resize leaves the old geometry in place; the session carries on.
            Err(e) => warn!(session_id = %self.id, size = %size, error = %e, "Failed to resize PTY"),
        }
    }

    /// Force-closes whichever side did not end the session.
    async fn teardown<S>(
        &self,
        reason: &CloseReason,
        process: &mut PtyProcess,
        io: &mut PtyIo,
        sink: &mut WsSink<S>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if reason.initiated_by_process() {
            if matches!(reason, CloseReason::ProcessExited { .. }) {
                process.mark_exited();
                self.drain_output(io, sink).await;
            }
            close_socket(sink, reason).await;
            return;
        }

        match process.terminate() {
            Ok(true) => self.reap(process, io).await,
            Ok(false) => {}
            Err(e) => warn!(session_id = %self.id, error = %e, "Failed to terminate process"),
        }

        close_socket(sink, reason).await;
    }

    /// Waits for a terminated process, killing it if it ignores the signal.
    async fn reap(&self, process: &mut PtyProcess, io: &mut PtyIo) {
        if self.wait_for_exit(process, io, TERMINATE_GRACE).await {
            return;
        }

        warn!(
            session_id = %self.id,
            pid = ?process.pid(),
            "Process ignored terminate signal, killing it"
        );
        if let Err(e) = process.force_kill() {
            error!(session_id = %self.id, error = %e, "Failed to kill process");
            return;
        }

        if !self.wait_for_exit(process, io, KILL_GRACE).await {
            error!(session_id = %self.id, pid = ?process.pid(), "Process still running after kill");
        }
    }

    /// Returns `false` only if the exit notification did not arrive in time.
    async fn wait_for_exit(&self, process: &mut PtyProcess, io: &mut PtyIo, grace: Duration) -> bool {
        match tokio::time::timeout(grace, &mut io.exit).await {
            Ok(Ok(Ok(exit))) => {
                process.mark_exited();
                debug!(
                    session_id = %self.id,
                    code = exit.code,
                    signal = ?exit.signal,
                    "Terminated process exited"
                );
                true
            }
            Ok(_) => {
                debug!(session_id = %self.id, "Lost track of terminated process");
                true
            }
            Err(_) => false,
        }
    }

    /// Flushes output the shell produced before it exited.
    async fn drain_output<S>(&self, io: &mut PtyIo, sink: &mut WsSink<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = tokio::time::Instant::now() + EXIT_DRAIN_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, io.output.recv()).await {
                Ok(Some(Ok(data))) => {
                    match tokio::time::timeout_at(deadline, sink.send(Message::Binary(data))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(session_id = %self.id, error = %e, "Socket gone while draining output");
                            return;
                        }
                        Err(_) => return,
                    }
                }
                Ok(Some(Err(_))) | Ok(None) => return,
                Err(_) => {
                    debug!(session_id = %self.id, "Output drain timed out");
                    return;
                }
            }
        }
    }

    fn transition(&mut self, entry: &SessionEntry, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        debug!(session_id = %self.id, from = %self.state, to = %next, "Session state changed");
        self.state = next;
        entry.set_state(next);
    }

    fn log_close(&self, reason: &CloseReason) {
        let uptime = self.registry.get(&self.id).map(|info| info.uptime());
        match reason {
            CloseReason::ProcessExited { code, signal } if !reason.is_normal() => warn!(
                session_id = %self.id,
                code = code,
                signal = ?signal,
                uptime = ?uptime,
                "Session closed: process exited abnormally"
            ),
            reason if reason.is_normal() => {
                info!(session_id = %self.id, reason = %reason, uptime = ?uptime, "Session closed")
            }
            reason => warn!(session_id = %self.id, reason = %reason, uptime = ?uptime, "Session closed"),
        }
    }
}

/// Sends a close frame. Errors are expected when the peer is already gone.
async fn close_socket<S>(sink: &mut WsSink<S>, reason: &CloseReason)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let code = match reason {
        CloseReason::Shutdown => CloseCode::Away,
        reason if reason.is_normal() => CloseCode::Normal,
        _ => CloseCode::Error,
    };
    let frame = CloseFrame {
        code,
        reason: "".into(),
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Close frame not delivered"),
        Err(_) => debug!("Timed out sending close frame"),
    }
}


#[cfg(all(test, unix))]
mod unix_tests {
    use super::*;
    use protocol::{Framing, TerminalSize};
    use serial_test::serial;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Role;

    struct Harness {
        client: WebSocketStream<DuplexStream>,
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
        handle: JoinHandle<CloseReason>,
    }

    fn session_for(framing: Framing, shell: &str) -> (Session, Arc<SessionRegistry>, CancellationToken) {
        let config = SessionConfig {
            shell: Some(shell.to_string()),
            cwd: Some(std::env::temp_dir()),
            framing,
            ..SessionConfig::default()
        };
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let session = Session::new(Arc::new(config), Arc::clone(&registry), shutdown.clone());
        (session, registry, shutdown)
    }

    async fn start(framing: Framing, shell: &str) -> Harness {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let (session, registry, shutdown) = session_for(framing, shell);
        let handle = tokio::spawn(session.run(server));

        Harness {
            client,
            registry,
            shutdown,
            handle,
        }
    }

    async fn read_until(client: &mut WebSocketStream<DuplexStream>, marker: &str) -> bool {
        let mut seen = String::new();
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), client.next()).await {
                Ok(Some(Ok(Message::Binary(data)))) => {
                    seen.push_str(&String::from_utf8_lossy(&data));
                    if seen.contains(marker) {
                        return true;
                    }
                }
                Ok(Some(Ok(_))) => {}
                Ok(_) => return false,
                Err(_) => {}
            }
        }
        false
    }

    async fn wait_for_size(registry: &SessionRegistry, size: TerminalSize) -> bool {
        for _ in 0..50 {
            if registry.list().first().map(|s| s.size) == Some(size) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn wait_for_pid(registry: &SessionRegistry) -> u32 {
        for _ in 0..100 {
            if let Some(pid) = registry.list().first().and_then(|s| s.pid) {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session never recorded a pid");
    }

    fn process_alive(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    #[serial]
    async fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let (server_io, _client_io) = tokio::io::duplex(1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let (session, _registry, _shutdown) = session_for(Framing::Legacy, "/bin/sh");

        let run = session.run(server);
        assert_send(&run);
    }

    #[tokio::test]
    #[serial]
    async fn test_text_input_reaches_shell() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;

        h.client.send(Message::Text("echo relay_marker\n".into())).await.unwrap();
        assert!(read_until(&mut h.client, "relay_marker").await);

        h.shutdown.cancel();
        let reason = timeout(Duration::from_secs(5), h.handle).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
    }

    #[tokio::test]
    #[serial]
    async fn test_output_bytes_pass_through_unchanged() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;
        let expected: &[u8] = b"BEGIN\xff\x01\x80END";

        h.client
            .send(Message::Text("printf 'BEGIN\\377\\001\\200END'\n".into()))
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut found = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), h.client.next()).await {
                Ok(Some(Ok(Message::Binary(data)))) => {
                    received.extend_from_slice(&data);
                    if received.windows(expected.len()).any(|w| w == expected) {
                        found = true;
                        break;
                    }
                }
                Ok(Some(Ok(other))) => panic!("unexpected frame: {other:?}"),
                Ok(_) => break,
                Err(_) => {}
            }
        }
        assert!(found, "raw bytes altered in transit: {received:?}");

        h.shutdown.cancel();
        let _ = timeout(Duration::from_secs(5), h.handle).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_large_paste_does_not_stall() {
        let h = start(Framing::Legacy, "/bin/cat").await;
        let pid = wait_for_pid(&h.registry).await;

        let line = format!("{}\n", "x".repeat(99));
        let paste = line.repeat(12_000);
        let expected = paste.len();
        let (mut tx, mut rx) = h.client.split();

        // Keep reading after the target so the session is never stuck on a
        // full socket when the close frame arrives.
        let (reached_tx, reached_rx) = tokio::sync::oneshot::channel();
        let reader = tokio::spawn(async move {
            let mut total = 0;
            let mut reached = Some(reached_tx);
            loop {
                match timeout(Duration::from_secs(5), rx.next()).await {
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        total += data.len();
                        if total >= expected {
                            if let Some(reached) = reached.take() {
                                let _ = reached.send(());
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => break,
                    Ok(Some(Ok(_))) => {}
                }
            }
            total
        });

        tx.send(Message::Text(paste)).await.unwrap();
        let reached = timeout(Duration::from_secs(30), reached_rx).await;
        assert!(
            matches!(reached, Ok(Ok(()))),
            "output stalled before {expected} bytes came back"
        );

        tx.close().await.unwrap();
        let reason = timeout(Duration::from_secs(10), h.handle).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::SocketClosed);
        assert!(!process_alive(pid), "cat outlived its session");

        let relayed = timeout(Duration::from_secs(10), reader).await.unwrap().unwrap();
        assert!(relayed >= expected);
    }

    #[tokio::test]
    #[serial]
    async fn test_resize_is_consumed() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;

        h.client
            .send(Message::Text(r#"{"type":"resize","cols":100,"rows":40}"#.into()))
            .await
            .unwrap();
        assert!(wait_for_size(&h.registry, TerminalSize::new(100, 40)).await);

        h.client.send(Message::Text("stty size\n".into())).await.unwrap();
        assert!(read_until(&mut h.client, "40 100").await);

        h.shutdown.cancel();
        let _ = timeout(Duration::from_secs(5), h.handle).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_tagged_framing() {
        let mut h = start(Framing::Tagged, "/bin/sh").await;

        let resize = protocol::encode_control(&ControlMessage::resize(90, 30)).unwrap();
        h.client.send(Message::Binary(resize)).await.unwrap();
        assert!(wait_for_size(&h.registry, TerminalSize::new(90, 30)).await);

        // Untagged and unknown frames are dropped, not forwarded.
        h.client.send(Message::Binary(b"\x09echo dropped_marker\n".to_vec())).await.unwrap();
        h.client.send(Message::Binary(Vec::new())).await.unwrap();

        let data = protocol::encode_data(b"echo tagged_marker\n");
        h.client.send(Message::Binary(data)).await.unwrap();
        assert!(read_until(&mut h.client, "tagged_marker").await);

        h.shutdown.cancel();
        let _ = timeout(Duration::from_secs(5), h.handle).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_process_exit_closes_socket() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;

        h.client.send(Message::Text("exit 3\n".into())).await.unwrap();

        let reason = timeout(Duration::from_secs(5), h.handle).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::ProcessExited { code: 3, signal: None });

        let mut closed = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), h.client.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {
                    closed = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(closed, "socket was not closed after process exit");
        assert_eq!(h.registry.count(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_signal_exit_is_reported() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;

        h.client.send(Message::Text("kill -9 $$\n".into())).await.unwrap();

        let reason = timeout(Duration::from_secs(5), h.handle).await.unwrap().unwrap();
        match reason {
            CloseReason::ProcessExited { signal: Some(_), .. } => {}
            other => panic!("expected a signal exit, got {other:?}"),
        }
        assert!(!reason.is_normal());
    }

    #[tokio::test]
    #[serial]
    async fn test_client_close_terminates_process() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;

        h.client.send(Message::Text("echo ready_marker\n".into())).await.unwrap();
        assert!(read_until(&mut h.client, "ready_marker").await);
        let pid = h.registry.list()[0].pid.expect("pid recorded");

        h.client.close(None).await.unwrap();

        let reason = timeout(Duration::from_secs(5), h.handle).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::SocketClosed);
        assert_eq!(h.registry.count(), 0);
        assert!(!process_alive(pid), "shell outlived its session");
    }

    #[tokio::test]
    #[serial]
    async fn test_shell_ignoring_hangup_is_killed() {
        let mut h = start(Framing::Legacy, "/bin/sh").await;

        h.client
            .send(Message::Text("trap '' HUP; echo trap_$((1+1))\n".into()))
            .await
            .unwrap();
        assert!(read_until(&mut h.client, "trap_2").await);
        let pid = wait_for_pid(&h.registry).await;

        h.client.close(None).await.unwrap();

        let reason = timeout(Duration::from_secs(10), h.handle).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::SocketClosed);
        assert!(!process_alive(pid), "shell survived teardown");
    }

    #[tokio::test]
    #[serial]
    async fn test_failed_socket_write_terminates_process() {
        // Separate pipes per direction, so the client can stop reading while
        // its input still reaches the session.
        let (in_client, in_server) = tokio::io::duplex(64 * 1024);
        let (out_server, out_client) = tokio::io::duplex(64 * 1024);

        let server_io = tokio::io::join(in_server, out_server);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client_io = tokio::io::join(tokio::io::empty(), in_client);
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let (session, registry, _shutdown) = session_for(Framing::Legacy, "/bin/sh");
        let handle = tokio::spawn(session.run(server));
        let pid = wait_for_pid(&registry).await;

        drop(out_client);
        let _ = client.send(Message::Text("echo unread\n".into())).await;

        let reason = timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
        assert!(
            matches!(reason, CloseReason::SocketWriteFailed(_)),
            "unexpected reason: {reason:?}"
        );
        assert!(!process_alive(pid), "shell outlived its session");
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_failure_closes_socket() {
        let mut h = start(Framing::Legacy, "/nonexistent/shell").await;

        let reason = timeout(Duration::from_secs(5), h.handle).await.unwrap().unwrap();
        assert!(matches!(reason, CloseReason::SpawnFailed(_)));

        match timeout(Duration::from_secs(1), h.client.next()).await.unwrap() {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }
}
