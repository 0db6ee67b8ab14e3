//! Command dispatch onto the single serial link.
//!
//! A [`Dispatcher`] owns the [`Session`] and applies the send policy:
//! connect when disconnected, write, and on a write failure run exactly one
//! reconnect-and-retry cycle before giving up. [`start_dispatcher`] moves
//! the dispatcher into a worker task; every caller goes through a cloned
//! [`DispatcherHandle`], so at most one send is ever in flight and the
//! bytes of two commands never interleave on the wire.
//!
//! Design Notes:
//! * No background retries. All recovery happens inside one `send`.
//! * A link left degraded by a read error is reconnected at the start of
//!   the next send; that counts as the send's single reconnect cycle.
//! * Worst-case latency is bounded by the settle delay (twice when a
//!   reconnect is needed), the response delay and the drain window.
//! * Shutdown is ordered: requests queued before it complete, then the
//!   session is closed.

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::color::ColorCommand;
use crate::device::{LinkState, Session};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Sent,
    SentAfterReconnect,
    Failed(String),
}

/// Result of one send, with whatever the device replied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub outcome: Outcome,
    pub responses: Vec<String>,
}

impl DispatchResult {
    fn failed(reason: String) -> Self {
        Self {
            outcome: Outcome::Failed(reason),
            responses: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub sent: u64,
    pub sent_after_reconnect: u64,
    pub failed: u64,
    pub responses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStatus {
    pub port: String,
    pub link: LinkState,
    #[serde(flatten)]
    pub stats: DispatchStats,
}

#[derive(Debug)]
pub struct Dispatcher {
    session: Session,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            stats: DispatchStats::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn status(&self) -> DispatchStatus {
        DispatchStatus {
            port: self.session.config().port.clone(),
            link: self.session.state(),
            stats: self.stats.clone(),
        }
    }

    /// Eager first connection, so the settle delay is paid before the first
    /// request rather than during it.
    pub async fn connect_at_startup(&mut self) -> Result<(), crate::device::ConnectError> {
        self.session.connect().await
    }

    /// Send one command, with at most one reconnect cycle.
    ///
    /// Connects first when disconnected, reconnects first when degraded.
    pub async fn dispatch(&mut self, cmd: ColorCommand) -> DispatchResult {
        let result = self.try_dispatch(cmd).await;
        match &result.outcome {
            Outcome::Sent => {
                self.stats.sent += 1;
                info!("Sent {} to device", cmd);
            }
            Outcome::SentAfterReconnect => {
                self.stats.sent_after_reconnect += 1;
                info!("Sent {} to device after reconnecting", cmd);
            }
            Outcome::Failed(reason) => {
                self.stats.failed += 1;
                warn!("Failed to send {}: {}", cmd, reason);
            }
        }
        self.stats.responses += result.responses.len() as u64;
        result
    }

    async fn try_dispatch(&mut self, cmd: ColorCommand) -> DispatchResult {
        // A degraded handle is replaced up front; that reconnect is this
        // request's one recovery cycle.
        let recovered = match self.session.state() {
            LinkState::Connected => false,
            LinkState::Disconnected => {
                debug!("Device not connected, attempting to connect");
                if let Err(e) = self.session.connect().await {
                    return DispatchResult::failed(format!("connect failed: {}", e));
                }
                false
            }
            LinkState::Degraded => {
                info!("Link degraded by an earlier error, reconnecting before write");
                if let Err(e) = self.session.connect().await {
                    return DispatchResult::failed(format!("reconnect failed: {}", e));
                }
                true
            }
        };

        let write_err = match self.session.write_command(&cmd) {
            Ok(()) => {
                let outcome = if recovered {
                    Outcome::SentAfterReconnect
                } else {
                    Outcome::Sent
                };
                return DispatchResult {
                    outcome,
                    responses: self.drain().await,
                };
            }
            Err(e) if recovered => {
                return DispatchResult::failed(format!("write after reconnect failed: {}", e))
            }
            Err(e) => e,
        };

        info!("Write failed ({}), reconnecting once", write_err);
        if let Err(e) = self.session.connect().await {
            return DispatchResult::failed(format!(
                "write failed: {}; reconnect failed: {}",
                write_err, e
            ));
        }
        match self.session.write_command(&cmd) {
            Ok(()) => DispatchResult {
                outcome: Outcome::SentAfterReconnect,
                responses: self.drain().await,
            },
            Err(e) => DispatchResult::failed(format!(
                "write failed: {}; retry after reconnect failed: {}",
                write_err, e
            )),
        }
    }

    async fn drain(&mut self) -> Vec<String> {
        if !self.session.config().capture_responses {
            return Vec::new();
        }
        let window = self.session.config().drain_window;
        self.session.drain_responses(window).await
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

enum DispatchCommand {
    Send(ColorCommand, oneshot::Sender<DispatchResult>),
    Status(oneshot::Sender<DispatchStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable entry point to the dispatcher worker.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl DispatcherHandle {
    /// Queue `cmd` and wait for its outcome. Blocks behind any send
    /// already in flight.
    pub async fn send(&self, cmd: ColorCommand) -> DispatchResult {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(DispatchCommand::Send(cmd, tx)).is_err() {
            return DispatchResult::failed("dispatcher stopped".to_string());
        }
        rx.await
            .unwrap_or_else(|_| DispatchResult::failed("dispatcher stopped".to_string()))
    }

    pub async fn status(&self) -> Option<DispatchStatus> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(DispatchCommand::Status(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Close the session and stop the worker once earlier requests finish.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(DispatchCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

pub fn start_dispatcher(mut dispatcher: Dispatcher) -> DispatcherHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchCommand>();
    let handle = DispatcherHandle { tx };

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                DispatchCommand::Send(color, reply) => {
                    let result = dispatcher.dispatch(color).await;
                    if reply.send(result).is_err() {
                        debug!("requester went away before outcome of {} was delivered", color);
                    }
                }
                DispatchCommand::Status(reply) => {
                    let _ = reply.send(dispatcher.status());
                }
                DispatchCommand::Shutdown(done) => {
                    dispatcher.close();
                    let _ = done.send(());
                    debug!("dispatcher loop terminated by shutdown");
                    return;
                }
            }
        }
        dispatcher.close();
        debug!("dispatcher loop terminated; all handles dropped");
    });

    handle
}
