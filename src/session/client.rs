//! Async handle over a [`SessionMachine`] running on its own task.
//!
//! The task owns the machine outright. Inbound channel events, caller
//! commands and the headset re-query timer are multiplexed with
//! `tokio::select!`, so every mutation of session state happens on one worker.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent};
use crate::config::SessionConfig;
use crate::error::{RelayError, Result};
use crate::events::EventDispatcher;
use crate::streams::StreamName;

use super::machine::SessionMachine;
use super::operations::Operation;
use super::state::{Session, SessionState};

enum Command {
    Execute(Operation, oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<Session>),
    Close,
}

/// Caller-facing handle to a running session.
///
/// Dropping the handle closes the session.
#[derive(Debug)]
pub struct CortexClient {
    commands: mpsc::UnboundedSender<Command>,
    events: EventDispatcher,
    state: watch::Receiver<SessionState>,
    worker: JoinHandle<()>,
}

impl CortexClient {
    /// Open a websocket to `config.url` and start the handshake once it opens.
    pub fn connect(config: SessionConfig, events: EventDispatcher) -> Result<Self> {
        config.validate()?;
        let channel = Channel::open(config.url.clone());
        Self::with_channel(config, channel, events)
    }

    /// Run the session over an existing channel, publishing to `events`.
    ///
    /// Register callbacks on `events` before the channel opens to see
    /// every milestone.
    pub fn with_channel(config: SessionConfig, channel: Channel, events: EventDispatcher) -> Result<Self> {
        let Channel { handle, events: inbound } = channel;
        let machine = SessionMachine::new(config, handle, events.clone())?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let worker = tokio::spawn(run(machine, inbound, cmd_rx, state_tx));
        Ok(Self {
            commands: cmd_tx,
            events,
            state: state_rx,
            worker,
        })
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Latest state published by the worker.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Send `op`; resolves once the request is on the wire.
    ///
    /// Argument problems fail here without reaching the worker. The reply
    /// arrives later as a [`SessionEvent`](crate::events::SessionEvent).
    pub async fn execute(&self, op: Operation) -> Result<()> {
        op.validate()?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Execute(op, tx))
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)?
    }

    pub async fn subscribe(&self, streams: Vec<StreamName>) -> Result<()> {
        self.execute(Operation::Subscribe(streams)).await
    }

    pub async fn unsubscribe(&self, streams: Vec<StreamName>) -> Result<()> {
        self.execute(Operation::Unsubscribe(streams)).await
    }

    /// Copy of the session as the worker currently sees it.
    pub async fn snapshot(&self) -> Result<Session> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }

    /// Ask the worker to close the channel and stop.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Wait for the worker to finish.
    pub async fn join(self) -> Result<()> {
        self.worker
            .await
            .map_err(|e| RelayError::Transport(format!("session worker failed: {e}")))
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

async fn run(
    mut machine: SessionMachine,
    mut inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SessionState>,
) {
    let mut requery_at: Option<Instant> = None;

    loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(event) => {
                    let closed = matches!(event, ChannelEvent::Closed { .. });
                    if let Err(e) = machine.handle_channel_event(event) {
                        warn!(error = %e, "inbound frame rejected");
                    }
                    if closed {
                        break;
                    }
                }
                None => {
                    machine.on_closed(None, "channel dropped");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Execute(op, reply)) => {
                    let _ = reply.send(machine.execute(op));
                }
                Some(Command::Snapshot(reply)) => {
                    let _ = reply.send(machine.session().clone());
                }
                Some(Command::Close) | None => {
                    debug!("close requested");
                    machine.close();
                    break;
                }
            },
            _ = wait_until(requery_at) => {
                requery_at = None;
                if let Err(e) = machine.poll_headsets() {
                    warn!(error = %e, "headset re-query failed");
                }
            }
        }

        if let Some(delay) = machine.take_scheduled_requery() {
            requery_at = Some(Instant::now() + delay);
        }
        state.send_replace(machine.state());
    }

    state.send_replace(machine.state());
    info!(state = %machine.state(), "session worker stopped");
}
