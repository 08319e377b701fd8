//! # Query bridge
//!
//! ## Responsibility
//! Forwards a stream of records to a remote inference endpoint and lets a
//! caller ask, at any moment, for one synchronous answer.
//!
//! Three threads of control share one trigger slot:
//! - producers push records through [`QueryBridge::records`] at their own pace
//! - the transmitter task sends one queued record per tick as
//!   `{"triggered": bool, "values": record}`, consuming the armed flag
//! - the receive task treats every inbound message as the reply to the most
//!   recent trigger and wakes the waiting callers
//!
//! ## Guarantees
//! - At most one trigger outstanding: a second `trigger()` before the reply
//!   waits on the first instead of arming again
//! - Closing the channel (either side) wakes every blocked `trigger()` with
//!   `ChannelClosed`
//! - `trigger(Some(Duration::ZERO))` never blocks
//!
//! ## Caveats
//! - The armed flag rides on whichever record is dequeued *after* `trigger()`
//!   runs, not on the record that was newest when it was called
//! - A timed-out trigger stays outstanding. A later `trigger()` made before
//!   the reply arrives waits on it; a reply that lands between the two calls
//!   is discarded when the next call re-arms
//! - Any inbound message counts as the reply, including acknowledgements of
//!   untriggered records if the endpoint sends them

use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, ChannelHandle};
use crate::config::BridgeConfig;
use crate::error::{RelayError, Result};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Trigger bookkeeping guarded by one mutex.
#[derive(Debug, Default)]
struct TriggerSlot {
    /// Next transmitted record carries `triggered: true`.
    armed: bool,
    /// A trigger was armed and no reply has arrived since.
    awaiting_reply: bool,
    last_reply: Option<Value>,
    open: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<TriggerSlot>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TriggerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_closed(&self) {
        let mut slot = self.lock();
        if !slot.closed {
            slot.closed = true;
            slot.open = false;
            slot.armed = false;
            self.signal.notify_all();
        }
    }

    fn deliver(&self, reply: Value) {
        let mut slot = self.lock();
        slot.last_reply = Some(reply);
        slot.awaiting_reply = false;
        self.signal.notify_all();
    }

    fn trigger(&self, timeout: Option<Duration>) -> Result<Value> {
        let mut slot = self.lock();
        if slot.closed {
            return Err(RelayError::ChannelClosed);
        }
        if slot.awaiting_reply {
            debug!("trigger already outstanding, waiting on it");
        } else {
            slot.last_reply = None;
            slot.awaiting_reply = true;
            slot.armed = true;
            debug!("trigger armed");
        }

        // A timeout too large for `Instant` waits indefinitely.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if slot.closed {
                return Err(RelayError::ChannelClosed);
            }
            if !slot.awaiting_reply {
                if let Some(reply) = &slot.last_reply {
                    return Ok(reply.clone());
                }
            }
            slot = match deadline {
                None => self.signal.wait(slot).unwrap_or_else(PoisonError::into_inner),
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(RelayError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.signal
                        .wait_timeout(slot, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

// ---------------------------------------------------------------------------
// QueryBridge
// ---------------------------------------------------------------------------

/// Record forwarder with trigger-and-wait replies.
#[derive(Debug)]
pub struct QueryBridge {
    shared: Arc<Shared>,
    records: mpsc::UnboundedSender<Value>,
    channel: ChannelHandle,
    default_timeout: Option<Duration>,
    transmitter: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

impl QueryBridge {
    /// Open a websocket to `config.url`. Must be called inside a tokio runtime.
    pub fn connect(config: &BridgeConfig) -> Self {
        Self::with_channel(config, Channel::open(config.url.clone()))
    }

    /// Run the bridge over an existing channel.
    pub fn with_channel(config: &BridgeConfig, channel: Channel) -> Self {
        let Channel { handle, events } = channel;
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let transmitter = tokio::spawn(transmit(
            Arc::clone(&shared),
            rx,
            handle.clone(),
            config.poll_interval(),
        ));
        let receiver = tokio::spawn(receive(Arc::clone(&shared), events));

        Self {
            shared,
            records: tx,
            channel: handle,
            default_timeout: config.trigger_timeout(),
            transmitter,
            receiver,
        }
    }

    /// Producer handle; clone it into whatever generates records.
    pub fn records(&self) -> mpsc::UnboundedSender<Value> {
        self.records.clone()
    }

    /// Queue one record. Fails once the bridge has shut down.
    pub fn push(&self, record: Value) -> Result<()> {
        self.records.send(record).map_err(|_| RelayError::ChannelClosed)
    }

    /// Arm the next record and block until a reply arrives.
    ///
    /// `None` waits indefinitely. Blocks the calling thread; async callers
    /// use [`trigger_async`](Self::trigger_async).
    pub fn trigger(&self, timeout: Option<Duration>) -> Result<Value> {
        self.shared.trigger(timeout)
    }

    /// [`trigger`](Self::trigger) with the configured default timeout.
    pub fn trigger_default(&self) -> Result<Value> {
        self.shared.trigger(self.default_timeout)
    }

    /// [`trigger`](Self::trigger) on the blocking pool.
    pub async fn trigger_async(&self, timeout: Option<Duration>) -> Result<Value> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.trigger(timeout))
            .await
            .map_err(|e| RelayError::Transport(format!("trigger task failed: {e}")))?
    }

    /// [`trigger_async`](Self::trigger_async) that gives up when `cancel`
    /// completes first. Cancelling closes the bridge so the blocked waiter
    /// wakes, and returns `Ok(None)`.
    pub async fn trigger_until<F>(&self, timeout: Option<Duration>, cancel: F) -> Result<Option<Value>>
    where
        F: Future,
    {
        tokio::select! {
            result = self.trigger_async(timeout) => result.map(Some),
            _ = cancel => {
                info!("trigger cancelled");
                self.close();
                Ok(None)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Whether a trigger is waiting for its reply.
    pub fn is_awaiting_reply(&self) -> bool {
        self.shared.lock().awaiting_reply
    }

    /// Close the channel and wake every waiter.
    pub fn close(&self) {
        info!("closing query bridge");
        self.channel.close();
        self.shared.mark_closed();
    }
}

impl Drop for QueryBridge {
    fn drop(&mut self) {
        self.shared.mark_closed();
        self.transmitter.abort();
        self.receiver.abort();
    }
}

async fn transmit(
    shared: Arc<Shared>,
    mut queue: mpsc::UnboundedReceiver<Value>,
    channel: ChannelHandle,
    every: Duration,
) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        {
            let slot = shared.lock();
            if slot.closed {
                break;
            }
            if !slot.open {
                continue;
            }
        }

        let record = match queue.try_recv() {
            Ok(record) => record,
            Err(TryRecvError::Empty) => continue,
            Err(TryRecvError::Disconnected) => break,
        };

        let triggered = std::mem::take(&mut shared.lock().armed);
        if triggered {
            debug!("sending triggered record");
        }
        let frame = json!({ "triggered": triggered, "values": record });
        if let Err(e) = channel.send(frame.to_string()) {
            warn!(error = %e, "bridge send failed");
            shared.mark_closed();
            break;
        }
    }
    debug!("bridge transmitter stopped");
}

async fn receive(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Open => {
                info!("query bridge open");
                shared.lock().open = true;
            }
            ChannelEvent::Message(text) => {
                let reply = match serde_json::from_str::<Value>(&text) {
                    Ok(v) => v,
                    Err(_) => Value::String(text),
                };
                debug!(reply = %reply, "bridge reply");
                shared.deliver(reply);
            }
            ChannelEvent::Error(e) => {
                warn!(error = %e, "query bridge channel error");
                shared.mark_closed();
            }
            ChannelEvent::Closed { code, reason } => {
                info!(code = ?code, reason = %reason, "query bridge closed");
                shared.mark_closed();
                return;
            }
        }
    }
    shared.mark_closed();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_returns_timeout_without_blocking() {
        let shared = Shared::default();
        let err = shared.trigger(Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, RelayError::Timeout(d) if d == Duration::ZERO));
        let slot = shared.lock();
        assert!(slot.armed);
        assert!(slot.awaiting_reply);
    }

    #[test]
    fn second_trigger_does_not_rearm() {
        let shared = Shared::default();
        let _ = shared.trigger(Some(Duration::ZERO));
        std::mem::take(&mut shared.lock().armed);
        let _ = shared.trigger(Some(Duration::ZERO));
        assert!(!shared.lock().armed);
    }

    #[test]
    fn reply_between_triggers_is_discarded() {
        let shared = Shared::default();
        let _ = shared.trigger(Some(Duration::ZERO));
        shared.deliver(json!({"text": "left"}));
        assert_eq!(shared.trigger(Some(Duration::ZERO)).ok(), None);
        // The late reply was discarded by the re-arm above.
        assert!(shared.lock().last_reply.is_none());
    }

    #[test]
    fn waiter_receives_reply_from_another_thread() {
        let shared = Arc::new(Shared::default());
        let s = Arc::clone(&shared);
        let waiter = std::thread::spawn(move || s.trigger(Some(Duration::from_secs(5))));
        while !shared.lock().awaiting_reply {
            std::thread::yield_now();
        }
        shared.deliver(json!({"text": "hello"}));
        assert_eq!(waiter.join().unwrap().unwrap(), json!({"text": "hello"}));
    }

    #[test]
    fn unrepresentable_timeout_waits_for_the_reply() {
        let shared = Arc::new(Shared::default());
        let s = Arc::clone(&shared);
        let waiter = std::thread::spawn(move || s.trigger(Some(Duration::MAX)));
        while !shared.lock().awaiting_reply {
            std::thread::yield_now();
        }
        shared.deliver(json!({"text": "late"}));
        assert_eq!(waiter.join().unwrap().unwrap(), json!({"text": "late"}));
    }

    #[test]
    fn closed_slot_rejects_and_wakes() {
        let shared = Arc::new(Shared::default());
        let s = Arc::clone(&shared);
        let waiter = std::thread::spawn(move || s.trigger(None));
        while !shared.lock().awaiting_reply {
            std::thread::yield_now();
        }
        shared.mark_closed();
        assert!(matches!(waiter.join().unwrap(), Err(RelayError::ChannelClosed)));
        assert!(matches!(shared.trigger(None), Err(RelayError::ChannelClosed)));
    }
}
