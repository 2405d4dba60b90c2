//! In-process message broker with one queue per task kind.
//!
//! A [`Delivery`] is acknowledged explicitly once its result is persisted. Dropping an
//! unacknowledged delivery (a crashed or aborted worker) puts the message back on its queue.
//! Delayed messages are held by the broker itself, so they outlive the workers that
//! scheduled them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{PipelineError, TaskKind};

const TARGET: &str = "pressroom::tasks::broker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub task_id: Uuid,
    pub kind: TaskKind,
    /// Times this message was handed back after an unacknowledged delivery.
    pub redeliveries: u32,
}

impl Envelope {
    pub fn new(task_id: Uuid, kind: TaskKind) -> Self {
        Self {
            task_id,
            kind,
            redeliveries: 0,
        }
    }
}

struct Scheduled {
    due: Instant,
    envelope: Envelope,
}

struct Queue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
    scheduled: Mutex<Vec<Scheduled>>,
    wake: Notify,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: AsyncMutex::new(receiver),
            scheduled: Mutex::new(Vec::new()),
            wake: Notify::new(),
        }
    }

    fn scheduled(&self) -> MutexGuard<'_, Vec<Scheduled>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, envelope: Envelope) -> Result<(), PipelineError> {
        self.sender
            .send(envelope)
            .map_err(|_| PipelineError::QueueClosed(envelope.kind))
    }

    fn schedule(&self, envelope: Envelope, due: Instant) {
        self.scheduled().push(Scheduled { due, envelope });
        self.wake.notify_one();
    }

    /// Remove the earliest message that is due, or report when the next one will be.
    fn take_due(&self, now: Instant) -> Result<Envelope, Option<Instant>> {
        let mut scheduled = self.scheduled();
        let earliest = scheduled
            .iter()
            .enumerate()
            .min_by_key(|(_, item)| item.due)
            .map(|(index, item)| (index, item.due));
        match earliest {
            Some((index, due)) if due <= now => Ok(scheduled.swap_remove(index).envelope),
            Some((_, due)) => Err(Some(due)),
            None => Err(None),
        }
    }
}

pub struct Broker {
    queues: HashMap<TaskKind, Arc<Queue>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::for_kinds(TaskKind::ALL)
    }

    /// A broker carrying only `kinds`. Publishing any other kind fails with
    /// [`PipelineError::QueueClosed`].
    pub fn for_kinds(kinds: impl IntoIterator<Item = TaskKind>) -> Self {
        let queues = kinds
            .into_iter()
            .map(|kind| (kind, Arc::new(Queue::new())))
            .collect();
        Self { queues }
    }

    fn queue(&self, kind: TaskKind) -> Result<&Arc<Queue>, PipelineError> {
        self.queues.get(&kind).ok_or(PipelineError::QueueClosed(kind))
    }

    pub fn publish(&self, envelope: Envelope) -> Result<(), PipelineError> {
        self.queue(envelope.kind)?.send(envelope)
    }

    /// Hold `envelope` until `delay` has passed, then hand it to the next consumer of its kind.
    pub fn publish_after(&self, envelope: Envelope, delay: Duration) -> Result<(), PipelineError> {
        self.queue(envelope.kind)?
            .schedule(envelope, Instant::now() + delay);
        debug!(
            target = TARGET,
            op = "publish_after",
            task_id = %envelope.task_id,
            kind = %envelope.kind,
            delay_ms = delay.as_millis() as u64,
            "message scheduled"
        );
        Ok(())
    }

    /// Delayed messages of `kind` not yet handed to a consumer.
    pub fn scheduled_len(&self, kind: TaskKind) -> usize {
        self.queues
            .get(&kind)
            .map_or(0, |queue| queue.scheduled().len())
    }

    /// A consumer for one queue. Consumers of the same kind share the queue, each message goes
    /// to exactly one of them.
    pub fn consumer(&self, kind: TaskKind) -> Option<Consumer> {
        Some(Consumer {
            queue: Arc::clone(self.queues.get(&kind)?),
        })
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Consumer {
    queue: Arc<Queue>,
}

impl Consumer {
    /// Wait for the next message, ready or scheduled. Only one message is held per call, so a
    /// caller that processes deliveries one at a time never prefetches.
    pub async fn next(&self) -> Option<Delivery> {
        let mut receiver = self.queue.receiver.lock().await;
        loop {
            let next_due = match self.queue.take_due(Instant::now()) {
                Ok(envelope) => return Some(self.deliver(envelope)),
                Err(next_due) => next_due,
            };
            let sleep = async {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                received = receiver.recv() => {
                    return received.map(|envelope| self.deliver(envelope));
                }
                _ = self.queue.wake.notified() => {}
                _ = sleep => {}
            }
        }
    }

    fn deliver(&self, envelope: Envelope) -> Delivery {
        Delivery {
            envelope,
            queue: Some(Arc::clone(&self.queue)),
        }
    }
}

pub struct Delivery {
    envelope: Envelope,
    queue: Option<Arc<Queue>>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("acked", &self.queue.is_none())
            .finish()
    }
}

impl Delivery {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn ack(mut self) {
        self.queue = None;
    }

    /// Give the message back after `delay` without counting a redelivery. For workers that
    /// could not start the task, as opposed to ones that died running it.
    pub fn release(mut self, delay: Duration) {
        if let Some(queue) = self.queue.take() {
            queue.schedule(self.envelope, Instant::now() + delay);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        let envelope = Envelope {
            redeliveries: self.envelope.redeliveries.saturating_add(1),
            ..self.envelope
        };
        warn!(
            target = TARGET,
            op = "redeliver",
            task_id = %envelope.task_id,
            kind = %envelope.kind,
            redeliveries = envelope.redeliveries,
            "unacknowledged delivery returned to queue"
        );
        let _ = queue.send(envelope);
    }
}
