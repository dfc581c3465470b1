//! In-memory implementation of the EventBus trait for testing and development

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Notify;

use crate::{Acknowledge, BusError, BusMessage, BusResult, Delivery, Disposition, EventBus};

/// EventBus implementation with durable in-process queues
///
/// Mirrors the broker semantics the services rely on:
/// - a queue exists from its first `subscribe` and keeps collecting
///   messages while nobody consumes it
/// - every queue whose bindings match a subject gets its own copy
/// - subscribers of the same queue compete for its messages
/// - a requeued or dropped-unsettled delivery goes back to the head of
///   its queue with its delivery count preserved
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// let mut stream = bus
///     .subscribe("job-service.company-events", &["jobfair.events.company.*".to_string()])
///     .await?;
///
/// bus.publish("jobfair.events.company.deleted", b"{}".to_vec()).await?;
///
/// let delivery = stream.next().await.unwrap()?;
/// assert_eq!(delivery.message.subject, "jobfair.events.company.deleted");
/// assert_eq!(delivery.attempt, 1);
/// delivery.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    queues: HashMap<String, QueueState>,
    published: Vec<BusMessage>,
    closed: bool,
}

#[derive(Default)]
struct QueueState {
    bindings: Vec<String>,
    ready: VecDeque<Queued>,
    in_flight: usize,
    notify: Arc<Notify>,
}

struct Queued {
    message: BusMessage,
    deliveries: u64,
}

enum Next {
    Ready(Queued),
    Empty,
    Closed,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_next(state: &Mutex<BusState>, queue: &str) -> Next {
    let mut guard = lock(state);
    if guard.closed {
        return Next::Closed;
    }

    let Some(queue) = guard.queues.get_mut(queue) else {
        return Next::Closed;
    };

    match queue.ready.pop_front() {
        Some(item) => {
            queue.in_flight += 1;
            Next::Ready(item)
        }
        None => Next::Empty,
    }
}

/// Check if a subject matches a subscription pattern
///
/// Supports NATS-style wildcards:
/// - `*` matches exactly one token
/// - `>` matches one or more tokens
pub(crate) fn matches_pattern(subject: &str, pattern: &str) -> bool {
    let subject_tokens: Vec<&str> = subject.split('.').collect();
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();

    let mut s_idx = 0;
    let mut p_idx = 0;

    while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
        let pattern_token = pattern_tokens[p_idx];

        if pattern_token == ">" {
            return true;
        } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
            s_idx += 1;
            p_idx += 1;
        } else {
            return false;
        }
    }

    s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far whose subject matches `pattern`, in publish order
    pub fn published(&self, pattern: &str) -> Vec<BusMessage> {
        lock(&self.state)
            .published
            .iter()
            .filter(|m| matches_pattern(&m.subject, pattern))
            .cloned()
            .collect()
    }

    /// Messages waiting in `queue`, not counting unsettled deliveries
    pub fn queue_depth(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Deliveries of `queue` handed out and not yet settled
    pub fn in_flight(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map(|q| q.in_flight)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let mut guard = lock(&self.state);
        if guard.closed {
            return Err(BusError::Closed);
        }

        let state = &mut *guard;
        let message = BusMessage::new(subject.to_string(), payload);

        for queue in state.queues.values_mut() {
            if queue.bindings.iter().any(|p| matches_pattern(subject, p)) {
                queue.ready.push_back(Queued {
                    message: message.clone(),
                    deliveries: 0,
                });
                queue.notify.notify_one();
            }
        }

        state.published.push(message);
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        subjects: &[String],
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        if subjects.is_empty() {
            return Err(BusError::InvalidSubject(format!("queue {queue} has no bindings")));
        }

        let notify = {
            let mut guard = lock(&self.state);
            if guard.closed {
                return Err(BusError::Closed);
            }

            let entry = guard.queues.entry(queue.to_string()).or_default();
            for subject in subjects {
                if !entry.bindings.contains(subject) {
                    entry.bindings.push(subject.clone());
                }
            }
            entry.notify.clone()
        };

        let state = self.state.clone();
        let queue = queue.to_string();

        let stream = async_stream::stream! {
            loop {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match take_next(&state, &queue) {
                    Next::Ready(mut item) => {
                        item.deliveries += 1;
                        let message = item.message.clone();
                        let attempt = item.deliveries;
                        let acker = InMemoryAcker {
                            state: state.clone(),
                            queue: queue.clone(),
                            item: Some(item),
                        };
                        yield Ok(Delivery::new(message, attempt, Box::new(acker)));
                    }
                    Next::Empty => notified.await,
                    Next::Closed => break,
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        let mut guard = lock(&self.state);
        if guard.closed {
            return Ok(());
        }

        guard.closed = true;
        for queue in guard.queues.values() {
            queue.notify.notify_waiters();
        }
        Ok(())
    }
}

struct InMemoryAcker {
    state: Arc<Mutex<BusState>>,
    queue: String,
    item: Option<Queued>,
}

impl InMemoryAcker {
    fn finish(&mut self, disposition: Disposition) {
        let Some(item) = self.item.take() else {
            return;
        };

        let mut guard = lock(&self.state);
        if let Some(queue) = guard.queues.get_mut(&self.queue) {
            queue.in_flight = queue.in_flight.saturating_sub(1);
            if disposition == Disposition::Requeue {
                queue.ready.push_front(item);
                queue.notify.notify_one();
            }
        }
    }
}

#[async_trait]
impl Acknowledge for InMemoryAcker {
    async fn settle(&mut self, disposition: Disposition) -> BusResult<()> {
        self.finish(disposition);
        Ok(())
    }
}

impl Drop for InMemoryAcker {
    fn drop(&mut self) {
        self.finish(Disposition::Requeue);
    }
}
