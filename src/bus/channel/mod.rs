//! In-process broker for tests and local runs.
//!
//! Mirrors the observable behaviour of a RabbitMQ fanout exchange with named
//! queues: every publish copies the message into each queue bound at that
//! moment, deliveries stay unacked until acknowledged, and closing a
//! subscription puts its unacked deliveries back at the head of the queue
//! flagged as redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{
    Acker, Binding, Broker, BusError, DeliveryHandle, Exchange, OutboundMessage, Result,
    Subscription,
};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    content_type: String,
    redelivered: bool,
}

struct Unacked {
    consumer: u64,
    message: Message,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Unacked>,
}

struct Queue {
    durable: bool,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a consumer's unacked deliveries to the head of the queue,
    /// preserving their original delivery order.
    fn requeue_consumer(&self, consumer: u64) -> usize {
        let mut state = self.lock();
        let mut tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, u)| u.consumer == consumer)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.iter().rev() {
            if let Some(unacked) = state.unacked.remove(tag) {
                let mut message = unacked.message;
                message.redelivered = true;
                state.ready.push_front(message);
            }
        }
        drop(state);

        if !tags.is_empty() {
            self.notify.notify_waiters();
        }
        tags.len()
    }

    /// Remove an unacked delivery, returning whether it existed.
    fn settle(&self, tag: u64) -> bool {
        let removed = self.lock().unacked.remove(&tag).is_some();
        if removed {
            self.notify.notify_waiters();
        }
        removed
    }
}

struct ExchangeState {
    durable: bool,
    bound: Vec<String>,
}

#[derive(Default)]
struct Topology {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, Arc<Queue>>,
}

#[derive(Default)]
struct Inner {
    topology: Mutex<Topology>,
    next_tag: AtomicU64,
    next_consumer: AtomicU64,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn wake_all(&self) {
        for queue in self.topology().queues.values() {
            queue.notify.notify_waiters();
        }
    }
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
}

/// In-process fanout broker. Clones share the same state.
#[derive(Clone, Default)]
pub struct ChannelBroker {
    inner: Arc<Inner>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting and in flight for a queue, or `None` if undeclared.
    pub fn queue_stats(&self, queue: &str) -> Option<QueueStats> {
        let topology = self.inner.topology();
        let queue = topology.queues.get(queue)?;
        let state = queue.lock();
        Some(QueueStats {
            ready: state.ready.len(),
            unacked: state.unacked.len(),
        })
    }

    /// Drop every live subscription as if the broker connection had been
    /// lost. Their unacked deliveries are requeued; the broker itself stays
    /// usable for new subscriptions.
    pub fn interrupt_consumers(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.wake_all();
        info!("Channel broker interrupted all consumers");
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn declare_exchange(&self, exchange: &Exchange) -> Result<()> {
        self.inner.ensure_open()?;
        let mut topology = self.inner.topology();

        match topology.exchanges.get(&exchange.name) {
            Some(existing) if existing.durable != exchange.durable => {
                Err(BusError::Topology(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for exchange '{}'",
                    exchange.name
                )))
            }
            Some(_) => Ok(()),
            None => {
                topology.exchanges.insert(
                    exchange.name.clone(),
                    ExchangeState {
                        durable: exchange.durable,
                        bound: Vec::new(),
                    },
                );
                debug!(exchange = %exchange.name, "Declared exchange");
                Ok(())
            }
        }
    }

    async fn declare_binding(&self, binding: &Binding) -> Result<()> {
        self.inner.ensure_open()?;
        let mut topology = self.inner.topology();

        if !topology.exchanges.contains_key(&binding.exchange) {
            return Err(BusError::Topology(format!(
                "NOT_FOUND - no exchange '{}'",
                binding.exchange
            )));
        }

        match topology.queues.get(&binding.queue) {
            Some(queue) if queue.durable != binding.durable => {
                return Err(BusError::Topology(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
                    binding.queue
                )));
            }
            Some(_) => {}
            None => {
                topology
                    .queues
                    .insert(binding.queue.clone(), Arc::new(Queue::new(binding.durable)));
            }
        }

        if let Some(exchange) = topology.exchanges.get_mut(&binding.exchange) {
            if !exchange.bound.contains(&binding.queue) {
                exchange.bound.push(binding.queue.clone());
            }
        }

        debug!(
            exchange = %binding.exchange,
            queue = %binding.queue,
            "Bound queue to exchange"
        );
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: OutboundMessage) -> Result<()> {
        self.inner.ensure_open()?;
        let topology = self.inner.topology();

        let state = topology
            .exchanges
            .get(exchange)
            .ok_or_else(|| BusError::Publish(format!("NOT_FOUND - no exchange '{}'", exchange)))?;

        let mut copies = 0;
        for queue_name in &state.bound {
            if let Some(queue) = topology.queues.get(queue_name) {
                queue.lock().ready.push_back(Message {
                    payload: message.payload.clone(),
                    content_type: message.content_type.to_string(),
                    redelivered: false,
                });
                queue.notify.notify_waiters();
                copies += 1;
            }
        }

        debug!(exchange = %exchange, copies, "Published message");
        Ok(())
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Subscription>> {
        self.inner.ensure_open()?;
        let handle = self
            .inner
            .topology()
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| BusError::Subscribe(format!("NOT_FOUND - no queue '{}'", queue)))?;

        let consumer = self.inner.next_consumer.fetch_add(1, Ordering::SeqCst);
        debug!(queue = %queue, consumer, prefetch, "Channel consumer attached");

        Ok(Box::new(ChannelSubscription {
            inner: Arc::clone(&self.inner),
            queue: handle,
            consumer,
            prefetch: usize::from(prefetch),
            generation: self.inner.generation.load(Ordering::SeqCst),
            released: false,
        }))
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.wake_all();
        info!("Channel broker closed");
    }
}

/// Consumer attached to a [`ChannelBroker`] queue.
struct ChannelSubscription {
    inner: Arc<Inner>,
    queue: Arc<Queue>,
    consumer: u64,
    /// Zero means unlimited.
    prefetch: usize,
    generation: u64,
    released: bool,
}

impl ChannelSubscription {
    fn is_live(&self) -> bool {
        !self.released
            && !self.inner.closed.load(Ordering::SeqCst)
            && self.inner.generation.load(Ordering::SeqCst) == self.generation
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let requeued = self.queue.requeue_consumer(self.consumer);
            if requeued > 0 {
                debug!(consumer = self.consumer, requeued, "Requeued unacked deliveries");
            }
        }
    }

    fn try_take(&self) -> Option<DeliveryHandle> {
        let mut state = self.queue.lock();

        let in_flight = state
            .unacked
            .values()
            .filter(|u| u.consumer == self.consumer)
            .count();
        if self.prefetch > 0 && in_flight >= self.prefetch {
            return None;
        }

        let message = state.ready.pop_front()?;
        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = DeliveryHandle::new(
            message.payload.clone(),
            Some(message.content_type.clone()),
            tag,
            message.redelivered,
            Box::new(ChannelAcker {
                queue: Arc::clone(&self.queue),
                tag,
            }),
        );
        state.unacked.insert(
            tag,
            Unacked {
                consumer: self.consumer,
                message,
            },
        );
        Some(handle)
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next_delivery(&mut self) -> Option<Result<DeliveryHandle>> {
        loop {
            if !self.is_live() {
                self.release();
                return None;
            }

            // Register for wakeups before inspecting the queue so a publish
            // between the check and the await is not missed.
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_live() {
                continue;
            }
            if let Some(delivery) = self.try_take() {
                return Some(Ok(delivery));
            }

            notified.await;
        }
    }

    async fn close(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct ChannelAcker {
    queue: Arc<Queue>,
    tag: u64,
}

impl Acker for ChannelAcker {
    fn ack(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            if self.queue.settle(self.tag) {
                Ok(())
            } else {
                Err(BusError::Ack(format!("unknown delivery tag {}", self.tag)))
            }
        })
    }

    fn reject(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            if self.queue.settle(self.tag) {
                Ok(())
            } else {
                Err(BusError::Ack(format!("unknown delivery tag {}", self.tag)))
            }
        })
    }
}
