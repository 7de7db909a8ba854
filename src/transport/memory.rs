//! In-process broker.
//!
//! Queues live in a shared map guarded by a mutex; subscribers park on a
//! [`Notify`] until something changes. Semantics follow the AMQP backend
//! closely enough for the relay engine not to notice: prefetch of one per
//! connection, transactional send+ack, and requeue of unacknowledged
//! deliveries when a connection goes away.
//!
//! Failure injection hooks let tests simulate an unreachable broker, a
//! commit that fails mid-flight, or a broker that refuses an operation
//! while the connection stays up.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    Connection, Connector, Delivery, Envelope, Subscription, Transaction, TransportError,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    content_type: Option<String>,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    conn_id: u64,
    queue: String,
    message: StoredMessage,
}

/// Counters for operations the broker has applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Connections opened successfully.
    pub connects: u64,
    pub published: u64,
    pub acks: u64,
    pub nacks: u64,
    pub commits: u64,
    pub aborts: u64,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    next_conn: u64,
    fail_connects: u32,
    fail_sends: u32,
    fail_commits: u32,
    reject_sends: u32,
    reject_commits: u32,
    closed: bool,
    stats: BrokerStats,
}

impl BrokerState {
    fn push(&mut self, envelope: &Envelope) {
        self.queues
            .entry(envelope.queue.clone())
            .or_default()
            .push_back(StoredMessage {
                content_type: Some(envelope.content_type.clone()),
                body: envelope.body.clone(),
                redelivered: false,
            });
        self.stats.published += 1;
    }

    fn take_send_failure(&mut self) -> Result<(), TransportError> {
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            return Err(TransportError::Connection("broker unreachable".to_string()));
        }
        if self.reject_sends > 0 {
            self.reject_sends -= 1;
            return Err(TransportError::Protocol("broker rejected message".to_string()));
        }
        Ok(())
    }

    fn requeue(&mut self, tag: u64) -> bool {
        match self.unacked.remove(&tag) {
            Some(entry) => {
                let mut message = entry.message;
                message.redelivered = true;
                self.queues.entry(entry.queue).or_default().push_front(message);
                true
            }
            None => false,
        }
    }
}

struct Inner {
    state: Mutex<BrokerState>,
    changed: Notify,
}

/// Shared handle to an in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                changed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.inner.changed.notify_waiters();
    }

    /// A connector handing out connections to this broker.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Enqueue a message directly, bypassing any connection.
    pub fn publish(&self, envelope: &Envelope) {
        self.lock().push(envelope);
        self.wake();
    }

    /// Bodies currently waiting in `queue`, front first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove and return every message waiting in `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Deliveries handed out and not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Make the next `n` sends fail, transactional or not.
    pub fn fail_next_sends(&self, n: u32) {
        self.lock().fail_sends = n;
    }

    /// Make the next `n` commits fail and discard their contents.
    pub fn fail_next_commits(&self, n: u32) {
        self.lock().fail_commits = n;
    }

    /// Make the next `n` sends come back negatively confirmed. The
    /// connection stays usable.
    pub fn reject_next_sends(&self, n: u32) {
        self.lock().reject_sends = n;
    }

    /// Make the next `n` commits be refused without touching the connection.
    pub fn reject_next_commits(&self, n: u32) {
        self.lock().reject_commits = n;
    }

    /// End every subscription once its queue runs dry.
    pub fn close_subscriptions(&self) {
        self.lock().closed = true;
        self.wake();
    }
}

/// [`Connector`] for a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let id = {
            let mut state = self.broker.lock();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(TransportError::Connection(
                    "connection refused".to_string(),
                ));
            }
            state.next_conn += 1;
            state.stats.connects += 1;
            state.next_conn
        };
        Ok(Box::new(MemoryConnection {
            broker: self.broker.clone(),
            id,
        }))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let requeued = {
            let mut state = self.broker.lock();
            let mut tags: Vec<u64> = state
                .unacked
                .iter()
                .filter(|(_, entry)| entry.conn_id == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            // push_front reverses order, so walk newest first
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in &tags {
                state.requeue(*tag);
            }
            tags.len()
        };
        if requeued > 0 {
            tracing::debug!(
                "Connection {} closed with {} unacknowledged deliveries; requeued",
                self.id,
                requeued
            );
            self.broker.wake();
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn subscribe(&mut self, queue: &str) -> Result<Box<dyn Subscription>, TransportError> {
        self.broker.lock().queues.entry(queue.to_string()).or_default();
        Ok(Box::new(MemorySubscription {
            broker: self.broker.clone(),
            conn_id: self.id,
            queue: queue.to_string(),
        }))
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        {
            let mut state = self.broker.lock();
            state.take_send_failure()?;
            state.push(envelope);
        }
        self.broker.wake();
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<Box<dyn Transaction>, TransportError> {
        Ok(Box::new(MemoryTransaction {
            broker: self.broker.clone(),
            sends: Vec::new(),
            acks: Vec::new(),
        }))
    }

    async fn acknowledge(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        {
            let mut state = self.broker.lock();
            if state.unacked.remove(&delivery.delivery_tag).is_none() {
                return Err(TransportError::Protocol(format!(
                    "unknown delivery tag {}",
                    delivery.delivery_tag
                )));
            }
            state.stats.acks += 1;
        }
        self.broker.wake();
        Ok(())
    }

    async fn negative_acknowledge(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        {
            let mut state = self.broker.lock();
            if !state.requeue(delivery.delivery_tag) {
                return Err(TransportError::Protocol(format!(
                    "unknown delivery tag {}",
                    delivery.delivery_tag
                )));
            }
            state.stats.nacks += 1;
        }
        self.broker.wake();
        Ok(())
    }
}

struct MemorySubscription {
    broker: MemoryBroker,
    conn_id: u64,
    queue: String,
}

impl MemorySubscription {
    fn try_take(&self) -> Option<Option<Delivery>> {
        let mut state = self.broker.lock();

        // prefetch = 1
        let busy = state
            .unacked
            .values()
            .any(|entry| entry.conn_id == self.conn_id && entry.queue == self.queue);
        let message = if busy {
            None
        } else {
            state.queues.get_mut(&self.queue).and_then(VecDeque::pop_front)
        };

        match message {
            Some(message) => {
                state.next_tag += 1;
                let tag = state.next_tag;
                let delivery = Delivery {
                    queue: self.queue.clone(),
                    delivery_tag: tag,
                    content_type: message.content_type.clone(),
                    body: message.body.clone(),
                    redelivered: message.redelivered,
                };
                state.unacked.insert(
                    tag,
                    Unacked {
                        conn_id: self.conn_id,
                        queue: self.queue.clone(),
                        message,
                    },
                );
                Some(Some(delivery))
            }
            None if state.closed && !busy => Some(None),
            None => None,
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            let notified = self.broker.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.try_take() {
                return Ok(result);
            }
            notified.await;
        }
    }
}

struct MemoryTransaction {
    broker: MemoryBroker,
    sends: Vec<Envelope>,
    acks: Vec<u64>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.broker.lock().take_send_failure()?;
        self.sends.push(envelope.clone());
        Ok(())
    }

    async fn acknowledge(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.acks.push(delivery.delivery_tag);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        let sends = std::mem::take(&mut self.sends);
        let acks = std::mem::take(&mut self.acks);
        {
            let mut state = self.broker.lock();
            if state.fail_commits > 0 {
                state.fail_commits -= 1;
                return Err(TransportError::Connection(
                    "connection lost during commit".to_string(),
                ));
            }
            if state.reject_commits > 0 {
                state.reject_commits -= 1;
                return Err(TransportError::Protocol("transaction refused".to_string()));
            }
            if let Some(tag) = acks.iter().find(|tag| !state.unacked.contains_key(tag)) {
                return Err(TransportError::Protocol(format!(
                    "unknown delivery tag {}",
                    tag
                )));
            }
            for envelope in &sends {
                state.push(envelope);
            }
            for tag in &acks {
                state.unacked.remove(tag);
            }
            state.stats.acks += acks.len() as u64;
            state.stats.commits += 1;
        }
        self.broker.wake();
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), TransportError> {
        self.sends.clear();
        self.acks.clear();
        self.broker.lock().stats.aborts += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn envelope(queue: &str, body: &[u8]) -> Envelope {
        Envelope {
            queue: queue.to_string(),
            content_type: "application/json".to_string(),
            body: body.to_vec(),
            persistent: true,
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("q").await.unwrap();

        conn.send(&envelope("q", b"one")).await.unwrap();
        let delivery = sub.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"one");
        assert!(!delivery.redelivered);
        assert_eq!(broker.unacked_count(), 1);

        conn.acknowledge(&delivery).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.depth("q"), 0);
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("q").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(&envelope("q", b"late"));
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, b"late");
    }

    #[tokio::test]
    async fn test_transaction_is_atomic() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"job"));
        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("in").await.unwrap();
        let delivery = sub.next().await.unwrap().unwrap();

        let mut tx = conn.begin_transaction().await.unwrap();
        tx.send(&envelope("out", b"result")).await.unwrap();
        tx.acknowledge(&delivery).await.unwrap();
        assert_eq!(broker.depth("out"), 0);
        assert_eq!(broker.unacked_count(), 1);

        tx.commit().await.unwrap();
        assert_eq!(broker.messages("out"), vec![b"result".to_vec()]);
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"job"));
        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("in").await.unwrap();
        let delivery = sub.next().await.unwrap().unwrap();

        broker.fail_next_commits(1);
        let mut tx = conn.begin_transaction().await.unwrap();
        tx.send(&envelope("out", b"result")).await.unwrap();
        tx.acknowledge(&delivery).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_connection_level());
        assert_eq!(broker.depth("out"), 0);

        drop(sub);
        drop(conn);
        assert_eq!(broker.depth("in"), 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_requeues_as_redelivered() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"a"));
        broker.publish(&envelope("in", b"b"));

        {
            let mut conn = broker.connector().connect().await.unwrap();
            let mut sub = conn.subscribe("in").await.unwrap();
            let first = sub.next().await.unwrap().unwrap();
            assert_eq!(first.body, b"a");
        }

        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("in").await.unwrap();
        let again = sub.next().await.unwrap().unwrap();
        assert_eq!(again.body, b"a");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_negative_acknowledge_requeues() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"a"));
        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("in").await.unwrap();

        let delivery = sub.next().await.unwrap().unwrap();
        conn.negative_acknowledge(&delivery).await.unwrap();
        assert_eq!(broker.depth("in"), 1);
        assert_eq!(broker.stats().nacks, 1);
    }

    #[tokio::test]
    async fn test_prefetch_of_one() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"a"));
        broker.publish(&envelope("in", b"b"));
        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("in").await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(blocked.is_err());

        conn.acknowledge(&first).await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.body, b"b");
    }

    #[tokio::test]
    async fn test_closed_subscription_ends_when_drained() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"a"));
        broker.close_subscriptions();

        let mut conn = broker.connector().connect().await.unwrap();
        let mut sub = conn.subscribe("in").await.unwrap();
        let delivery = sub.next().await.unwrap().unwrap();
        conn.acknowledge(&delivery).await.unwrap();
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(1);
        assert!(broker.connector().connect().await.is_err());

        let mut conn = broker.connector().connect().await.unwrap();
        broker.fail_next_sends(1);
        assert!(conn.send(&envelope("q", b"x")).await.is_err());
        conn.send(&envelope("q", b"x")).await.unwrap();
        assert_eq!(broker.depth("q"), 1);
    }

    #[tokio::test]
    async fn test_rejections_are_protocol_errors() {
        let broker = MemoryBroker::new();
        broker.publish(&envelope("in", b"job"));
        let mut conn = broker.connector().connect().await.unwrap();

        broker.reject_next_sends(1);
        let err = conn.send(&envelope("q", b"x")).await.unwrap_err();
        assert!(!err.is_connection_level());
        assert_eq!(broker.depth("q"), 0);

        let mut sub = conn.subscribe("in").await.unwrap();
        let delivery = sub.next().await.unwrap().unwrap();
        broker.reject_next_commits(1);
        let mut tx = conn.begin_transaction().await.unwrap();
        tx.send(&envelope("out", b"result")).await.unwrap();
        tx.acknowledge(&delivery).await.unwrap();
        assert!(!tx.commit().await.unwrap_err().is_connection_level());
        assert_eq!(broker.depth("out"), 0);

        // the delivery is still held by this connection
        conn.negative_acknowledge(&delivery).await.unwrap();
        assert_eq!(broker.depth("in"), 1);
    }
}
