//! `AsyncQueueMap<K, V>`: a keyed channel used to hand session events from
//! RPC handlers to whichever suspension point is waiting for them (§9
//! design notes). `take(k, timeout)` awaits the next value tagged `k`;
//! multiple concurrent waiters on different keys are supported; `fail`
//! wakes every waiter with the same error; `clear` drops pending values.

use std::collections::VecDeque;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;

use crate::error::ProtocolError;

struct Inner<K, V> {
    queues: FxHashMap<K, VecDeque<V>>,
    failure: Option<ProtocolError>,
}

pub struct AsyncQueueMap<K, V> {
    inner: Mutex<Inner<K, V>>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone, V> Default for AsyncQueueMap<K, V> {
    fn default() -> Self {
        AsyncQueueMap {
            inner: Mutex::new(Inner {
                queues: FxHashMap::default(),
                failure: None,
            }),
            notify: Notify::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> AsyncQueueMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `value` under `key` and wakes every waiter so it can
    /// re-check whether this key is the one it wanted.
    pub fn push(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.queues.entry(key).or_default().push_back(value);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Awaits the next value tagged `key`, up to `timeout`. Returns
    /// `ProtocolError::Timeout` on expiry, or the stashed failure if `fail`
    /// was called first.
    pub async fn take(&self, key: K, timeout: Duration, what: &'static str) -> Result<V, ProtocolError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(err) = inner.failure.clone() {
                    return Err(err);
                }
                if let Some(queue) = inner.queues.get_mut(&key) {
                    if let Some(value) = queue.pop_front() {
                        return Ok(value);
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout(what));
            }
            let notified = self.notify.notified();
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Err(ProtocolError::Timeout(what));
            }
        }
    }

    /// Wakes every current and future waiter with `err`, until `clear` is
    /// called. Used to tear down a session on protocol failure.
    pub fn fail(&self, err: ProtocolError) {
        let mut inner = self.inner.lock();
        inner.failure = Some(err);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Drops all pending values and clears any stashed failure, readying
    /// the queue map for a fresh session.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queues.clear();
        inner.failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn take_returns_a_value_pushed_after_the_wait_begins() {
        let q: Arc<AsyncQueueMap<&'static str, u32>> = Arc::new(AsyncQueueMap::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.take("k", Duration::from_secs(1), "test").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("k", 42);
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn take_times_out_when_nothing_arrives() {
        let q: AsyncQueueMap<&'static str, u32> = AsyncQueueMap::new();
        let err = q.take("k", Duration::from_millis(10), "test").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout("test")));
    }

    #[tokio::test]
    async fn fail_wakes_every_waiter_with_the_same_error() {
        let q: Arc<AsyncQueueMap<&'static str, u32>> = Arc::new(AsyncQueueMap::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.take("k", Duration::from_secs(5), "test").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.fail(ProtocolError::NoSession);
        assert_eq!(waiter.await.unwrap().unwrap_err(), ProtocolError::NoSession);
    }

    #[tokio::test]
    async fn clear_drops_pending_values_and_failure() {
        let q: AsyncQueueMap<&'static str, u32> = AsyncQueueMap::new();
        q.push("k", 1);
        q.fail(ProtocolError::NoSession);
        q.clear();
        let err = q.take("k", Duration::from_millis(10), "test").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout("test")));
    }
}
