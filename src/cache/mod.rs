use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    After(Duration),
    // still subject to capacity eviction
    Infinite,
}

impl Ttl {
    pub fn secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    fn is_expired(self, created_at: Instant, now: Instant) -> bool {
        match self {
            Self::After(ttl) => created_at
                .checked_add(ttl)
                .map_or(false, |deadline| now > deadline),
            Self::Infinite => false,
        }
    }
}

type PendingFetch<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Ttl,
    last_used: u64,
}

struct CacheState<V, E> {
    entries: HashMap<String, CacheEntry<V>>,
    inflight: HashMap<String, PendingFetch<V, E>>,
    clock: u64,
}

impl<V: Clone, E> CacheState<V, E> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = {
            let entry = self.entries.get(key)?;
            entry.ttl.is_expired(entry.created_at, now)
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        let stamp = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = stamp;
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: String, value: V, ttl: Ttl, capacity: usize) {
        let last_used = self.tick();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
                last_used,
            },
        );

        if self.entries.len() <= capacity {
            return;
        }

        let now = Instant::now();
        self.entries
            .retain(|_, entry| !entry.ttl.is_expired(entry.created_at, now));

        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    tracing::trace!(key = %key, "evicting least recently used cache entry");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

pub struct ContentCache<V, E> {
    state: Arc<Mutex<CacheState<V, E>>>,
    capacity: usize,
}

impl<V, E> Clone for ContentCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            capacity: self.capacity,
        }
    }
}

impl<V, E> ContentCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                inflight: HashMap::new(),
                clock: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    // Waiters that arrive while a fetch for `key` is pending join it. A failed
    // fetch stores nothing and its error goes to every waiter.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Ttl, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock();
            if let Some(value) = state.lookup(key, Instant::now()) {
                tracing::trace!(key, "cache hit");
                return Ok(value);
            }
            match state.inflight.get(key) {
                Some(pending) => {
                    tracing::debug!(key, "joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    tracing::debug!(key, "cache miss");
                    let pending = self.fetch(key.to_string(), ttl, producer());
                    state.inflight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn fetch<Fut>(&self, key: String, ttl: Ttl, producer: Fut) -> PendingFetch<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let capacity = self.capacity;
        async move {
            let result = match AssertUnwindSafe(producer).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    state.lock().inflight.remove(&key);
                    tracing::warn!(key = %key, "fetch panicked; nothing cached");
                    std::panic::resume_unwind(panic);
                }
            };
            let mut state = state.lock();
            state.inflight.remove(&key);
            match &result {
                Ok(value) => state.insert(key, value.clone(), ttl, capacity),
                Err(_) => tracing::debug!(key = %key, "fetch failed; nothing cached"),
            }
            result
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
impl<V: Clone, E> ContentCache<V, E> {
    fn get(&self, key: &str) -> Option<V> {
        self.state.lock().lookup(key, Instant::now())
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestCache = ContentCache<String, String>;

    fn counting_producer(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<String, String>> {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_entry_skips_producer_until_ttl_passes() {
        let cache = TestCache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Ttl::After(Duration::from_millis(100));

        let first = cache
            .get_or_fetch("k", ttl, counting_producer(&calls, "v1"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        let second = cache
            .get_or_fetch("k", ttl, counting_producer(&calls, "v2"))
            .await
            .unwrap();

        assert_eq!(first, "v1");
        assert_eq!(second, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        let third = cache
            .get_or_fetch("k", ttl, counting_producer(&calls, "v3"))
            .await
            .unwrap();
        assert_eq!(third, "v3");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let cache = TestCache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, String>("upstream down".to_string())
            }
        };
        let err = cache
            .get_or_fetch("k", Ttl::secs(60), failing)
            .await
            .unwrap_err();
        assert_eq!(err, "upstream down");
        assert_eq!(cache.len(), 0);

        let value = cache
            .get_or_fetch("k", Ttl::secs(60), counting_producer(&calls, "ok"))
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_fetch() {
        let cache = TestCache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>("shared".to_string())
            }
        };

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("k", Ttl::Infinite, slow(Arc::clone(&calls))),
            cache.get_or_fetch("k", Ttl::Infinite, slow(Arc::clone(&calls))),
            cache.get_or_fetch("k", Ttl::Infinite, slow(Arc::clone(&calls))),
        );

        assert_eq!(a.unwrap(), "shared");
        assert_eq!(b.unwrap(), "shared");
        assert_eq!(c.unwrap(), "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_all_see_the_failure() {
        let cache = TestCache::new(10);
        let failing = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<String, String>("boom".to_string())
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", Ttl::Infinite, failing),
            cache.get_or_fetch("k", Ttl::Infinite, failing),
        );
        assert_eq!(a.unwrap_err(), "boom");
        assert_eq!(b.unwrap_err(), "boom");
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_never_expires() {
        let cache = TestCache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        for value in ["first", "second"] {
            let got = cache
                .get_or_fetch("k", Ttl::secs(u64::MAX), counting_producer(&calls, value))
                .await
                .unwrap();
            assert_eq!(got, "first");
        }
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(cache.get("k").as_deref(), Some("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_fetch_leaves_key_usable() {
        let cache = TestCache::new(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("k", Ttl::secs(60), || async {
                        if true {
                            panic!("producer blew up");
                        }
                        Ok::<String, String>(String::new())
                    })
                    .await
            })
        };
        assert!(first.await.unwrap_err().is_panic());

        let value = cache
            .get_or_fetch("k", Ttl::secs(60), counting_producer(&calls, "recovered"))
            .await
            .unwrap();
        assert_eq!(value, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted_at_capacity() {
        let cache = TestCache::new(2);
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            cache
                .get_or_fetch(key, Ttl::Infinite, counting_producer(&calls, key))
                .await
                .unwrap();
        }
        // touch "a" so "b" becomes the oldest
        assert_eq!(cache.get("a").as_deref(), Some("a"));

        cache
            .get_or_fetch("c", Ttl::Infinite, counting_producer(&calls, "c"))
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_go_before_live_ones() {
        let cache = TestCache::new(2);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("short", Ttl::After(Duration::from_millis(10)), counting_producer(&calls, "s"))
            .await
            .unwrap();
        cache
            .get_or_fetch("long", Ttl::Infinite, counting_producer(&calls, "l"))
            .await
            .unwrap();
        // "long" is now the least recently used live entry
        tokio::time::advance(Duration::from_millis(20)).await;
        cache
            .get_or_fetch("new", Ttl::Infinite, counting_producer(&calls, "n"))
            .await
            .unwrap();

        assert!(cache.get("long").is_some());
        assert!(cache.get("new").is_some());
        assert!(cache.get("short").is_none());
    }
}
