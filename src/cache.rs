//! Key-addressed cache of server responses.
//!
//! Entries are grouped by key prefix. Writes declare the groups they affect
//! through [`WriteOperation`]; [`QueryCache::run_write`] marks those groups
//! stale once the write has succeeded, and the next read refetches them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Ordered key segments, e.g. `["clothing", "42"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, T>(segments: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `prefix` names a group containing this key. Every key is in
    /// its own group.
    #[must_use]
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// This key extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Success,
    Error(String),
}

/// Per-query freshness policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    stale_time: Option<Duration>,
}

impl QueryOptions {
    /// Entries stay fresh until invalidated.
    #[must_use]
    pub const fn new() -> Self {
        Self { stale_time: None }
    }

    /// Entries also go stale `stale_time` after they were fetched.
    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

/// A write that makes cached groups stale when it succeeds.
pub trait WriteOperation {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Key prefixes whose entries must be refetched after success.
    fn invalidates(&self) -> Vec<QueryKey>;
}

#[derive(Debug)]
struct Entry {
    data: Option<JsonValue>,
    status: QueryStatus,
    stale: bool,
    fetched_at: Option<Instant>,
    generation: u64,
}

impl Entry {
    fn pending() -> Self {
        Self {
            data: None,
            status: QueryStatus::Pending,
            stale: true,
            fetched_at: None,
            generation: 0,
        }
    }

    fn is_fresh(&self, options: QueryOptions) -> bool {
        if self.stale || self.status != QueryStatus::Success || self.data.is_none() {
            return false;
        }
        match (options.stale_time, self.fetched_at) {
            (Some(stale_time), Some(at)) => at.elapsed() < stale_time,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<QueryKey, Entry>,
    epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    epoch: u64,
    generation: u64,
}

/// Client-side cache of server responses.
///
/// Values are held as JSON so one table serves every response type. The lock
/// is never held across an `.await`.
#[derive(Debug, Default)]
pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key` if fresh, otherwise awaits
    /// `fetcher` and records its outcome.
    ///
    /// Failures are recorded as [`QueryStatus::Error`] and returned; they are
    /// not retried.
    ///
    /// # Errors
    ///
    /// Returns whatever error `fetcher` produced.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if let Some(value) = self.fresh_value(&key, options) {
            match serde_json::from_value::<T>(value) {
                Ok(hit) => {
                    tracing::trace!(key = %key, "query cache hit");
                    return Ok(hit);
                }
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "cached value has another shape; refetching");
                }
            }
        }

        let ticket = self.begin(&key);
        let result = fetcher().await;
        match &result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(json) => self.complete(&key, ticket, Ok(json)),
                Err(e) => tracing::warn!(key = %key, error = %e, "response not cacheable"),
            },
            Err(e) => self.complete(&key, ticket, Err(e.to_string())),
        }
        result
    }

    /// Marks every entry in the group stale. Returns how many were marked.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut inner = self.inner.lock();
        let mut marked = 0;
        for (_, entry) in inner.entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
            entry.stale = true;
            entry.generation += 1;
            marked += 1;
        }
        tracing::debug!(group = %prefix, marked, "invalidated query group");
        marked
    }

    /// Evicts every entry in the group. Returns how many were removed.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !k.starts_with(prefix));
        before - inner.entries.len()
    }

    /// Drops every entry. Fetches still in flight will not write back.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.epoch += 1;
        tracing::debug!(epoch = inner.epoch, "cleared query cache");
    }

    /// Awaits `write`; on success invalidates every group `op` declares.
    ///
    /// A failed write leaves the cache untouched. So does a write that
    /// completes after [`clear`](Self::clear): the clear may stand for an
    /// identity change, and the write's groups belong to the old identity.
    /// After a plain reload this can leave entries refetched mid-write
    /// fresh with pre-write data until the next invalidation.
    ///
    /// # Errors
    ///
    /// Returns whatever error `write` produced.
    pub async fn run_write<O, T, Fut>(&self, op: &O, write: Fut) -> Result<T, Error>
    where
        O: WriteOperation + ?Sized,
        Fut: Future<Output = Result<T, Error>>,
    {
        let epoch = self.epoch();
        let result = write.await;
        match &result {
            Ok(_) if self.epoch() == epoch => {
                for group in op.invalidates() {
                    self.invalidate(&group);
                }
            }
            Ok(_) => {
                tracing::debug!(operation = op.name(), "cache reset during write; skipping invalidation");
            }
            Err(e) => {
                tracing::warn!(operation = op.name(), error = %e, "write failed; cache untouched");
            }
        }
        result
    }

    /// Stores `value` under `key` as a fresh success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `value` cannot be represented as JSON.
    pub fn set<T: Serialize>(&self, key: QueryKey, value: &T) -> Result<(), Error> {
        let json = serde_json::to_value(value).map_err(|source| Error::Decode {
            operation: "cache write",
            source,
        })?;
        let mut inner = self.inner.lock();
        let entry = inner.entries.entry(key).or_insert_with(Entry::pending);
        entry.data = Some(json);
        entry.status = QueryStatus::Success;
        entry.stale = false;
        entry.fetched_at = Some(Instant::now());
        Ok(())
    }

    /// Last known value for `key`, fresh or not.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let data = self.inner.lock().entries.get(key)?.data.clone()?;
        serde_json::from_value(data).ok()
    }

    #[must_use]
    pub fn status(&self, key: &QueryKey) -> Option<QueryStatus> {
        self.inner.lock().entries.get(key).map(|e| e.status.clone())
    }

    /// `Some(true)` when the entry exists and must be refetched before use.
    #[must_use]
    pub fn is_stale(&self, key: &QueryKey) -> Option<bool> {
        self.inner.lock().entries.get(key).map(|e| e.stale)
    }

    #[must_use]
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<_> = self.inner.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    fn fresh_value(&self, key: &QueryKey, options: QueryOptions) -> Option<JsonValue> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        if entry.is_fresh(options) {
            entry.data.clone()
        } else {
            None
        }
    }

    fn begin(&self, key: &QueryKey) -> Ticket {
        let mut inner = self.inner.lock();
        let epoch = inner.epoch;
        let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::pending);
        entry.status = QueryStatus::Pending;
        Ticket {
            epoch,
            generation: entry.generation,
        }
    }

    fn complete(&self, key: &QueryKey, ticket: Ticket, outcome: Result<JsonValue, String>) {
        let mut inner = self.inner.lock();
        if inner.epoch != ticket.epoch {
            tracing::debug!(key = %key, "dropping response fetched before cache reset");
            return;
        }
        let Some(entry) = inner.entries.get_mut(key) else {
            tracing::debug!(key = %key, "dropping response for evicted entry");
            return;
        };
        match outcome {
            Ok(data) => {
                entry.data = Some(data);
                entry.status = QueryStatus::Success;
                entry.fetched_at = Some(Instant::now());
                entry.stale = entry.generation != ticket.generation;
            }
            Err(message) => {
                entry.status = QueryStatus::Error(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    struct Upload;

    impl WriteOperation for Upload {
        fn name(&self) -> &'static str {
            "upload"
        }

        fn invalidates(&self) -> Vec<QueryKey> {
            vec![
                QueryKey::from(["clothing", "stats"]),
                QueryKey::from(["clothing", "search"]),
            ]
        }
    }

    fn failure() -> Error {
        Error::Api {
            operation: "test",
            status: 500,
            message: "boom".into(),
        }
    }

    async fn counted(cache: &QueryCache, key: QueryKey, calls: &AtomicUsize, value: u32) -> u32 {
        cache
            .fetch(key, QueryOptions::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
            .await
            .unwrap()
    }

    #[test]
    fn prefix_matching() {
        let key = QueryKey::from(["clothing", "search", "{}"]);
        assert!(key.starts_with(&QueryKey::from(["clothing"])));
        assert!(key.starts_with(&QueryKey::from(["clothing", "search"])));
        assert!(key.starts_with(&key));
        assert!(!key.starts_with(&QueryKey::from(["clothing", "stats"])));
        assert!(!QueryKey::from(["clothing"]).starts_with(&key));
        assert_eq!(key.to_string(), "clothing/search/{}");
        assert_eq!(QueryKey::from(["clothing"]).child("42"), QueryKey::from(["clothing", "42"]));
    }

    #[tokio::test]
    async fn fresh_entries_are_served_from_cache() {
        let cache = QueryCache::new();
        let calls = AtomicUsize::new(0);
        let key = QueryKey::from(["clothing", "stats"]);

        assert_eq!(counted(&cache, key.clone(), &calls, 1).await, 1);
        assert_eq!(counted(&cache, key.clone(), &calls, 2).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status(&key), Some(QueryStatus::Success));
        assert_eq!(cache.is_stale(&key), Some(false));
    }

    #[tokio::test]
    async fn invalidated_entries_are_refetched() {
        let cache = QueryCache::new();
        let calls = AtomicUsize::new(0);
        let key = QueryKey::from(["clothing", "stats"]);

        counted(&cache, key.clone(), &calls, 1).await;
        assert_eq!(cache.invalidate(&QueryKey::from(["clothing"])), 1);
        assert_eq!(cache.is_stale(&key), Some(true));
        assert_eq!(cache.get::<u32>(&key), Some(1));

        assert_eq!(counted(&cache, key.clone(), &calls, 2).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.is_stale(&key), Some(false));
    }

    #[tokio::test]
    async fn invalidate_only_touches_the_group() {
        let cache = QueryCache::new();
        cache.set(QueryKey::from(["clothing", "42"]), &1).unwrap();
        cache.set(QueryKey::from(["clothing", "42", "owner"]), &"Ada").unwrap();
        cache.set(QueryKey::from(["clothing", "43"]), &2).unwrap();
        cache.set(QueryKey::from(["user", "info"]), &3).unwrap();

        assert_eq!(cache.invalidate(&QueryKey::from(["clothing", "42"])), 2);
        assert_eq!(cache.is_stale(&QueryKey::from(["clothing", "42", "owner"])), Some(true));
        assert_eq!(cache.is_stale(&QueryKey::from(["clothing", "43"])), Some(false));
        assert_eq!(cache.is_stale(&QueryKey::from(["user", "info"])), Some(false));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_data() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["clothing", "stats"]);
        cache.set(key.clone(), &7u32).unwrap();
        cache.invalidate(&key);

        let result: Result<u32, _> = cache
            .fetch(key.clone(), QueryOptions::new(), || async { Err(failure()) })
            .await;
        assert!(result.is_err());
        assert!(matches!(cache.status(&key), Some(QueryStatus::Error(_))));
        assert_eq!(cache.get::<u32>(&key), Some(7));
        assert_eq!(cache.is_stale(&key), Some(true));
    }

    #[tokio::test]
    async fn successful_write_invalidates_declared_groups() {
        let cache = QueryCache::new();
        let stats = QueryKey::from(["clothing", "stats"]);
        let search = QueryKey::from(["clothing", "search", r#"{"query":""}"#]);
        let detail = QueryKey::from(["clothing", "42"]);
        for key in [&stats, &search, &detail] {
            cache.set(key.clone(), &0u32).unwrap();
        }

        let out = cache.run_write(&Upload, async { Ok::<_, Error>("item") }).await.unwrap();
        assert_eq!(out, "item");
        assert_eq!(cache.is_stale(&stats), Some(true));
        assert_eq!(cache.is_stale(&search), Some(true));
        assert_eq!(cache.is_stale(&detail), Some(false));

        let calls = AtomicUsize::new(0);
        assert_eq!(counted(&cache, stats.clone(), &calls, 1).await, 1);
        assert_eq!(counted(&cache, search.clone(), &calls, 1).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let cache = QueryCache::new();
        let stats = QueryKey::from(["clothing", "stats"]);
        cache.set(stats.clone(), &0u32).unwrap();

        let result: Result<(), _> = cache.run_write(&Upload, async { Err(failure()) }).await;
        assert!(result.is_err());
        assert_eq!(cache.is_stale(&stats), Some(false));
        assert_eq!(cache.status(&stats), Some(QueryStatus::Success));
    }

    #[tokio::test]
    async fn invalidation_happens_after_the_write_resolves() {
        let cache = QueryCache::new();
        let stats = QueryKey::from(["clothing", "stats"]);
        cache.set(stats.clone(), &0u32).unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let write = cache.run_write(&Upload, async {
            rx.await.ok();
            Ok::<_, Error>(())
        });
        let check = async {
            tokio::task::yield_now().await;
            let before = cache.is_stale(&stats);
            tx.send(()).ok();
            before
        };
        let (written, before) = tokio::join!(write, check);
        written.unwrap();
        assert_eq!(before, Some(false));
        assert_eq!(cache.is_stale(&stats), Some(true));
    }

    // Entries fetched between the clear and the write's completion keep
    // whatever the backend returned then, even if that predates the write.
    #[tokio::test]
    async fn write_completing_after_clear_does_not_invalidate() {
        let cache = QueryCache::new();
        let stats = QueryKey::from(["clothing", "stats"]);

        let result = cache
            .run_write(&Upload, async {
                cache.clear();
                cache.set(stats.clone(), &1u32).unwrap();
                Ok::<_, Error>(())
            })
            .await;
        result.unwrap();
        assert_eq!(cache.is_stale(&stats), Some(false));
    }

    #[tokio::test]
    async fn response_straddling_clear_is_dropped() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["user", "info"]);

        let value: u32 = cache
            .fetch(key.clone(), QueryOptions::new(), || async {
                cache.clear();
                Ok(5)
            })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn response_for_invalidated_entry_stays_stale() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["clothing", "stats"]);

        let _: u32 = cache
            .fetch(key.clone(), QueryOptions::new(), || async {
                cache.invalidate(&QueryKey::from(["clothing"]));
                Ok(1)
            })
            .await
            .unwrap();
        assert_eq!(cache.get::<u32>(&key), Some(1));
        assert_eq!(cache.is_stale(&key), Some(true));
    }

    #[tokio::test]
    async fn removed_entry_is_not_resurrected() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["clothing", "42"]);

        let _: u32 = cache
            .fetch(key.clone(), QueryOptions::new(), || async {
                assert_eq!(cache.remove(&QueryKey::from(["clothing"])), 1);
                Ok(1)
            })
            .await
            .unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn stale_time_expires_entries() {
        let cache = QueryCache::new();
        let calls = AtomicUsize::new(0);
        let key = QueryKey::from(["user", "info"]);
        let options = QueryOptions::new().with_stale_time(Duration::ZERO);

        for _ in 0..2 {
            let _: u32 = cache
                .fetch(key.clone(), options, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let long = QueryOptions::new().with_stale_time(Duration::from_secs(3600));
        let _: u32 = cache
            .fetch(key.clone(), long, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shape_mismatch_refetches() {
        let cache = QueryCache::new();
        let key = QueryKey::from(["clothing", "stats"]);
        cache.set(key.clone(), &"not a number").unwrap();

        let value: u32 = cache
            .fetch(key.clone(), QueryOptions::new(), || async { Ok(9) })
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert_eq!(cache.get::<u32>(&key), Some(9));
    }

    #[test]
    fn clear_and_keys() {
        let cache = QueryCache::new();
        cache.set(QueryKey::from(["b"]), &1).unwrap();
        cache.set(QueryKey::from(["a"]), &1).unwrap();
        assert_eq!(cache.keys(), vec![QueryKey::from(["a"]), QueryKey::from(["b"])]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
