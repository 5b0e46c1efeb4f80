//! Shared, time-bounded cache in front of the drug-class reference service.
//!
//! Lookups for the same RxCUI that miss concurrently are coalesced onto one
//! in-flight request. Neither lock is held across the network call; cache
//! inserts are idempotent so a late or abandoned completion cannot corrupt
//! what is stored.

use async_trait::async_trait;
use cosri_upstream::{ClassLookupParams, DrugClassClient};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Where class identifiers come from on a cache miss.
#[async_trait]
pub trait DrugClassSource: Send + Sync {
    async fn class_ids(&self, rxcui: &str) -> cosri_upstream::Result<Vec<String>>;
}

/// RxNav `class/byRxcui` lookups, optionally restricted to one relation source.
pub struct RxNavSource {
    client: DrugClassClient,
    rela_source: Option<String>,
}

impl RxNavSource {
    pub fn new(client: DrugClassClient, rela_source: Option<String>) -> Self {
        Self {
            client,
            rela_source,
        }
    }
}

#[async_trait]
impl DrugClassSource for RxNavSource {
    async fn class_ids(&self, rxcui: &str) -> cosri_upstream::Result<Vec<String>> {
        let mut params = ClassLookupParams::new(rxcui);
        params.rela_source = self.rela_source.clone();
        let classes = self.client.classes_by_rxcui(&params).await?;
        Ok(classes.into_iter().map(|class| class.class_id).collect())
    }
}

pub type LookupResult = Result<Arc<Vec<String>>, Arc<cosri_upstream::Error>>;

type SharedLookup = Shared<BoxFuture<'static, LookupResult>>;

#[derive(Debug, Clone)]
pub struct DrugClassCacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
    pub slow_lookup_threshold: Duration,
}

impl Default for DrugClassCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            capacity: 4096,
            slow_lookup_threshold: Duration::from_millis(10),
        }
    }
}

struct CacheEntry {
    class_ids: Arc<Vec<String>>,
    expires_at: Instant,
}

pub struct DrugClassCache {
    source: Arc<dyn DrugClassSource>,
    config: DrugClassCacheConfig,
    entries: Mutex<LruCache<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, (u64, SharedLookup)>>,
    generation: AtomicU64,
    network_lookups: Arc<AtomicUsize>,
}

impl DrugClassCache {
    pub fn new(source: Arc<dyn DrugClassSource>, config: DrugClassCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            config,
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            network_lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Class identifiers for `rxcui`, from cache when fresh.
    ///
    /// Failed lookups are not cached.
    pub async fn class_ids(&self, rxcui: &str) -> LookupResult {
        if let Some(class_ids) = self.cached(rxcui) {
            tracing::debug!(rxcui, "Drug class cache hit");
            return Ok(class_ids);
        }

        let (generation, lookup) = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(rxcui) {
                Some((generation, lookup)) => (*generation, lookup.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let lookup = self.start_lookup(rxcui);
                    inflight.insert(rxcui.to_string(), (generation, lookup.clone()));
                    (generation, lookup)
                }
            }
        };

        let result = lookup.await;

        {
            let mut inflight = lock(&self.inflight);
            if matches!(inflight.get(rxcui), Some((current, _)) if *current == generation) {
                inflight.remove(rxcui);
            }
        }

        if let Ok(class_ids) = &result {
            self.store(rxcui, class_ids.clone());
        }
        result
    }

    /// Number of lookups that reached the reference service.
    pub fn network_lookups(&self) -> usize {
        self.network_lookups.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, rxcui: &str) -> Option<Arc<Vec<String>>> {
        let mut entries = lock(&self.entries);
        let now = Instant::now();
        let lookup = entries
            .get(rxcui)
            .map(|entry| (entry.expires_at > now).then(|| entry.class_ids.clone()));
        match lookup {
            Some(Some(class_ids)) => Some(class_ids),
            Some(None) => {
                entries.pop(rxcui);
                None
            }
            None => None,
        }
    }

    fn store(&self, rxcui: &str, class_ids: Arc<Vec<String>>) {
        let entry = CacheEntry {
            class_ids,
            expires_at: Instant::now() + self.config.ttl,
        };
        lock(&self.entries).put(rxcui.to_string(), entry);
    }

    fn start_lookup(&self, rxcui: &str) -> SharedLookup {
        let source = self.source.clone();
        let counter = self.network_lookups.clone();
        let threshold = self.config.slow_lookup_threshold;
        let rxcui = rxcui.to_string();

        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();
            let result = source.class_ids(&rxcui).await;
            let elapsed = started.elapsed();

            if elapsed > threshold {
                tracing::warn!(
                    rxcui = %rxcui,
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "Slow uncached drug class lookup"
                );
            }

            result.map(Arc::new).map_err(Arc::new)
        }
        .boxed()
        .shared()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::Notify;

    /// Source backed by a fixed table, optionally gated so lookups stay in flight.
    pub(crate) struct StaticSource {
        pub classes: HashMap<String, Vec<String>>,
        pub calls: AtomicUsize,
        pub gate: Option<Arc<Notify>>,
    }

    impl StaticSource {
        pub(crate) fn new(pairs: &[(&str, &[&str])]) -> Self {
            Self {
                classes: pairs
                    .iter()
                    .map(|(rxcui, ids)| {
                        (
                            rxcui.to_string(),
                            ids.iter().map(|id| id.to_string()).collect(),
                        )
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl DrugClassSource for StaticSource {
        async fn class_ids(&self, rxcui: &str) -> cosri_upstream::Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.classes.get(rxcui) {
                Some(ids) => Ok(ids.clone()),
                None => Err(cosri_upstream::Error::Status {
                    status: 404,
                    url: format!("rxnav/{rxcui}"),
                }),
            }
        }
    }

    fn cache(source: Arc<StaticSource>, ttl: Duration) -> DrugClassCache {
        DrugClassCache::new(
            source,
            DrugClassCacheConfig {
                ttl,
                capacity: 16,
                slow_lookup_threshold: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let source = Arc::new(StaticSource::new(&[("854873", &["N0000175694"])]));
        let cache = cache(source.clone(), Duration::from_secs(60));

        let cold = cache.class_ids("854873").await.unwrap();
        let warm = cache.class_ids("854873").await.unwrap();

        assert_eq!(cold, warm);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.network_lookups(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let source = Arc::new(StaticSource::new(&[("854873", &["N0000175694"])]));
        let cache = cache(source.clone(), Duration::ZERO);

        cache.class_ids("854873").await.unwrap();
        cache.class_ids("854873").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let source = Arc::new(StaticSource::new(&[]));
        let cache = cache(source.clone(), Duration::from_secs(60));

        assert!(cache.class_ids("1").await.is_err());
        assert!(cache.class_ids("1").await.is_err());

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_lookup() {
        let gate = Arc::new(Notify::new());
        let mut source = StaticSource::new(&[("854873", &["N0000175694"])]);
        source.gate = Some(gate.clone());
        let source = Arc::new(source);
        let cache = Arc::new(cache(source.clone(), Duration::from_secs(60)));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.class_ids("854873").await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.class_ids("854873").await }
        });

        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
