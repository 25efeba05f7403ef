use crate::caching::error::CacheError;
use crate::caching::l1_cache::L1Cache;
use crate::caching::l2_store::L2Store;
use crate::model::Payload;
use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use redb::Database;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub const DEFAULT_L1_CAPACITY: usize = 10_240;
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub namespace: Option<String>,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub bytes: u64,
}

#[derive(Default)]
struct HitCounters {
    by_namespace: HashMap<String, (u64, u64)>,
}

/// Two-tier cache: a bounded in-process LRU in front of the persistent
/// `cache_entries` table. Reads promote L2 hits into L1; writes go to both
/// tiers and serialize per namespace.
pub struct CacheLayer {
    l1: L1Cache,
    l2: L2Store,
    counters: Mutex<HitCounters>,
    namespace_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sweeper_stop: Arc<AtomicBool>,
}

impl CacheLayer {
    pub fn new(db: Arc<Database>, l1_capacity: usize) -> Result<Self, CacheError> {
        Ok(CacheLayer {
            l1: L1Cache::new(l1_capacity),
            l2: L2Store::new(db)?,
            counters: Mutex::new(HitCounters::default()),
            namespace_locks: Mutex::new(HashMap::new()),
            sweeper_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.namespace_locks
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    fn record(&self, namespace: &str, hit: bool) {
        let mut counters = self.counters.lock();
        let slot = counters
            .by_namespace
            .entry(namespace.to_string())
            .or_insert((0, 0));
        if hit {
            slot.0 += 1;
        } else {
            slot.1 += 1;
        }
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Payload> {
        if let Some(value) = self.l1.get(namespace, key) {
            self.record(namespace, true);
            return Some(value);
        }

        match self.l2.get(namespace, key) {
            Ok(Some(row)) => {
                self.l1.put(namespace, key, row.value.clone(), row.expires_at);
                self.record(namespace, true);
                Some(row.value)
            }
            Ok(None) => {
                self.record(namespace, false);
                None
            }
            Err(err) => {
                warn!("Cache read failed for {namespace}:{key}: {err}");
                self.record(namespace, false);
                None
            }
        }
    }

    pub fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Payload,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock();
        self.l2.set(namespace, key, value.clone(), expires_at)?;
        self.l1.put(namespace, key, value, expires_at);
        Ok(())
    }

    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock();
        let in_l1 = self.l1.remove(namespace, key);
        let in_l2 = self.l2.delete(namespace, key)?;
        Ok(in_l1 || in_l2)
    }

    /// Drops every entry in a namespace from both tiers. Used when a source
    /// is force-refreshed.
    pub fn invalidate(&self, namespace: &str) -> Result<usize, CacheError> {
        let lock = self.namespace_lock(namespace);
        let _guard = lock.lock();
        self.l1.remove_namespace(namespace);
        self.l2.invalidate(namespace)
    }

    pub fn list_namespaces(&self) -> Result<BTreeSet<String>, CacheError> {
        self.l2.list_namespaces()
    }

    pub fn stats(&self, namespace: Option<&str>) -> Result<CacheStats, CacheError> {
        let (entries, bytes) = self.l2.measure(namespace)?;
        let counters = self.counters.lock();
        let (hits, misses) = match namespace {
            Some(ns) => counters.by_namespace.get(ns).copied().unwrap_or((0, 0)),
            None => counters
                .by_namespace
                .values()
                .fold((0, 0), |(h, m), (nh, nm)| (h + nh, m + nm)),
        };
        Ok(CacheStats {
            namespace: namespace.map(|s| s.to_string()),
            entries,
            hits,
            misses,
            bytes,
        })
    }

    /// Starts the background sweeper that trims expired L2 rows. The thread
    /// exits when [`CacheLayer::stop_sweeper`] is called or the handle is
    /// dropped at shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let layer = Arc::clone(self);
        let stop = Arc::clone(&self.sweeper_stop);
        thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || {
                debug!("Cache sweeper started");
                loop {
                    let mut waited = Duration::ZERO;
                    while waited < SWEEP_INTERVAL {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(Duration::from_millis(250));
                        waited += Duration::from_millis(250);
                    }
                    if let Err(err) = layer.l2.purge_expired() {
                        warn!("Cache sweep failed: {err}");
                    }
                }
            })
            .expect("Failed to spawn cache sweeper")
    }

    pub fn stop_sweeper(&self) {
        self.sweeper_stop.store(true, Ordering::Relaxed);
    }
}
