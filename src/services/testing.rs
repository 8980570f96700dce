//! In-memory fakes shared by the service unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::domain::error::{KvError, QueueError, ScrapeError, StoreError};
use crate::domain::models::{RepoData, ScrapeType};
use crate::domain::ports::{Clock, IdProvider, KvCache, QueueBackend, QueueMessage, RepoScraper, StateStore};

/// Clock pinned to a fixed instant, advanced explicitly by tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Sequential id provider: "id-1", "id-2", ...
#[derive(Default)]
pub struct SeqIds {
    counter: AtomicU64,
}

impl IdProvider for SeqIds {
    fn new_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("id-{n}")
    }
}

/// State store over a plain map.
#[derive(Default)]
pub struct MemoryStateStore {
    blobs: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, component: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.blobs.lock().unwrap().get(component).cloned())
    }

    async fn save(&self, component: &str, state: &Value) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(component.to_string(), state.clone());
        Ok(())
    }
}

struct StoredMessage {
    receipt: i64,
    body: Value,
    attempts: u32,
    leased: bool,
}

#[derive(Default)]
struct QueueInner {
    next_receipt: i64,
    messages: Vec<StoredMessage>,
}

/// Queue backend over plain vectors, with a kill switch for enqueue so
/// tests can force strategy failures.
#[derive(Default)]
pub struct MemoryQueueBackend {
    queues: Mutex<HashMap<String, QueueInner>>,
    fail_enqueue: AtomicBool,
}

impl MemoryQueueBackend {
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn depth_sync(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Bodies currently on a queue, visible or leased, in enqueue order.
    pub fn bodies(&self, queue: &str) -> Vec<Value> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, queue: &str, body: Value) -> Result<(), QueueError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Backend("enqueue disabled by test".into()));
        }
        let mut queues = self.queues.lock().unwrap();
        let inner = queues.entry(queue.to_string()).or_default();
        inner.next_receipt += 1;
        let receipt = inner.next_receipt;
        inner.messages.push(StoredMessage {
            receipt,
            body,
            attempts: 0,
            leased: false,
        });
        Ok(())
    }

    async fn pull(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let Some(inner) = queues.get_mut(queue) else {
            return Ok(vec![]);
        };
        let mut out = Vec::new();
        for msg in inner.messages.iter_mut() {
            if out.len() >= max {
                break;
            }
            if !msg.leased {
                msg.leased = true;
                msg.attempts += 1;
                out.push(QueueMessage {
                    receipt: msg.receipt,
                    body: msg.body.clone(),
                    attempts: msg.attempts,
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, queue: &str, receipt: i64) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(inner) = queues.get_mut(queue) {
            inner.messages.retain(|m| m.receipt != receipt);
        }
        Ok(())
    }

    async fn retry(&self, queue: &str, receipt: i64) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(inner) = queues.get_mut(queue) {
            if let Some(msg) = inner.messages.iter_mut().find(|m| m.receipt == receipt) {
                msg.leased = false;
            }
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.depth_sync(queue) as u64)
    }
}

/// KV cache over a plain map; TTLs recorded but only enforced by
/// `purge_expired` against the wall clock of insertion order (tests that
/// care about expiry use the SQLite adapter).
#[derive(Default)]
pub struct MemoryKvCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryKvCache {
    pub fn get_sync(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        Ok(self.get_sync(key))
    }

    async fn put(
        &self,
        key: &str,
        value: &Value,
        _ttl: Option<std::time::Duration>,
    ) -> Result<(), KvError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, KvError> {
        Ok(0)
    }
}

type ScrapeResult = Result<Option<RepoData>, ScrapeError>;

/// Scraper that replays scripted results in order; defaults to ETag-match
/// (`Ok(None)`) when the script runs dry.
#[derive(Default)]
pub struct StubScraper {
    script: Mutex<VecDeque<ScrapeResult>>,
    backup_healthy: AtomicBool,
}

impl StubScraper {
    pub fn push(&self, result: ScrapeResult) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn set_backup_healthy(&self, healthy: bool) {
        self.backup_healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepoScraper for StubScraper {
    async fn scrape(
        &self,
        _repo: &str,
        _scrape_type: ScrapeType,
        _etag: Option<&str>,
    ) -> ScrapeResult {
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn probe_backup(&self) -> Result<(), ScrapeError> {
        if self.backup_healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ScrapeError::Network("backup unreachable".into()))
        }
    }
}
