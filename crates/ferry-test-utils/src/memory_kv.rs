//! In-memory shared store for testing without Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use ferry_core::error::{Error, Result};
use ferry_core::kv::KvStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-memory [`KvStore`] honoring expiries, with switchable unavailability
/// for exercising `cacheUnavailable` paths.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of entries currently in a list.
    pub fn list_len(&self, list: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.lists.get(list).map(VecDeque::len).unwrap_or(0)
    }

    /// Whether a live (non-expired) key exists.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(key).map(Entry::live).unwrap_or(false)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::CacheUnavailable {
                message: "simulated outage".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.get(key).map(Entry::live).unwrap_or(false) {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(key);
        Ok(())
    }

    async fn lpush(&self, list: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpop(&self, list: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.lists.get_mut(list).and_then(VecDeque::pop_back))
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_respects_existing_keys() {
        let kv = MemoryKv::new();
        assert!(kv
            .set_nx_ex("lock:x", "1", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!kv
            .set_nx_ex("lock:x", "1", Duration::from_secs(60))
            .await
            .unwrap());

        kv.del("lock:x").await.unwrap();
        assert!(kv
            .set_nx_ex("lock:x", "1", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_keys_vanish() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set_nx_ex("k", "w", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_fifo_under_lpush_rpop() {
        let kv = MemoryKv::new();
        kv.lpush("jobs", "first").await.unwrap();
        kv.lpush("jobs", "second").await.unwrap();
        assert_eq!(kv.rpop("jobs").await.unwrap().as_deref(), Some("first"));
        assert_eq!(kv.rpop("jobs").await.unwrap().as_deref(), Some("second"));
        assert_eq!(kv.rpop("jobs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn outage_fails_everything() {
        let kv = MemoryKv::new();
        kv.set_unavailable(true);
        assert!(kv.ping().await.is_err());
        assert!(kv.get("k").await.is_err());
        kv.set_unavailable(false);
        assert!(kv.ping().await.is_ok());
    }
}
