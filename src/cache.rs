use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;

use crate::error::{CacheResult, SpiderError};

/// Called on eviction before the slot is reused; callers of `put` and
/// `clear` are blocked behind it, which is how dirty nodes and dirty
/// data pages are written before their cache slot is released.
pub type Evictor<K, V> = Box<dyn Fn(&K, &V) -> CacheResult<()> + Send + Sync>;

struct Inner<K, V> {
    items: HashMap<K, V>,
    order: VecDeque<K>,
}

/// Generic capacity-bounded cache mapping a key to a value in
/// most-recently-used order, backed by one mutex serializing every
/// operation.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
    evictor: Evictor<K, V>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(capacity: usize, evictor: Evictor<K, V>) -> Self {
        LruCache {
            capacity,
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                order: VecDeque::new(),
            }),
            evictor,
        }
    }

    pub fn put(&self, key: K, value: V) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        inner.order.retain(|k| k != &key);
        inner.order.push_front(key.clone());
        inner.items.insert(key, value);
        while inner.items.len() > self.capacity {
            let victim = inner.order.pop_back().expect("order non-empty while over capacity");
            let value = inner.items.get(&victim).expect("victim tracked in items").clone();
            log::trace!("evict: {:?} over capacity {}", victim, self.capacity);
            (self.evictor)(&victim, &value)?;
            inner.items.remove(&victim);
        }
        Ok(())
    }

    pub fn get(&self, key: &K) -> CacheResult<V> {
        let mut inner = self.inner.lock();
        if !inner.items.contains_key(key) {
            return Err(SpiderError::ItemNotExists);
        }
        inner.order.retain(|k| k != key);
        inner.order.push_front(key.clone());
        Ok(inner.items.get(key).expect("just checked").clone())
    }

    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        log::debug!("evict: clearing cache of {} entries", inner.items.len());
        while let Some(key) = inner.order.pop_back() {
            let value = inner.items.get(&key).expect("order tracks items").clone();
            (self.evictor)(&key, &value)?;
            inner.items.remove(&key);
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn evicts_least_recently_used() {
        let evicted: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let cache: LruCache<u32, u32> = LruCache::new(
            256,
            Box::new(move |k, _v| {
                sink.lock().push(*k);
                Ok(())
            }),
        );
        for i in 0..512u32 {
            cache.put(i, i).unwrap();
        }
        assert_eq!(cache.size(), 256);
        assert_eq!(cache.get(&511).unwrap(), 511);
        assert!(cache.get(&0).is_err());
        let evicted = evicted.lock();
        assert_eq!(evicted.len(), 256);
        assert_eq!(evicted[0], 0);
        assert_eq!(evicted[255], 255);
    }

    #[test]
    fn get_promotes_to_front() {
        let cache: LruCache<u32, u32> = LruCache::new(2, Box::new(|_, _| Ok(())));
        cache.put(1, 1).unwrap();
        cache.put(2, 2).unwrap();
        cache.get(&1).unwrap();
        cache.put(3, 3).unwrap();
        assert!(cache.get(&2).is_err());
        assert!(cache.get(&1).is_ok());
    }

    #[test]
    fn clear_evicts_back_to_front() {
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = order.clone();
        let cache: LruCache<u32, u32> = LruCache::new(
            10,
            Box::new(move |k, _| {
                sink.lock().push(*k);
                Ok(())
            }),
        );
        for i in 0..5 {
            cache.put(i, i).unwrap();
        }
        cache.clear().unwrap();
        assert_eq!(cache.size(), 0);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
