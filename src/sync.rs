use parking_lot::{Condvar, Mutex};

/// A counting semaphore used to serialize structural sections: file
/// open/close, free-page allocation, and node materialization on cache
/// miss. Built on `parking_lot::Mutex` + `Condvar`, the same primitives
/// the lock manager uses to block and wake waiters.
pub struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            state: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    /// Blocks the calling thread until a permit is available, then holds
    /// it until the returned guard is dropped.
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        self.acquire_raw();
        SemaphoreGuard { sem: self }
    }

    /// Blocks until a permit is available, without tying the result to
    /// `&self`'s lifetime. Pair with `release` for owners (e.g. a node
    /// held behind an `Arc`) that can't return a borrowed guard.
    pub fn acquire_raw(&self) {
        let mut permits = self.state.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    pub fn release(&self) {
        let mut permits = self.state.lock();
        *permits += 1;
        self.condvar.notify_one();
    }
}

pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn serializes_access() {
        let sem = Arc::new(Semaphore::new(1));
        let counter = Arc::new(Mutex::new(0u32));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sem = sem.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                let _permit = sem.acquire();
                let mut c = counter.lock();
                *c += 1;
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8);
    }
}
