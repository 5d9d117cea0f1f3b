// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Concurrency plumbing for the slice pipeline: a counting semaphore built on
// a bounded token channel, and the single-slot error cell that retains the
// first failure and cancels peers.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tile_types::Error;

pub struct Semaphore {
    tx: Sender<()>,
    rx: Receiver<()>,
}

pub struct SemaphoreGuard<'a> {
    tx: &'a Sender<()>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        assert!(permits > 0);
        let (tx, rx) = bounded(permits);
        for _ in 0..permits {
            tx.send(()).unwrap();
        }
        Semaphore { tx, rx }
    }

    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        self.rx.recv().unwrap();
        SemaphoreGuard { tx: &self.tx }
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

/// First error wins; the cancel flag is observed by workers at their next
/// semaphore wait or phase barrier.
#[derive(Default)]
pub struct ErrorCell {
    cancelled: AtomicBool,
    slot: Mutex<Option<Error>>,
}

impl ErrorCell {
    pub fn new() -> ErrorCell {
        ErrorCell::default()
    }

    pub fn set(&self, e: Error) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn take(&self) -> Option<Error> {
        self.slot.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_semaphore_bounds_concurrency() {
        let sem = Arc::new(Semaphore::new(2));
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let (sem, live, peak) = (sem.clone(), live.clone(), peak.clone());
            handles.push(std::thread::spawn(move || {
                let _g = sem.acquire();
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                live.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_error_cell_first_wins() {
        let cell = ErrorCell::new();
        assert!(!cell.is_cancelled());
        cell.set(Error::IncompatibleTagSet);
        cell.set(Error::MissingReferenceTile { tag: 3 });
        assert!(cell.is_cancelled());
        match cell.take() {
            Some(Error::IncompatibleTagSet) => {}
            other => panic!("expected first error, got {:?}", other),
        }
    }
}
