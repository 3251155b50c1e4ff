//! Parallel tracklog loading.
//!
//! A fixed pool of worker threads drains a FIFO queue of file paths.
//! Every job carries a pre-allocated result slot, so the finished track
//! list comes back in enqueue order no matter which worker parsed what.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::track::{load_track, Track};

/// How many streamed paths to accept before waiting for the queue to
/// drain; bounds the path strings held in memory.
const STREAM_BATCH: usize = 100;

struct Job {
    slot: usize,
    path: PathBuf,
}

struct Shared {
    /// `None` is the shutdown sentinel; one per worker.
    queue: Mutex<VecDeque<Option<Job>>>,
    ready: Condvar,
    results: Mutex<Vec<Option<Track>>>,
}

/// Worker pool turning paths into parsed [`Track`]s.
pub struct LoaderPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl LoaderPool {
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            results: Mutex::new(Vec::new()),
        });
        let workers = (0..threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    /// Queue one file for loading.
    pub fn enqueue(&self, path: impl Into<PathBuf>) {
        let slot = {
            let mut results = self.shared.results.lock();
            results.push(None);
            results.len() - 1
        };
        self.shared.queue.lock().push_back(Some(Job {
            slot,
            path: path.into(),
        }));
        self.shared.ready.notify_one();
    }

    /// Queue a NUL-separated path list, as produced by `find -print0`.
    /// Empty names are skipped. After every [`STREAM_BATCH`] files the
    /// queue is drained before reading on. Returns the number of paths
    /// accepted.
    pub fn enqueue_stream(&self, mut input: impl BufRead) -> std::io::Result<usize> {
        let mut name = Vec::new();
        let mut accepted = 0usize;
        loop {
            name.clear();
            let n = input.read_until(b'\0', &mut name)?;
            if n == 0 {
                break;
            }
            if name.last() == Some(&b'\0') {
                name.pop();
            }
            if name.is_empty() {
                continue;
            }
            self.enqueue(PathBuf::from(String::from_utf8_lossy(&name).as_ref()));
            accepted += 1;
            if accepted % STREAM_BATCH == 0 {
                self.drain();
            }
        }
        Ok(accepted)
    }

    /// Wait until every queued job has been picked up.
    fn drain(&self) {
        while !self.shared.queue.lock().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Shut the pool down and collect all tracks in enqueue order.
    pub fn finish(self) -> Vec<Track> {
        {
            let mut queue = self.shared.queue.lock();
            for _ in 0..self.workers.len() {
                queue.push_back(None);
            }
        }
        self.shared.ready.notify_all();
        for worker in self.workers {
            let _ = worker.join();
        }
        let mut results = self.shared.results.lock();
        results
            .drain(..)
            .map(|slot| slot.unwrap_or_default())
            .collect()
    }
}

fn worker(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            while queue.is_empty() {
                shared.ready.wait(&mut queue);
            }
            queue.pop_front()
        };
        match job {
            Some(Some(job)) => {
                debug!("loading {}", job.path.display());
                let track = load_track(&job.path);
                shared.results.lock()[job.slot] = Some(track);
            }
            // Sentinel or spurious empty pop: exit on sentinel only.
            Some(None) => break,
            None => {}
        }
    }
}
