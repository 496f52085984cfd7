//! Fixed-size pool of hashing threads
//!
//! Hashing is CPU-bound, so it runs on dedicated OS threads rather than the
//! async runtime. Jobs arrive on a shared crossbeam queue; each job carries
//! the tokio channel its outcome is sent back on.

use crossbeam_channel::{Receiver, Sender};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::thread;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::piece::{PieceDigest, hash_reader};

/// One artifact to hash
#[derive(Debug)]
pub(crate) struct HashJob {
    /// Slot the outcome belongs to
    pub index: usize,
    pub path: PathBuf,
    pub reply: mpsc::UnboundedSender<HashOutcome>,
}

/// Result of one job
#[derive(Debug)]
pub(crate) struct HashOutcome {
    pub index: usize,
    pub result: io::Result<PieceDigest>,
}

/// Worker threads sharing one job queue.
///
/// Dropping the pool closes the queue; workers finish the jobs already queued
/// and exit.
#[derive(Debug)]
pub(crate) struct HashPool {
    jobs: Sender<HashJob>,
    size: usize,
}

impl HashPool {
    /// Start `size` workers, each reading with a `buffer_size` byte buffer
    pub fn new(size: usize, buffer_size: usize) -> Result<Self> {
        let size = size.max(1);
        let (jobs, queue) = crossbeam_channel::unbounded::<HashJob>();

        for worker in 0..size {
            let queue = queue.clone();
            thread::Builder::new()
                .name(format!("piece-hash-{worker}"))
                .spawn(move || worker_loop(worker, queue, buffer_size))
                .map_err(|e| Error::WorkerPool(format!("failed to spawn hashing thread: {e}")))?;
        }

        tracing::debug!(workers = size, buffer_size, "hashing pool started");
        Ok(Self { jobs, size })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job
    pub fn submit(&self, job: HashJob) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::WorkerPool("hashing queue closed".to_string()))
    }
}

fn worker_loop(worker: usize, queue: Receiver<HashJob>, buffer_size: usize) {
    for job in queue.iter() {
        tracing::debug!(worker, path = %job.path.display(), "hashing artifact");
        let result = File::open(&job.path).and_then(|file| hash_reader(file, buffer_size));
        if let Err(e) = &result {
            tracing::debug!(worker, path = %job.path.display(), error = %e, "hashing failed");
        }
        // The collector may have gone away; nothing left to report to
        job.reply
            .send(HashOutcome {
                index: job.index,
                result,
            })
            .ok();
    }
}
