//! Parallel batch loader over a [`Dataset`].
//!
//! Architecture:
//! Feeder Thread -> Index Channel -> Worker Threads -> Item Channel -> Caller
//!
//! - Feeder sends one epoch of row indices, shuffled per seed if requested
//! - Workers render items concurrently, each with its own RNG
//! - The caller assembles batches in arrival order; item order is not kept
//!
//! Workers may request the same uncached clip at the same time. Both compute
//! it and the clip store keeps whichever write lands last.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use ndarray::{Array2, Array4};
use rand::prelude::*;
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::LoaderConfig;
use crate::dataset::{Dataset, Item};
use crate::error::{Error, Result};

const POLL: Duration = Duration::from_millis(100);

/// A batch of rendered items.
#[derive(Debug)]
pub struct Batch {
    /// `[batch, 3, n_mels, n_frames]`
    pub images: Array4<f32>,
    /// `[batch, num_classes]`
    pub labels: Array2<f32>,
    /// Dataset rows actually served.
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// One pass over a dataset, yielding batches as an iterator.
pub struct Loader {
    batch_size: usize,
    image_shape: (usize, usize, usize),
    num_classes: usize,
    results: Receiver<Result<Item>>,
    pending: Vec<Item>,
    shutdown: Arc<AtomicBool>,
    feeder_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Loader {
    pub fn new(dataset: Arc<Dataset>, config: &LoaderConfig, seed: u64) -> Result<Self> {
        if config.batch_size == 0 || config.n_workers == 0 || config.channel_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size, n_workers and channel_size must be > 0".into(),
            ));
        }

        let (n_mels, n_frames) = dataset.spectrogram().output_shape(dataset.num_samples());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (index_tx, index_rx) = bounded::<usize>(config.channel_size);
        let (result_tx, result_rx) = bounded::<Result<Item>>(config.channel_size);

        let feeder_handle = {
            let shutdown = Arc::clone(&shutdown);
            let len = dataset.len();
            let shuffle = config.shuffle;
            thread::spawn(move || feeder_main(len, shuffle, seed, index_tx, shutdown))
        };

        let worker_handles = (0..config.n_workers)
            .map(|worker_id| {
                let dataset = Arc::clone(&dataset);
                let index_rx = index_rx.clone();
                let result_tx = result_tx.clone();
                let shutdown = Arc::clone(&shutdown);
                let worker_seed = splitmix64(seed ^ (worker_id as u64).wrapping_mul(0xD6E8FEB86659FD93));
                thread::spawn(move || worker_main(dataset, index_rx, result_tx, shutdown, worker_seed))
            })
            .collect();

        log::debug!(
            "Loader started: {} rows, batch {}, {} workers",
            dataset.len(),
            config.batch_size,
            config.n_workers
        );

        Ok(Self {
            batch_size: config.batch_size,
            image_shape: (3, n_mels, n_frames),
            num_classes: dataset.num_classes(),
            results: result_rx,
            pending: Vec::with_capacity(config.batch_size),
            shutdown,
            feeder_handle: Some(feeder_handle),
            worker_handles,
        })
    }

    fn assemble_batch(&self, items: Vec<Item>) -> Batch {
        let (c, m, t) = self.image_shape;
        let mut images = Array4::zeros((items.len(), c, m, t));
        let mut labels = Array2::zeros((items.len(), self.num_classes));
        let mut indices = Vec::with_capacity(items.len());

        for (i, item) in items.into_iter().enumerate() {
            images.index_axis_mut(ndarray::Axis(0), i).assign(&item.image);
            labels.row_mut(i).assign(&item.label);
            indices.push(item.index);
        }

        Batch {
            images,
            labels,
            indices,
        }
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.feeder_handle.take() {
            let _ = h.join();
        }
        for h in self.worker_handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl Iterator for Loader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending.len() < self.batch_size {
            match self.results.recv() {
                Ok(Ok(item)) => self.pending.push(item),
                // Keep what we have; the caller decides whether to continue.
                Ok(Err(e)) => return Some(Err(e)),
                Err(_) => break, // all workers finished
            }
        }

        if self.pending.is_empty() {
            return None;
        }
        let items = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        Some(Ok(self.assemble_batch(items)))
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.stop();
    }
}

// --- Feeder Thread ---

fn feeder_main(len: usize, shuffle: bool, seed: u64, index_tx: Sender<usize>, shutdown: Arc<AtomicBool>) {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }

    for index in order {
        if !send_with_shutdown(&index_tx, &shutdown, index) {
            return;
        }
    }
}

/// Send with retry on timeout, checking shutdown between attempts.
fn send_with_shutdown<T>(tx: &Sender<T>, shutdown: &AtomicBool, mut value: T) -> bool {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        match tx.send_timeout(value, POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => value = returned,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

// --- Worker Thread ---

fn worker_main(
    dataset: Arc<Dataset>,
    index_rx: Receiver<usize>,
    result_tx: Sender<Result<Item>>,
    shutdown: Arc<AtomicBool>,
    seed: u64,
) {
    let mut rng = StdRng::seed_from_u64(seed);

    loop {
        let index = match index_rx.recv_timeout(POLL) {
            Ok(i) => i,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let result = dataset.get_item_with(index, &mut rng);
        if let Err(e) = &result {
            log::warn!("worker: failed to load item {}: {}", index, e);
        }
        if !send_with_shutdown(&result_tx, &shutdown, result) {
            return;
        }
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_with_shutdown_gives_up() {
        let (tx, _rx) = bounded::<u32>(1);
        let shutdown = AtomicBool::new(false);
        assert!(send_with_shutdown(&tx, &shutdown, 1));
        shutdown.store(true, Ordering::Relaxed);
        assert!(!send_with_shutdown(&tx, &shutdown, 2));
    }

    #[test]
    fn test_worker_seeds_differ() {
        let seeds: std::collections::HashSet<u64> = (0..8u64)
            .map(|w| splitmix64(42 ^ w.wrapping_mul(0xD6E8FEB86659FD93)))
            .collect();
        assert_eq!(seeds.len(), 8);
    }
}
