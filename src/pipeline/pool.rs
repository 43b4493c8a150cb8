//! Bounded-queue worker pool shared by every stage.

use crossbeam_channel::{Sender, bounded};
use log::debug;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::FatalError;

/// `workers` threads pulling items of type `T` from one bounded queue and running `task` on each.
///
/// Workers exit once every sender is gone and the queue is drained. Producers in other
/// stages get their own handle from [`WorkerPool::sender`]; the queue only closes after
/// those handles are dropped too.
pub struct WorkerPool<T> {
    name: String,
    tx: Option<Sender<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn the workers. `capacity` bounds the queue so a slow pool pushes back on its producers.
    pub fn start<F>(name: &str, workers: usize, capacity: usize, task: F) -> std::io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (tx, rx) = bounded::<T>(capacity);
        let task = Arc::new(task);
        let handles = (0..workers.max(1))
            .map(|i| {
                let rx = rx.clone();
                let task = Arc::clone(&task);
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || {
                        while let Ok(item) = rx.recv() {
                            task(item);
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!("{} pool: {} workers, queue cap {}", name, handles.len(), capacity);
        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            handles,
        })
    }

    /// Queue one item, blocking while the queue is full. Returns false once input is closed.
    pub fn submit(&self, item: T) -> bool {
        match &self.tx {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// Producer handle for another stage. Keeps the queue open until dropped.
    pub fn sender(&self) -> Option<Sender<T>> {
        self.tx.clone()
    }

    /// Signal "no more input" from this handle. Workers finish once other senders are gone too.
    pub fn close_input(&mut self) {
        self.tx.take();
    }

    /// Close input and wait until every worker has returned.
    pub fn await_drain(mut self) -> Result<(), FatalError> {
        self.close_input();
        let mut panicked = false;
        for h in self.handles.drain(..) {
            panicked |= h.join().is_err();
        }
        debug!("{} pool drained", self.name);
        if panicked {
            return Err(FatalError::WorkerPanicked(self.name.clone()));
        }
        Ok(())
    }
}
