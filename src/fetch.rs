use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tilestream_map::{Quad, TileId};

/// Delivers fetched quads back to the scheduler that requested them.
///
/// This is the only way a fetch result reaches a [`Scheduler`](crate::Scheduler). Results are queued and only applied when the
/// scheduler is pumped on its own thread.
#[derive(Clone, Debug)]
pub struct QuadSender {
    tx: Sender<Quad>,
}

impl QuadSender {
    /// Returns `false` if the scheduler no longer exists.
    pub fn send(&self, quad: Quad) -> bool {
        self.tx.send(quad).is_ok()
    }
}

pub(crate) fn quad_channel() -> (QuadSender, Receiver<Quad>) {
    let (tx, rx) = channel::unbounded();
    (QuadSender { tx }, rx)
}

/// Starts fetching quads for a scheduler.
///
/// A request is never cancelled. Every request must eventually send exactly one [`Quad`] with the requested id to `reply`,
/// using [`NetworkStatus::NetworkError`](tilestream_map::NetworkStatus) for failures.
pub trait TileFetcher {
    fn request(&mut self, id: TileId, reply: QuadSender);
}

/// A blocking source of quads, like an HTTP client or a local tile archive.
pub trait TileSource: Send + Sync {
    fn fetch_quad(&self, id: TileId) -> Quad;
}

/// Fetches on the calling thread. The result is still delivered through the queue.
pub struct InlineFetcher<S> {
    source: S,
}

impl<S: TileSource> InlineFetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: TileSource> TileFetcher for InlineFetcher<S> {
    fn request(&mut self, id: TileId, reply: QuadSender) {
        reply.send(self.source.fetch_quad(id));
    }
}

struct FetchJob {
    id: TileId,
    reply: QuadSender,
}

/// Runs a [`TileSource`] on a fixed number of worker threads.
///
/// Dropping the fetcher waits for the workers to finish the jobs already queued.
pub struct ThreadPoolFetcher {
    jobs: Option<Sender<FetchJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolFetcher {
    pub fn new(source: Arc<dyn TileSource>, num_workers: usize) -> Self {
        assert!(num_workers > 0, "ThreadPoolFetcher needs at least one worker");

        let (jobs_tx, jobs_rx) = channel::unbounded::<FetchJob>();
        let workers = (0..num_workers)
            .map(|_| {
                let source = source.clone();
                let jobs_rx = jobs_rx.clone();
                thread::spawn(move || {
                    while let Ok(FetchJob { id, reply }) = jobs_rx.recv() {
                        if !reply.send(source.fetch_quad(id)) {
                            log::debug!("Dropping quad {}; its scheduler is gone", id);
                        }
                    }
                })
            })
            .collect();

        Self {
            jobs: Some(jobs_tx),
            workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl TileFetcher for ThreadPoolFetcher {
    fn request(&mut self, id: TileId, reply: QuadSender) {
        let sent = self
            .jobs
            .as_ref()
            .map_or(false, |jobs| jobs.send(FetchJob { id, reply }).is_ok());
        if !sent {
            log::error!("Fetch workers are gone; quad {} will never arrive", id);
        }
    }
}

impl Drop for ThreadPoolFetcher {
    fn drop(&mut self) {
        // Disconnecting the job channel ends each worker's loop.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("A fetch worker panicked");
            }
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
