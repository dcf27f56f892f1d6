//! # Thread pool
//!
//! Module dedicated to thread pool management. The [`ThreadPool`] is
//! the main structure of this module: it spawns n threads and
//! transfers tasks to them using an unbounded channel. The receiver
//! part is shared accross all threads in a mutex, this way only one
//! thread can wait for a task at a time. When a thread receives a
//! task, it releases the lock and an other thread can wait for the
//! next task. Task outputs are sent back to the pool through a second
//! channel.
//!
//! A task is a function that takes a
//! [`ThreadPoolContextBuilder::Context`] and returns a future. The
//! easiest way to build a pool is to use the [`ThreadPoolBuilder`].

mod error;

use std::{num::NonZeroUsize, pin::Pin, sync::Arc, thread::available_parallelism};

use async_trait::async_trait;
use futures::{lock::Mutex, stream::FuturesUnordered, Future, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, trace, warn};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::AnyResult;

/// The thread pool task.
pub type ThreadPoolTask<C, T> =
    Box<dyn FnOnce(Arc<C>) -> Pin<Box<dyn Future<Output = T> + Send>> + Send + Sync>;

/// The thread pool.
pub struct ThreadPool<C: ThreadPoolContext, T> {
    /// Channel used to send tasks to threads.
    ///
    /// Dropped when the task queue is closed.
    tx: Option<mpsc::UnboundedSender<ThreadPoolTask<C, T>>>,

    /// Channel used to receive tasks output.
    rx: mpsc::UnboundedReceiver<T>,

    /// The list of threads spawned by the pool.
    threads: Vec<JoinHandle<()>>,
}

impl<C, T> ThreadPool<C, T>
where
    C: ThreadPoolContext + 'static,
    T: Send + 'static,
{
    /// Return the number of threads of the pool.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Send a task to the pool.
    ///
    /// The task will be executed by the first available thread.
    pub fn send<F>(&mut self, task: impl FnOnce(Arc<C>) -> F + Send + Sync + 'static) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(Error::SendTaskError)?;
        let task: ThreadPoolTask<C, T> = Box::new(move |ctx| Box::pin(task(ctx)));
        tx.send(task).map_err(|_| Error::SendTaskError)?;
        Ok(())
    }

    /// Close the task queue.
    ///
    /// Tasks already sent are still executed, then threads exit. Once
    /// every thread exited, [`ThreadPool::recv`] returns `None`.
    pub fn close_queue(&mut self) {
        self.tx = None;
    }

    /// Receive a task output from the pool.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Close the task queue then wait for every thread to exit.
    ///
    /// Every thread is awaited, even if one of them panicked. The
    /// first failure is returned.
    pub async fn join(mut self) -> Result<()> {
        self.close_queue();

        let mut res = Ok(());

        for (id, thread) in self.threads.into_iter().enumerate() {
            let id = id + 1;

            if let Err(err) = thread.await {
                warn!(id, "thread did not exit properly: {err}");
                if res.is_ok() {
                    res = Err(Error::JoinThreadError(err, id));
                }
            }
        }

        res
    }

    /// Close channels and abort threads.
    pub fn shutdown(mut self) {
        debug!("shutting down pool");

        self.tx = None;
        self.rx.close();

        for thread in self.threads {
            thread.abort()
        }
    }
}

/// The thread pool builder.
///
/// Builder that help you to create a [`ThreadPool`].
#[derive(Clone)]
pub struct ThreadPoolBuilder<B: ThreadPoolContextBuilder> {
    /// The context builder.
    ctx_builder: B,

    /// The size of the pool.
    ///
    /// Represents the number of threads that will be spawn in
    /// parallel. Defaults to the number of available CPUs.
    size: usize,
}

impl<B: ThreadPoolContextBuilder + 'static> ThreadPoolBuilder<B> {
    /// Create a new thread pool builder with a context builder.
    pub fn new(ctx_builder: B) -> Self {
        Self {
            ctx_builder,
            size: available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }

    /// Change the thread pool size.
    pub fn set_some_size(&mut self, size: Option<usize>) {
        if let Some(size) = size {
            self.size = size;
        }
    }

    /// Change the thread pool size.
    pub fn set_size(&mut self, size: usize) {
        self.set_some_size(Some(size));
    }

    /// Change the thread pool size using the builder pattern.
    pub fn with_some_size(mut self, size: Option<usize>) -> Self {
        self.set_some_size(size);
        self
    }

    /// Change the thread pool size using the builder pattern.
    pub fn with_size(mut self, size: usize) -> Self {
        self.set_size(size);
        self
    }

    /// Build the final thread pool.
    ///
    /// A pool always has at least one thread.
    pub async fn build<T>(self) -> Result<ThreadPool<B::Context, T>>
    where
        T: Send + 'static,
    {
        let size = self.size.max(1);
        debug!(size, "creating pool");

        // channel for workers to receive and process tasks from the pool
        let (tx_pool, rx_worker) = mpsc::unbounded_channel::<ThreadPoolTask<B::Context, T>>();
        let rx_workers = Arc::new(Mutex::new(rx_worker));

        // channel for workers to send output of their work to the pool
        let (tx_worker, rx_pool) = mpsc::unbounded_channel::<T>();

        let ctxs =
            FuturesUnordered::from_iter((0..size).map(|_| self.ctx_builder.clone().build()))
                .collect::<Vec<_>>()
                .await;

        let mut threads = Vec::with_capacity(size);

        for (id, ctx) in ctxs.into_iter().enumerate() {
            let id = id + 1;

            let ctx = ctx.map_err(|err| Error::BuildContextError(err, id, size))?;
            let ctx = Arc::new(ctx);
            let tx = tx_worker.clone();
            let rx = rx_workers.clone();

            threads.push(tokio::spawn(async move {
                loop {
                    let mut lock = rx.lock().await;

                    trace!(id, "thread waiting for a task");
                    match lock.recv().await {
                        None => {
                            drop(lock);
                            break;
                        }
                        Some(task) => {
                            drop(lock);

                            trace!(id, "thread executing task");
                            let output = task(ctx.clone()).await;
                            trace!(id, "thread successfully executed task");

                            if let Err(err) = tx.send(output) {
                                warn!(id, "thread cannot send task output: {err}");
                            }
                        }
                    }
                }

                debug!(id, "no more task for thread, exiting");
            }));
        }

        Ok(ThreadPool {
            tx: Some(tx_pool),
            rx: rx_pool,
            threads,
        })
    }
}

/// The thread pool context builder.
#[async_trait]
pub trait ThreadPoolContextBuilder: Clone + Send + Sync {
    /// The context built by this trait.
    type Context: ThreadPoolContext;

    /// Build the thread pool context.
    async fn build(self) -> AnyResult<Self::Context>;
}

pub trait ThreadPoolContext: Send + Sync {
    //
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use crate::AnyResult;

    use super::{ThreadPool, ThreadPoolBuilder, ThreadPoolContext, ThreadPoolContextBuilder};

    #[derive(Clone, Default)]
    struct CounterBuilder(Arc<AtomicUsize>);

    struct Counter(Arc<AtomicUsize>);

    impl ThreadPoolContext for Counter {}

    #[async_trait]
    impl ThreadPoolContextBuilder for CounterBuilder {
        type Context = Counter;

        async fn build(self) -> AnyResult<Self::Context> {
            Ok(Counter(self.0))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn executes_every_task() {
        let builder = CounterBuilder::default();
        let calls = builder.0.clone();
        let mut pool = ThreadPoolBuilder::new(builder).with_size(3).build().await.unwrap();
        assert_eq!(pool.size(), 3);

        for n in 1..=10usize {
            pool.send(move |ctx: Arc<Counter>| async move {
                ctx.0.fetch_add(1, Ordering::SeqCst);
                n
            })
            .unwrap();
        }

        pool.close_queue();
        assert!(pool.send(|_| async { 0 }).is_err());

        let mut sum = 0;
        while let Some(n) = pool.recv().await {
            sum += n;
        }

        assert_eq!(sum, 55);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        pool.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn survives_panicking_task() {
        let mut pool: ThreadPool<Counter, usize> = ThreadPoolBuilder::new(CounterBuilder::default())
            .with_size(2)
            .build()
            .await
            .unwrap();

        pool.send(|_| async { panic!("boom") }).unwrap();
        for n in 1..=4usize {
            pool.send(move |_| async move { n }).unwrap();
        }
        pool.close_queue();

        let mut outputs = Vec::new();
        while let Some(n) = pool.recv().await {
            outputs.push(n);
        }
        outputs.sort();

        assert_eq!(outputs, vec![1, 2, 3, 4]);
        assert!(pool.join().await.is_err());
    }
}
