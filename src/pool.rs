// SPDX-License-Identifier: MIT
//! Bounded worker pool over a closable task queue.
//!
//! One producer fills a [`TaskQueue`] and closes it exactly once; a fixed
//! number of workers drain it until it is both closed and empty. Completion
//! is observable: [`run_pool`] returns only after every worker has exited.
//! Both periodic schedulers and the background job runner share this
//! primitive — no component spawns unsupervised fire-and-forget tasks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;

/// FIFO queue that can be closed by the producer.
///
/// `pop` yields `None` only once the queue is closed *and* drained, which is
/// the workers' signal to exit.
pub struct TaskQueue<T> {
    inner: Mutex<VecDeque<T>>,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Enqueue one task. Pushing after `close` is a producer bug; the task
    /// would still be drained, but the single-close contract forbids it.
    pub async fn push(&self, task: T) {
        self.inner.lock().await.push_back(task);
        self.notify.notify_one();
    }

    /// Signal that no more tasks will be produced.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Dequeue the next task, waiting while the queue is open but empty.
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut queue = self.inner.lock().await;
                if let Some(task) = queue.pop_front() {
                    return Some(task);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Current queue depth.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Run `workers` concurrent consumers over `queue` and wait for all of them
/// to finish. Each consumer repeatedly pops and handles one task; a task
/// failure must be handled inside `handler` (workers never abort the pool).
pub async fn run_pool<T, F, Fut>(queue: Arc<TaskQueue<T>>, workers: usize, handler: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut set = JoinSet::new();
    for _ in 0..workers.max(1) {
        let queue = Arc::clone(&queue);
        let handler = handler.clone();
        set.spawn(async move {
            while let Some(task) = queue.pop().await {
                handler(task).await;
            }
        });
    }
    // A worker panic is isolated to its JoinSet slot; the remaining workers
    // still drain the queue.
    while set.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn pool_drains_everything_before_returning() {
        let queue = TaskQueue::new();
        for i in 0..100usize {
            queue.push(i).await;
        }
        queue.close();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        run_pool(Arc::clone(&queue), 4, move |_task| {
            let seen = Arc::clone(&seen2);
            async move {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        })
        .await;

        assert_eq!(seen.load(Ordering::Relaxed), 100);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn workers_exit_on_close_of_an_empty_queue() {
        let queue: Arc<TaskQueue<u32>> = TaskQueue::new();
        queue.close();
        // Must return immediately — nothing to consume.
        run_pool(queue, 3, |_task| async {}).await;
    }

    #[tokio::test]
    async fn producer_may_fill_while_workers_run() {
        let queue = TaskQueue::new();
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..50usize {
                    queue.push(i).await;
                    tokio::task::yield_now().await;
                }
                queue.close();
            })
        };

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        run_pool(Arc::clone(&queue), 2, move |_task| {
            let seen = Arc::clone(&seen2);
            async move {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        })
        .await;

        producer.await.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 50);
    }
}
