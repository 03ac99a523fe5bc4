//! Fixed-size pool of executor threads

use crate::error::ExecutionResult;
use crate::executor::{Executor, JobReport};
use crate::invocation::Invocation;
use crate::queue::RequestQueue;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Receives the outcome of every job run by the pool
pub trait JobListener: Send + Sync {
    /// Called from the executor thread once the job has ended
    fn job_finished(&self, invocation: Invocation, result: ExecutionResult<JobReport>);
}

/// `None` tells the receiving thread to stop
type Request = Option<Invocation>;

/// Executor threads pulling jobs from a shared queue
pub struct ExecutorPool {
    queue: Arc<RequestQueue<Request>>,
    threads: Vec<JoinHandle<()>>,
}

impl ExecutorPool {
    /// Start `size` threads named `<name>-<i>`
    pub fn start(
        name: &str,
        size: usize,
        executor: Arc<Executor>,
        listener: Arc<dyn JobListener>,
    ) -> io::Result<Self> {
        let queue: Arc<RequestQueue<Request>> = Arc::new(RequestQueue::new());
        let mut threads = Vec::with_capacity(size);
        for i in 0..size {
            let queue = Arc::clone(&queue);
            let executor = Arc::clone(&executor);
            let listener = Arc::clone(&listener);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(queue, executor, listener))?;
            threads.push(handle);
        }
        tracing::info!("Executor pool {} started with {} threads", name, size);
        Ok(Self { queue, threads })
    }

    /// Queue a job
    pub fn submit(&self, invocation: Invocation) {
        self.queue.enqueue(Some(invocation));
    }

    /// Queue a job ahead of every pending one
    pub fn submit_urgent(&self, invocation: Invocation) {
        self.queue.enqueue_front(Some(invocation));
    }

    /// Jobs waiting for a thread
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of threads
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Let queued jobs drain, then stop every thread and wait for them
    pub fn shutdown(self) {
        for _ in 0..self.threads.len() {
            self.queue.enqueue(None);
        }
        self.queue.wake_up_all();
        for handle in self.threads {
            if handle.join().is_err() {
                tracing::error!("Executor thread panicked");
            }
        }
        tracing::info!("Executor pool stopped");
    }
}

fn worker_loop(queue: Arc<RequestQueue<Request>>, executor: Arc<Executor>, listener: Arc<dyn JobListener>) {
    let name = thread::current().name().unwrap_or("executor").to_string();
    tracing::debug!("{} ready", name);
    while let Some(mut invocation) = queue.dequeue() {
        tracing::debug!("{} took job {}", name, invocation.job_id);
        let result = executor.execute(&mut invocation);
        listener.job_finished(invocation, result);
    }
    tracing::debug!("{} stopping", name);
}
