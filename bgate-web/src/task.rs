//! Cross-thread task queue executed on the I/O thread.
//!
//! Producers on any thread append; the I/O thread swaps the whole list out under the lock and
//! runs the tasks outside it. This is the only mutex taken on the steady-state path.

use std::sync::{Arc, Mutex};

use bgate_common::ids::ConnectionId;

use crate::connection::Connection;

/// Mutex-protected FIFO with swap-style draining.
pub struct TaskQueue<T> {
    tasks: Arc<Mutex<Vec<T>>>,
}

impl<T> TaskQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends one task.
    pub fn push(&self, task: T) {
        self.locked().push(task);
    }

    /// Atomically takes every queued task, leaving the queue empty.
    #[must_use]
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.locked())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        // A producer panicking mid-push cannot leave a task half-written; recover the guard.
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

/// One deferred action resolved against live connections on the I/O thread.
///
/// Tasks never borrow a connection; they carry the id and the dispatcher looks it up when the
/// task runs. A task whose connection has since closed is dropped silently.
pub enum IoTask {
    /// Run against one connection, if it is still open.
    Connection(ConnectionId, Box<dyn FnOnce(&mut Connection) + Send>),
    /// Run against every open connection.
    Broadcast(Box<dyn Fn(&mut Connection) + Send>),
}

#[cfg(test)]
mod tests {
    use super::TaskQueue;
    use googletest::prelude::*;
    use rstest::rstest;
    use std::thread;

    #[rstest]
    fn drain_takes_everything_in_push_order() {
        let queue = TaskQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_that!(queue.drain(), eq(&vec![1, 2, 3]));
        assert_that!(queue.is_empty(), eq(true));
        assert_that!(queue.drain(), eq(&Vec::<i32>::new()));
    }

    #[rstest]
    fn producers_on_other_threads_are_visible() {
        let queue = TaskQueue::new();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let producer = queue.clone();
                thread::spawn(move || {
                    for item in 0..25 {
                        producer.push(worker * 100 + item);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer thread should finish");
        }

        assert_that!(queue.len(), eq(100));
        assert_that!(queue.drain().len(), eq(100));
    }
}
