//! Bounded worker pool over scoped threads.
//!
//! Workers pull task indices from a shared queue and send `(index, result)` back on a
//! second channel; the collector places each result by index, so output order always
//! matches submission order no matter which worker finishes first.

use crate::download::PoolBudget;
use crossbeam_channel as channel;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// A task panicked; only that task's slot is affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task panicked: {message}")]
pub struct TaskPanicked {
    pub message: String,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs a batch of tasks with at most `budget.workers()` in flight.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    budget: PoolBudget,
}

impl WorkerPool {
    pub fn new(budget: PoolBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> PoolBudget {
        self.budget
    }

    /// Run `f` over every task. Returns one result per task, in submission order.
    /// Threads are joined before this returns.
    pub fn run<T, R, F>(&self, tasks: &[T], f: F) -> Vec<Result<R, TaskPanicked>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if tasks.is_empty() {
            return Vec::new();
        }
        let workers = self.budget.workers().min(tasks.len()).max(1);
        let (task_tx, task_rx) = channel::unbounded::<usize>();
        let (result_tx, result_rx) = channel::unbounded::<(usize, Result<R, TaskPanicked>)>();
        for i in 0..tasks.len() {
            // Receiver is alive for the whole function.
            let _ = task_tx.send(i);
        }
        drop(task_tx);

        let f = &f;
        std::thread::scope(|scope| {
            for worker in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("download-{}", worker))
                    .spawn_scoped(scope, move || {
                        for i in task_rx.iter() {
                            let result = catch_unwind(AssertUnwindSafe(|| f(&tasks[i])))
                                .map_err(|p| TaskPanicked {
                                    message: panic_message(p),
                                });
                            if result_tx.send((i, result)).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    tracing::warn!(worker, error = %e, "could not spawn download worker");
                }
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<Result<R, TaskPanicked>>> =
            std::iter::repeat_with(|| None).take(tasks.len()).collect();
        for (i, result) in result_rx.try_iter() {
            slots[i] = Some(result);
        }
        // If no worker could be spawned, drain the queue on this thread.
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(
                    catch_unwind(AssertUnwindSafe(|| f(&tasks[i]))).map_err(|p| TaskPanicked {
                        message: panic_message(p),
                    }),
                );
            }
        }
        slots.into_iter().flatten().collect()
    }
}
