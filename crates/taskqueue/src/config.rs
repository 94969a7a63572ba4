//! The only genuinely configurable knobs in this crate: worker-thread counts for the two
//! built-in thread pools, and the dispatch-policy pair a [`TaskQueue`](crate::task_queue::TaskQueue)
//! is built with. No environment variables, no config files.

use crate::port::DispatchPolicy;

/// Worker counts for the pools backing a task queue's two ports.
#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolConfig {
    pub work_workers: usize,
    pub completion_workers: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            work_workers: 4,
            completion_workers: 2,
        }
    }
}

/// Dispatch policy pair a new [`TaskQueue`](crate::task_queue::TaskQueue) is created with.
#[derive(Debug, Clone, Copy)]
pub struct TaskQueueConfig {
    pub work_policy: DispatchPolicy,
    pub completion_policy: DispatchPolicy,
    pub pool: ThreadPoolConfig,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            work_policy: DispatchPolicy::ThreadPool,
            completion_policy: DispatchPolicy::ThreadPool,
            pool: ThreadPoolConfig::default(),
        }
    }
}
