//! Task queue, async-operation provider and network lifecycle tracker substrate.
//!
//! This crate provides three cooperating pieces:
//!
//! - [`task_queue`]: a [`TaskQueue`](task_queue::TaskQueue) pairs two [`Port`](port::Port)s
//!   (Work, Completion), each an ordered callback queue with its own dispatch policy.
//! - [`async_provider`]: [`AsyncOperation`](async_provider::AsyncOperation) drives a single
//!   in-flight async call through the Begin/DoWork/GetResult/Cancel/Cleanup opcode sequence
//!   on top of a `TaskQueue`.
//! - [`net_lifecycle`]: [`NetworkLifecycleTracker`](net_lifecycle::NetworkLifecycleTracker)
//!   tracks every HTTP call and WebSocket connection a client has open, so a shutdown
//!   sequence can drain them before handing the underlying provider its cleanup call.
//!
//! `clock`, `timer`, `threadpool`, `queue` and `util` are the shared plumbing all three lean
//! on; `config` holds the handful of knobs this crate actually exposes.

pub mod async_provider;
pub mod clock;
pub mod config;
pub mod error;
pub mod net_lifecycle;
pub mod port;
pub mod queue;
pub mod task_queue;
pub mod threadpool;
pub mod timer;
pub mod util;

pub use error::{Error, Result};
