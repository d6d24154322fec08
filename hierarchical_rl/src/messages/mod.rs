//! Message-passing between the worker pool and its rollout threads.
//!
//! # Architecture
//!
//! ```text
//!                      +-------------+
//!                      | WorkerPool  |
//!                      +-------------+
//!            WorkerMsg  |    |    |   ^ WorkerReply
//!          +------------+    |    +---|--------+
//!          v                 v        |        v
//!    +-----------+     +-----------+      +-----------+
//!    | worker 0  |     | worker 1  | ...  | worker N  |
//!    +-----------+     +-----------+      +-----------+
//! ```
//!
//! Star topology: each worker has one bounded request channel and one
//! bounded reply channel, and never talks to another worker.

mod worker_msg;


pub use worker_msg::{WorkerMsg, WorkerReply, WorkerStats};
