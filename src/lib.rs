//! quayside is a background-job server: worker processes connect over TCP,
//! push job descriptors into named durable queues, reserve them for
//! execution, and acknowledge or fail them. Failed jobs are retried with
//! backoff; jobs scheduled for the future are promoted into their queue
//! when due.

pub mod error;
pub mod line_reader;
pub mod parser;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod types;
pub mod util;

pub use error::{Error, Result};
pub use server::{Server, ServerOptions};
