//! Persisted record types.
//!
//! [`JobRecord`] and [`WorkerRecord`] are plain data; all persistence goes
//! through the [`store`](crate::store) traits.

pub mod job;
pub mod worker;

pub use job::*;
pub use worker::*;
