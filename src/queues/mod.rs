//! Concurrent processing of remote items.

pub mod pool;
pub mod work;
