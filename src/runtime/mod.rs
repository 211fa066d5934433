//! Readiness-driven runtime.
//!
//! A fixed pool of worker threads, each running its own mio poll loop over
//! a SO_REUSEPORT listener. Connections never migrate between workers.
//!
//! - `connection`: per-connection buffers and the slab registry
//! - `mio`: the poll loop itself

mod connection;
mod mio;

pub use self::mio::run;

#[cfg(test)]
pub(crate) use self::mio::spawn_worker;
