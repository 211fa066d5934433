//! Protocol implementations.
//!
//! - `resp`: the RESP request subset (`set`, `get`, `cmd`), shared by the
//!   event-loop and task-per-connection front ends

pub mod resp;
