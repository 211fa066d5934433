//! mio-based event loop front end.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).

mod event_loop;

use crate::config::Config;
use crate::storage::Store;
use std::sync::Arc;

#[cfg(test)]
pub(crate) use event_loop::spawn_worker;

/// Run the event-loop front end on `config.event_listen`.
pub fn run(config: Config, store: Arc<dyn Store>) -> std::io::Result<()> {
    event_loop::run(config, store)
}
