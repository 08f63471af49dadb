#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod chunk_parser;
pub mod cli;
pub mod config;
pub mod container;
pub mod engine;
pub mod event;
pub mod metrics;
pub mod router;
pub mod sampler;
pub mod shutdown;
pub mod sink;
pub mod state;
pub mod syslog;
pub mod timestamp;
pub mod trace;
pub mod watcher;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
