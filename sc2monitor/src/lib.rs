#[macro_use]
extern crate tracing;

pub mod config;
pub mod log;
pub mod monitor;
pub mod poller;
pub mod service;
pub mod stats;
