//! # screenlink-server: host daemon
//!
//! Runs a screenlink session on this machine and keeps it available:
//! a synthetic capture backend renders a test pattern, the built-in zstd
//! tile encoder compresses it, and remote input is logged.
//!
//! When a viewer leaves or the pipeline fails, a new session is started
//! so the next viewer can connect (`session.restart_on_end`).

pub mod capture;
pub mod config;
pub mod input;
pub mod service;
