//! # screenlink-viewer: headless viewer
//!
//! Finds hosts on the LAN, connects (answering the PIN prompt when the
//! host asks), decodes the built-in tile codec, reports stream
//! statistics and can send scripted pointer/key input.

pub mod config;
pub mod input;
pub mod player;
pub mod stats;
