#![warn(missing_docs)]

//! Hydra tail: command-line follower for realtime channels

pub mod cli;
pub mod config;
pub mod output;
