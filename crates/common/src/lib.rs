//! Small utilities shared across herald crates.

pub mod time;
