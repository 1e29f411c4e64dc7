//! Domain - Pure Data Structures
//!
//! Wire and persisted shapes shared by the pipeline.

pub mod config;
pub mod event;
pub mod visited;
