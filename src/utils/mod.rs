//! Utilities

pub mod storage;
