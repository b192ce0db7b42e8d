//! Storage backends

pub mod file;
pub mod mem;
