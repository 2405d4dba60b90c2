//! Application services layer.

pub mod builder;
pub mod documents;
pub mod error;
pub mod tasks;
