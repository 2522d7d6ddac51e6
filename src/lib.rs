//! tsdb-expire library exports

pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod rules;
pub mod state;
pub mod summary;
pub mod tasks;
pub mod tsdb;

#[cfg(test)]
pub(crate) mod testing;
