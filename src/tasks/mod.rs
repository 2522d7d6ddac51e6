//! Stages of a retention pass

pub mod aggregation;
pub mod deletion;
pub mod retention;
pub mod tag_sets;
