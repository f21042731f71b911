//! Core domain types and logic: bars, indicators, fetching and the pipeline.

pub mod config_validation;
pub mod error;
pub mod fetcher;
pub mod indicator;
pub mod pipeline;
pub mod price_bar;
pub mod retry;
pub mod summary;
pub mod universe;
