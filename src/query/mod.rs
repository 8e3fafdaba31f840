//! Read-only views over the indexer database for the `status` binary.

pub mod commands;
pub mod formatters;

pub use commands::ContractStatus;
pub use formatters::OutputFormat;
