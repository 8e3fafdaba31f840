pub mod abi;
pub mod auto;
pub mod chain;
pub mod config;
pub mod events;
pub mod ingest;
pub mod jobs;
pub mod query;
pub mod repository;
pub mod rpc;
