//! Storage, repositories and the replication/retention pipeline.

pub mod alarm;
pub mod cleaner;
pub mod db;
pub mod events;
pub mod ledger;
pub mod pipeline;
pub mod plot_service;
pub mod plotting;
pub mod replicator;
pub mod size_history;
pub mod size_tracker;
pub mod storage_service;
pub mod sweeper;

#[cfg(test)]
pub mod test_support;
