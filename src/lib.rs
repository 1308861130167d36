// Library for tests to access modules

pub mod alert_engine;
pub mod analytics;
pub mod archive_repo;
pub mod config;
pub mod context;
pub mod control_loop;
pub mod models;
pub mod notifier;
pub mod peak_discharge;
pub mod routes;
pub mod sample_cache;
pub mod state_store;
pub mod summary_worker;
pub mod worker;
