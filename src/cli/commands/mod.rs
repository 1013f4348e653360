//! CLI command implementations.

mod ask;
mod config;
mod doctor;
mod feeds;
mod list;
mod maintenance;
mod serve;
mod status;
mod worker;

pub use ask::run_ask;
pub use config::run_config;
pub use doctor::run_doctor;
pub use feeds::{run_add, run_sync};
pub use list::run_list;
pub use maintenance::{run_reconcile, run_retry};
pub use serve::run_serve;
pub use status::run_status;
pub use worker::run_worker;
