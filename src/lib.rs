pub mod api;
pub mod app;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod reduce;
pub mod store;

pub use app::{App, Services};
pub use config::Config;
pub use datasource::{ChainQuery, ChainQueryError, JsonRpcChain, MockChain};
pub use db::{init_db, Repository};
pub use domain::{
    Address, BalanceId, Decimal, EntityKey, EntityKind, LogEvent, LogStatus, Mark, OrderKey,
    Snapshot, TimeMs,
};
pub use error::AppError;
pub use reduce::{ChainUpdateService, FullReduceService, ReduceEngine, ServiceError};
