mod audit_log;
mod config;
mod connections;
mod dispatcher;
mod error;
mod handlers;
mod signals;
mod worker_pool;

pub use audit_log::{AuditLog, LogRecord};
pub use config::{ServerConfig, load as load_config};
pub use connections::Connections;
pub use dispatcher::Dispatcher;
pub use error::{ServerError, ServerResult};
pub use signals::SignalChannel;
pub use worker_pool::WorkerPool;
