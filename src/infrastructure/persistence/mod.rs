pub mod audit_log;
pub mod database;
pub mod replay;

pub use audit_log::AuditLog;
pub use database::Database;
