pub mod logger;

pub use logger::{AuditAction, AuditLog, AuditRecord, AuditStatus, read_records};
