//! Metergate Core - cost-aware query execution and caching gateway.
//!
//! Sits between report code and a metered, pay-per-byte-scanned warehouse.
//! Every query flows through a budget ledger, a textual optimizer, and a TTL
//! result cache so that a runaway report section cannot generate a runaway
//! bill.

pub mod alert;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod estimator;
pub mod ledger;
pub mod record;
pub mod request;
pub mod rewriter;

pub use alert::{Alert, AlertKind, AlertSeverity, AlertSink, MemoryAlertSink, TracingAlertSink};
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::{CostThresholds, TtlPolicy, DEFAULT_PRICE_PER_BYTE};
pub use coordinator::{
    Execution, ExecutionCoordinator, ExecutionOutcome, ExecutorError, WarehouseExecutor,
};
pub use error::{Error, RejectReason};
pub use estimator::{CostEstimate, CostEstimator};
pub use ledger::{Approval, CostLedger, CostStatus, LedgerStatus, UsageCounters};
pub use record::{CostRecord, CostRecordStore, MemoryRecordStore, SledRecordStore};
pub use request::{QueryCategory, QueryRequest};
pub use rewriter::{QueryRewriter, RewriteOutcome, SavingsEstimate};
