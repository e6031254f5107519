//! Execution pipeline.
//!
//! Orchestrates one query end to end: cache lookup, cost estimation, budget
//! check, rewrite, execution, usage recording, cache population. Holds no
//! state of its own beyond references to the other components, and never
//! holds one component's lock while calling another; the warehouse round
//! trip happens with no lock held at all.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::config::TtlPolicy;
use crate::error::Error;
use crate::estimator::CostEstimator;
use crate::ledger::CostLedger;
use crate::record::{CostRecord, CostRecordStore};
use crate::request::QueryRequest;
use crate::rewriter::QueryRewriter;

/// Result of one warehouse run.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Result rows as opaque JSON.
    pub rows: serde_json::Value,
    /// Bytes the backend scanned.
    pub bytes_processed: u64,
    /// Bytes the backend billed. Must be reported even when the backend
    /// served its own cache, since non-zero billing still counts against
    /// budget.
    pub bytes_billed: u64,
}

/// Opaque failure from the warehouse driver.
#[derive(Debug, ThisError)]
#[error("{0}")]
pub struct ExecutorError(pub String);

impl ExecutorError {
    /// Wrap a driver error message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// External collaborator that runs queries against the warehouse.
///
/// `dry_run` is the backend's no-cost estimation capability; `run` performs
/// the real, billed execution. Both are blocking network calls and are the
/// only operations in the pipeline expected to take non-trivial time.
pub trait WarehouseExecutor {
    /// Estimate the bytes a query would scan, without running it.
    fn dry_run(&self, sql: &str) -> Result<i64, ExecutorError>;

    /// Run a query and report true byte usage.
    fn run(&self, sql: &str) -> Result<Execution, ExecutorError>;
}

/// What the gateway returned for one request.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Result rows.
    pub rows: Arc<serde_json::Value>,
    /// Whether the result came from the gateway cache.
    pub from_cache: bool,
    /// Rewrite rules that fired (empty on a cache hit).
    pub applied_rules: Vec<&'static str>,
    /// Warnings: rewrite annotations plus any high-cost approval warning.
    pub warnings: Vec<String>,
    /// Cost actually billed for this call, in dollars. `None` on a cache
    /// hit, where nothing was billed.
    pub cost: Option<f64>,
    /// Bytes billed for this call. `None` on a cache hit.
    pub bytes_billed: Option<u64>,
}

/// Orchestrates the gateway components for each call.
pub struct ExecutionCoordinator {
    estimator: CostEstimator,
    rewriter: QueryRewriter,
    ttl: TtlPolicy,
    cache: Arc<ResultCache>,
    ledger: Arc<CostLedger>,
    records: Arc<dyn CostRecordStore>,
}

impl ExecutionCoordinator {
    /// Assemble a coordinator from its components.
    pub fn new(
        estimator: CostEstimator,
        rewriter: QueryRewriter,
        ttl: TtlPolicy,
        cache: Arc<ResultCache>,
        ledger: Arc<CostLedger>,
        records: Arc<dyn CostRecordStore>,
    ) -> Self {
        Self {
            estimator,
            rewriter,
            ttl,
            cache,
            ledger,
            records,
        }
    }

    /// The shared ledger.
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// The shared result cache.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Execute one request through the cost-control pipeline.
    ///
    /// On a cache hit the ledger is untouched. On a miss the query must pass
    /// the pre-execution budget check before the executor is invoked; an
    /// executor failure propagates without recording usage or poisoning the
    /// cache.
    pub fn execute(
        &self,
        request: &QueryRequest,
        executor: &dyn WarehouseExecutor,
    ) -> Result<ExecutionOutcome, Error> {
        let key = CacheKey::for_request(request);

        if let Some(rows) = self.cache.get(&key) {
            debug!(key = %key, category = %request.category, "cache hit");
            return Ok(ExecutionOutcome {
                rows,
                from_cache: true,
                applied_rules: Vec::new(),
                warnings: Vec::new(),
                cost: None,
                bytes_billed: None,
            });
        }

        // Estimate against the caller's query; the rewrite below only
        // shrinks the scan, so this is the conservative bound.
        let dry_run_bytes = executor
            .dry_run(&request.sql)
            .map_err(|e| Error::Estimation(e.to_string()))?;
        let estimate = self.estimator.estimate(dry_run_bytes);
        if estimate.estimation_error {
            return Err(Error::Estimation(
                "backend reported a negative byte estimate".into(),
            ));
        }

        let approval = self.ledger.check_query(&estimate)?;

        let mut warnings = Vec::new();
        if let Some(warning) = approval.warning {
            warn!(category = %request.category, "{warning}");
            warnings.push(warning);
        }

        let rewrite = self.rewriter.rewrite(&request.sql, request.category);
        warnings.extend(rewrite.warnings.iter().cloned());

        let started = Instant::now();
        let execution = executor
            .run(&rewrite.sql)
            .map_err(|e| Error::Execution(e.to_string()))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let billed_cost = self.estimator.billed_cost(execution.bytes_billed);
        self.ledger
            .record_usage(execution.bytes_processed, billed_cost);

        let record = CostRecord::new(
            request.category,
            execution.bytes_processed,
            execution.bytes_billed,
            billed_cost,
            &rewrite.sql,
            duration_ms,
        );
        if let Err(e) = self.records.append(&record) {
            // Auditing must not fail the query that already ran.
            warn!(error = %e, "could not append cost record");
        }

        let rows = Arc::new(execution.rows);
        self.cache
            .put(key, rows.clone(), self.ttl.ttl_for(request.category));

        debug!(
            key = %key,
            category = %request.category,
            bytes_billed = execution.bytes_billed,
            cost = billed_cost,
            duration_ms,
            "query executed"
        );

        Ok(ExecutionOutcome {
            rows,
            from_cache: false,
            applied_rules: rewrite.applied,
            warnings,
            cost: Some(billed_cost),
            bytes_billed: Some(execution.bytes_billed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;
    use crate::config::CostThresholds;
    use crate::record::MemoryRecordStore;
    use crate::request::QueryCategory;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubExecutor {
        bytes: i64,
        runs: AtomicUsize,
        dry_runs: AtomicUsize,
    }

    impl StubExecutor {
        fn returning(bytes: i64) -> Self {
            Self {
                bytes,
                runs: AtomicUsize::new(0),
                dry_runs: AtomicUsize::new(0),
            }
        }
    }

    impl WarehouseExecutor for StubExecutor {
        fn dry_run(&self, _sql: &str) -> Result<i64, ExecutorError> {
            self.dry_runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes)
        }

        fn run(&self, _sql: &str) -> Result<Execution, ExecutorError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(Execution {
                rows: json!([{"n": 1}]),
                bytes_processed: self.bytes.max(0) as u64,
                bytes_billed: self.bytes.max(0) as u64,
            })
        }
    }

    fn coordinator() -> ExecutionCoordinator {
        let thresholds = CostThresholds::default();
        let sink = Arc::new(MemoryAlertSink::new());
        ExecutionCoordinator::new(
            CostEstimator::with_default_pricing(&thresholds),
            QueryRewriter::new(),
            TtlPolicy::default(),
            Arc::new(ResultCache::new()),
            Arc::new(CostLedger::new(thresholds, sink).unwrap()),
            Arc::new(MemoryRecordStore::new()),
        )
    }

    #[test]
    fn test_miss_then_hit() {
        let coordinator = coordinator();
        let executor = StubExecutor::returning(10_000_000);
        let request = QueryRequest::new(
            "SELECT page FROM events WHERE event_date >= '2026-01-01' LIMIT 5",
            QueryCategory::Interactive,
        );

        let first = coordinator.execute(&request, &executor).unwrap();
        assert!(!first.from_cache);
        let second = coordinator.execute(&request, &executor).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.rows, first.rows);
        // one real execution total
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        // the hit skipped the ledger
        assert_eq!(coordinator.ledger().counters().day_queries, 1);
    }

    #[test]
    fn test_rejected_query_never_runs() {
        let coordinator = coordinator();
        // 500 GB dry run: $2.50, over the $1 per-query limit
        let executor = StubExecutor::returning(500_000_000_000);
        let request = QueryRequest::new("SELECT 1", QueryCategory::General);

        let err = coordinator.execute(&request, &executor).unwrap_err();
        assert!(matches!(err, Error::BudgetRejected(_)));
        assert_eq!(executor.dry_runs.load(Ordering::SeqCst), 1);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.ledger().counters().day_queries, 0);
    }
}
