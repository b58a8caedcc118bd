use std::sync::Arc;
use std::thread;

use log::{debug, error, warn};

use crate::configuration::types::IsolationConfig;
use crate::error_handling::types::{SearchError, StorageError};
use crate::model::context::CallerContext;
use crate::model::filter::TimeRange;
use crate::model::record::{CapturedRecord, FieldPath};
use crate::query::predicate::{CompareOp, Predicate, ScalarValue};
use crate::storage::registry::NodeRegistry;
use crate::storage::storage_trait::NodeBackend;
use crate::storage::types::ScanRequest;

/// What a failing node does to the whole call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFailurePolicy {
    /// Drop the node's rows and keep going.
    Partial,
    /// Fail the call.
    Fatal,
}

/// One query to run on every authorized node.
#[derive(Debug, Clone)]
pub struct FanoutQuery {
    pub table: String,
    /// Stamped on every returned row.
    pub profile: String,
    pub time_range: TimeRange,
    pub predicate: Predicate,
    pub limit: usize,
    pub allowlist: Vec<String>,
}

pub struct NodeFanoutExecutor {
    registry: NodeRegistry,
    isolation: IsolationConfig,
    max_workers: usize,
}

impl NodeFanoutExecutor {
    pub fn new(registry: NodeRegistry, isolation: IsolationConfig, max_workers: usize) -> Self {
        Self {
            registry,
            isolation,
            max_workers: max_workers.max(1),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// The filter predicate with the caller's isolation fragment and IP
    /// exclusions ANDed on.
    pub fn guarded_predicate(&self, predicate: &Predicate, caller: &CallerContext) -> Predicate {
        let mut parts = vec![predicate.clone()];
        if let Some(fragment) = self.isolation.fragment_for(&caller.user_group) {
            parts.push(Predicate::Raw(fragment.to_string()));
        }
        for ip in &caller.excluded_ips {
            for side in ["protocol_header.srcIp", "protocol_header.dstIp"] {
                // Rows without the address are not excluded.
                parts.push(Predicate::Any(vec![
                    Predicate::IsNull {
                        field: FieldPath::parse(side),
                    },
                    Predicate::compare(FieldPath::parse(side), CompareOp::NotEq, ScalarValue::Text(ip.clone())),
                ]));
            }
        }
        Predicate::and(parts)
    }

    /// Runs the query on every node that is both allow-listed and registered,
    /// then merges the rows in ascending creation order.
    pub fn execute(
        &self,
        query: &FanoutQuery,
        caller: &CallerContext,
        policy: NodeFailurePolicy,
    ) -> Result<Vec<CapturedRecord>, SearchError> {
        let rid = caller.request_id;
        let nodes = self.registry.authorized(&query.allowlist);
        if nodes.is_empty() {
            debug!("[{}] No authorized node for {}", rid, query.table);
            return Ok(Vec::new());
        }
        let request = ScanRequest::new(
            query.table.clone(),
            query.time_range,
            self.guarded_predicate(&query.predicate, caller),
            query.limit,
        );

        let mut outcomes: Vec<(String, Result<Vec<CapturedRecord>, StorageError>)> = Vec::with_capacity(nodes.len());
        for batch in nodes.chunks(self.max_workers) {
            thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|(name, backend)| {
                        let request = &request;
                        let deadline = &caller.deadline;
                        let backend: Arc<dyn NodeBackend> = Arc::clone(backend);
                        (name.clone(), scope.spawn(move || backend.scan(request, deadline)))
                    })
                    .collect();
                for (name, handle) in handles {
                    let result = handle.join().unwrap_or_else(|_| {
                        error!("[{}] Scan worker for node {} panicked", rid, name);
                        Err(StorageError::ReadFailed)
                    });
                    outcomes.push((name, result));
                }
            });
        }

        let mut merged = Vec::new();
        for (name, result) in outcomes {
            match result {
                Ok(rows) => {
                    debug!("[{}] Node {} returned {} rows from {}", rid, name, rows.len(), query.table);
                    merged.extend(rows.into_iter().map(|mut row| {
                        row.node = name.clone();
                        row.origin_node = name.clone();
                        row.profile = query.profile.clone();
                        row
                    }));
                }
                Err(StorageError::Timeout) => {
                    warn!("[{}] Node {} exceeded the request deadline", rid, name);
                    return Err(SearchError::Timeout);
                }
                Err(e) if policy == NodeFailurePolicy::Fatal => {
                    error!("[{}] Node {} failed on {}: {}", rid, name, query.table, e);
                    return Err(SearchError::NodeFailed { node: name, source: e });
                }
                Err(e) => {
                    error!("[{}] Node {} failed on {}, dropping its rows: {}", rid, name, query.table, e);
                }
            }
        }
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::context::Deadline;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex as StdMutex;

    struct CannedBackend {
        rows: Vec<CapturedRecord>,
        fail: Option<fn() -> StorageError>,
        seen: StdMutex<Vec<ScanRequest>>,
    }

    impl CannedBackend {
        fn with_rows(offsets: &[i64]) -> Arc<Self> {
            let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
            let rows = offsets
                .iter()
                .map(|s| CapturedRecord::new(*s, format!("sid-{}", s), base + Duration::seconds(*s)))
                .collect();
            Arc::new(Self {
                rows,
                fail: None,
                seen: StdMutex::new(Vec::new()),
            })
        }

        fn failing(err: fn() -> StorageError) -> Arc<Self> {
            Arc::new(Self {
                rows: Vec::new(),
                fail: Some(err),
                seen: StdMutex::new(Vec::new()),
            })
        }
    }

    impl NodeBackend for CannedBackend {
        fn scan(&self, request: &ScanRequest, _deadline: &Deadline) -> Result<Vec<CapturedRecord>, StorageError> {
            self.seen.lock().unwrap().push(request.clone());
            match self.fail {
                Some(err) => Err(err()),
                None => Ok(self.rows.clone()),
            }
        }

        fn insert(&self, _table: &str, _record: &CapturedRecord) -> Result<i64, StorageError> {
            Err(StorageError::WriteFailed)
        }

        fn ensure_table(&self, _table: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn query(allow: &[&str]) -> FanoutQuery {
        FanoutQuery {
            table: "hep_proto_1_call".into(),
            profile: "call".into(),
            time_range: TimeRange::new(0, 1),
            predicate: Predicate::All(vec![]),
            limit: 200,
            allowlist: allow.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn merges_sorted_and_stamped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut registry = NodeRegistry::new();
        registry.register("a", CannedBackend::with_rows(&[5, 1]));
        registry.register("b", CannedBackend::with_rows(&[3]));
        registry.register("c", CannedBackend::with_rows(&[0]));
        let exec = NodeFanoutExecutor::new(registry, IsolationConfig::default(), 1);

        let rows = exec
            .execute(&query(&["a", "b"]), &CallerContext::new("admin"), NodeFailurePolicy::Partial)
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(rows[1].node, "b");
        assert_eq!(rows[1].origin_node, "b");
        assert!(rows.iter().all(|r| r.profile == "call"));
    }

    #[test]
    fn unlisted_nodes_are_never_queried() {
        let listed = CannedBackend::with_rows(&[1]);
        let hidden = CannedBackend::with_rows(&[2]);
        let mut registry = NodeRegistry::new();
        registry.register("listed", listed.clone());
        registry.register("hidden", hidden.clone());
        let exec = NodeFanoutExecutor::new(registry, IsolationConfig::default(), 4);
        exec.execute(&query(&["listed", "ghost"]), &CallerContext::default(), NodeFailurePolicy::Partial)
            .unwrap();
        assert_eq!(listed.seen.lock().unwrap().len(), 1);
        assert!(hidden.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failure_policy_is_per_call() {
        let mut registry = NodeRegistry::new();
        registry.register("good", CannedBackend::with_rows(&[1]));
        registry.register("bad", CannedBackend::failing(|| StorageError::ReadFailed));
        let exec = NodeFanoutExecutor::new(registry, IsolationConfig::default(), 2);
        let q = query(&["good", "bad"]);

        let partial = exec.execute(&q, &CallerContext::default(), NodeFailurePolicy::Partial).unwrap();
        assert_eq!(partial.len(), 1);

        let fatal = exec.execute(&q, &CallerContext::default(), NodeFailurePolicy::Fatal);
        assert!(matches!(fatal, Err(SearchError::NodeFailed { ref node, .. }) if node == "bad"));
    }

    #[test]
    fn node_timeout_fails_the_call() {
        let mut registry = NodeRegistry::new();
        registry.register("slow", CannedBackend::failing(|| StorageError::Timeout));
        let exec = NodeFanoutExecutor::new(registry, IsolationConfig::default(), 2);
        let res = exec.execute(&query(&["slow"]), &CallerContext::default(), NodeFailurePolicy::Partial);
        assert!(matches!(res, Err(SearchError::Timeout)));
    }

    #[test]
    fn isolation_and_exclusions_are_anded() {
        let backend = CannedBackend::with_rows(&[]);
        let mut registry = NodeRegistry::new();
        registry.register("n", backend.clone());
        let isolation = IsolationConfig {
            group: Some("tenant".into()),
            query: Some("sid <> 'x'".into()),
        };
        let exec = NodeFanoutExecutor::new(registry, isolation, 1);
        let caller = CallerContext::new("tenant").with_excluded_ips(vec!["10.0.0.9".into()]);
        exec.execute(&query(&["n"]), &caller, NodeFailurePolicy::Partial).unwrap();

        let seen = backend.seen.lock().unwrap();
        let sql = seen[0].predicate.to_sql().unwrap();
        assert!(sql.sql.contains("(sid <> 'x')"));
        assert_eq!(sql.binds.iter().filter(|b| **b == ScalarValue::Text("10.0.0.9".into())).count(), 2);

        let other = CallerContext::new("someone-else");
        let p = exec.guarded_predicate(&Predicate::All(vec![]), &other);
        assert!(p.is_trivial());
    }
}
