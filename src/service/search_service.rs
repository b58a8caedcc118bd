use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::configuration::config::Config;
use crate::configuration::types::{FanoutConfig, TransactionConfig};
use crate::correlation::correlator::{TransactionCorrelator, LOOKUP_LIMIT};
use crate::decoder::bridge::DecoderBridge;
use crate::decoder::ingest::{ingest_capture, IngestReport};
use crate::decoder::pcap_writer::{records_to_pcap, records_to_text, DEFAULT_SNAPLEN};
use crate::error_handling::types::{DecodeError, SearchError, StorageError};
use crate::fanout::executor::{FanoutQuery, NodeFailurePolicy, NodeFanoutExecutor};
use crate::model::context::{CallerContext, Deadline};
use crate::model::correlation::{CorrelationRule, ReportType};
use crate::model::filter::{FieldMappingTable, FilterType, IdentifierLookup, SearchRequest};
use crate::model::record::{CapturedRecord, FieldPath};
use crate::model::summary::AliasTable;
use crate::query::compiler::{compile, DEFAULT_LIMIT};
use crate::query::predicate::{CompareOp, Predicate, ScalarValue};
use crate::scripting::sandbox::ScriptSandbox;
use crate::scripting::script_store::{InMemoryScriptStore, ScriptStore};
use crate::storage::registry::NodeRegistry;
use crate::summary::dedup::dedup_records;
use crate::summary::summarizer::{flat_reply, message_element, search_element, summarize};

/// Category key to its smart-input field mapping.
pub type FieldMappings = HashMap<String, FieldMappingTable>;

pub const RTCP_TABLE: &str = "hep_proto_5_default";
pub const RTP_TABLE: &str = "hep_proto_35_default";
pub const LOG_TABLE: &str = "hep_proto_100_default";

/// Rendered transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionReport {
    Summary(Value),
    Pcap(Vec<u8>),
    Text(String),
}

fn profile_of(table: &str) -> String {
    table.trim_start_matches("hep_proto_").to_string()
}

fn sid_values(values: &[Value]) -> Vec<ScalarValue> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(ScalarValue::Text(s.clone())),
            Value::Number(n) => Some(ScalarValue::Text(n.to_string())),
            _ => None,
        })
        .collect()
}

fn total_and_data(records: &[CapturedRecord]) -> Value {
    let data: Vec<_> = records.iter().map(message_element).collect();
    json!({ "total": data.len(), "data": data })
}

/// Entry point for searches, lookups, transactions and imports over the
/// registered capture nodes.
pub struct SearchService {
    executor: NodeFanoutExecutor,
    transaction: TransactionConfig,
    fanout: FanoutConfig,
    sandbox: ScriptSandbox,
    scripts: Arc<dyn ScriptStore>,
    decoder: Option<DecoderBridge>,
}

impl SearchService {
    pub fn new(registry: NodeRegistry, config: &Config) -> Self {
        let decoder = match DecoderBridge::new(config.decoder.clone()) {
            Ok(bridge) => Some(bridge),
            Err(DecodeError::NotActive) => None,
            Err(e) => {
                warn!("External decoder disabled: {}", e);
                None
            }
        };
        Self {
            executor: NodeFanoutExecutor::new(registry, config.isolation.clone(), config.fanout.max_workers),
            transaction: config.transaction.clone(),
            fanout: config.fanout.clone(),
            sandbox: ScriptSandbox::default(),
            scripts: Arc::new(InMemoryScriptStore::new(config.scripts.clone())),
            decoder,
        }
    }

    /// Opens every configured node database.
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let registry = NodeRegistry::from_config(&config.nodes)?;
        Ok(Self::new(registry, config))
    }

    pub fn with_script_store(mut self, scripts: Arc<dyn ScriptStore>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn node_list(&self) -> Vec<String> {
        self.executor.registry().names()
    }

    /// The caller's context, bounded by the configured fanout timeout when
    /// the caller brought no deadline of its own.
    fn scoped(&self, caller: &CallerContext) -> CallerContext {
        let mut scoped = caller.clone();
        if scoped.deadline.remaining().is_none() {
            scoped.deadline = Deadline::from_secs(self.fanout.timeout_secs);
        }
        scoped
    }

    fn request_limit(request: &SearchRequest) -> usize {
        request.param.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Filtered search over every category of the request.
    pub fn search_data(
        &self,
        request: &SearchRequest,
        aliases: &AliasTable,
        caller: &CallerContext,
        mappings: &FieldMappings,
    ) -> Result<Value, SearchError> {
        let caller = self.scoped(caller);
        let no_mapping = FieldMappingTable::default();
        let mut records = Vec::new();

        for category in request.categories() {
            let elements = request.filter_elements(category);
            let mapping = mappings.get(category).unwrap_or(&no_mapping);
            let compiled = compile(&elements, request.param.or_logic, mapping);
            let has_limit = elements
                .iter()
                .any(|e| e.name == "limit" || e.kind == FilterType::Limit);
            let query = FanoutQuery {
                table: format!("hep_proto_{}", category),
                profile: category.clone(),
                time_range: request.timestamp,
                predicate: compiled.to_predicate(),
                limit: if has_limit { compiled.limit } else { Self::request_limit(request) },
                allowlist: request.nodes().to_vec(),
            };
            debug!("[{}] Search {} -> {:?}", caller.request_id, query.table, query.predicate);
            records.extend(self.executor.execute(&query, &caller, NodeFailurePolicy::Partial)?);
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        info!("[{}] Search returned {} records", caller.request_id, records.len());
        let elements = records.iter().map(|r| search_element(r, aliases)).collect();
        Ok(flat_reply(elements))
    }

    fn lookup_by_id(&self, request: &SearchRequest, caller: &CallerContext) -> Result<Vec<CapturedRecord>, SearchError> {
        let id_column = FieldPath::Column("id".into());
        let mut records = Vec::new();
        for category in request.categories() {
            let predicate = match request.identifier_lookup(category)? {
                IdentifierLookup::Id(id) => Predicate::compare(id_column.clone(), CompareOp::Eq, ScalarValue::Integer(id)),
                IdentifierLookup::Uuids(ids) => Predicate::InList {
                    field: id_column.clone(),
                    values: ids.into_iter().map(ScalarValue::Integer).collect(),
                    negated: false,
                },
            };
            let query = FanoutQuery {
                table: format!("hep_proto_{}", category),
                profile: category.clone(),
                time_range: request.timestamp,
                predicate,
                limit: Self::request_limit(request),
                allowlist: request.nodes().to_vec(),
            };
            records.extend(self.executor.execute(&query, caller, NodeFailurePolicy::Partial)?);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Records by `id` or `uuid` list, payload included.
    pub fn get_message_by_id(&self, request: &SearchRequest, caller: &CallerContext) -> Result<Value, SearchError> {
        let caller = self.scoped(caller);
        let records = self.lookup_by_id(request, &caller)?;
        Ok(flat_reply(records.iter().map(message_element).collect()))
    }

    /// Like [`get_message_by_id`](Self::get_message_by_id), with a `decoded`
    /// member on records the decoder handled successfully.
    pub fn get_decoded_message_by_id(&self, request: &SearchRequest, caller: &CallerContext) -> Result<Value, SearchError> {
        let bridge = self.decoder.as_ref().ok_or(SearchError::DecoderUnavailable)?;
        let caller = self.scoped(caller);
        let records = self.lookup_by_id(request, &caller)?;

        let mut elements = Vec::with_capacity(records.len());
        for record in &records {
            let mut element = message_element(record);
            if bridge.handles(&record.profile) {
                match bridge.decode_record(record, &caller.deadline) {
                    Ok(decoded) => {
                        element.insert("decoded".into(), decoded);
                    }
                    Err(DecodeError::Timeout) => return Err(SearchError::Timeout),
                    Err(e) => warn!("[{}] Decoding record {} failed, returning it undecoded: {}", caller.request_id, record.id, e),
                }
            }
            elements.push(element);
        }
        Ok(flat_reply(elements))
    }

    fn seed_records(&self, request: &SearchRequest, caller: &CallerContext) -> Result<Vec<CapturedRecord>, SearchError> {
        let mut seed = Vec::new();
        for category in request.categories() {
            let call_ids = request
                .param
                .search
                .get(category)
                .and_then(|v| v.get("callid"))
                .and_then(Value::as_array)
                .map(|ids| sid_values(ids))
                .unwrap_or_default();
            if call_ids.is_empty() {
                warn!("[{}] No callid given for {}, skipping it", caller.request_id, category);
                continue;
            }
            let query = FanoutQuery {
                table: format!("hep_proto_{}", category),
                profile: category.clone(),
                time_range: request.timestamp,
                predicate: Predicate::InList {
                    field: FieldPath::Column("sid".into()),
                    values: call_ids,
                    negated: false,
                },
                limit: LOOKUP_LIMIT,
                allowlist: request.nodes().to_vec(),
            };
            seed.extend(self.executor.execute(&query, caller, NodeFailurePolicy::Partial)?);
        }
        Ok(seed)
    }

    /// Seed query by call id, correlation chain, deduplication and one of
    /// the three renderings.
    pub fn get_transaction(
        &self,
        request: &SearchRequest,
        rules: &[CorrelationRule],
        aliases: &AliasTable,
        report: ReportType,
        caller: &CallerContext,
    ) -> Result<TransactionReport, SearchError> {
        TransactionCorrelator::validate(rules)?;
        let caller = self.scoped(caller);
        let seed = self.seed_records(request, &caller)?;
        debug!("[{}] Transaction seed has {} records", caller.request_id, seed.len());

        let correlator = TransactionCorrelator::new(&self.executor, &self.sandbox, self.scripts.as_ref());
        let outcome = correlator.correlate(seed, rules, &request.timestamp, request.nodes(), &caller)?;
        let mut records = dedup_records(outcome.records, self.transaction.global_deduplicate);
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        info!(
            "[{}] Transaction has {} records after {} lookups",
            caller.request_id,
            records.len(),
            outcome.queries_issued
        );

        Ok(match report {
            ReportType::Summary => TransactionReport::Summary(summarize(&records, aliases)),
            ReportType::Pcap => TransactionReport::Pcap(records_to_pcap(&records, DEFAULT_SNAPLEN)),
            ReportType::Text => TransactionReport::Text(records_to_text(&records)),
        })
    }

    fn by_call_id(&self, table: &str, request: &SearchRequest, caller: &CallerContext) -> Result<Vec<CapturedRecord>, SearchError> {
        let query = FanoutQuery {
            table: table.to_string(),
            profile: profile_of(table),
            time_range: request.timestamp,
            predicate: Predicate::InList {
                field: FieldPath::Column("sid".into()),
                values: sid_values(&request.call_ids()),
                negated: false,
            },
            limit: LOOKUP_LIMIT,
            allowlist: request.nodes().to_vec(),
        };
        self.executor.execute(&query, caller, NodeFailurePolicy::Fatal)
    }

    /// RTCP and RTP reports of the requested calls. Any node failure fails
    /// the request.
    pub fn get_transaction_qos(&self, request: &SearchRequest, caller: &CallerContext) -> Result<Value, SearchError> {
        let caller = self.scoped(caller);
        let rtcp = self.by_call_id(RTCP_TABLE, request, &caller)?;
        let rtp = self.by_call_id(RTP_TABLE, request, &caller)?;
        Ok(json!({
            "rtcp": total_and_data(&rtcp),
            "rtp": total_and_data(&rtp),
        }))
    }

    /// Log records of the requested calls. Any node failure fails the request.
    pub fn get_transaction_log(&self, request: &SearchRequest, caller: &CallerContext) -> Result<Value, SearchError> {
        let caller = self.scoped(caller);
        let logs = self.by_call_id(LOG_TABLE, request, &caller)?;
        Ok(total_and_data(&logs))
    }

    /// Decodes a capture file and stores its frames on the import node.
    pub fn import_capture(&self, capture: Vec<u8>, align_to_now: bool) -> Result<IngestReport, SearchError> {
        let bridge = self.decoder.as_ref().ok_or(SearchError::DecoderUnavailable)?;
        let align_to = align_to_now.then(|| Utc::now().timestamp_micros());
        let deadline = Deadline::from_secs(self.fanout.timeout_secs);
        Ok(ingest_capture(bridge, self.executor.registry(), capture, align_to, &deadline)?)
    }
}
