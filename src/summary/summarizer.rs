use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use crate::model::record::{as_f64, as_text, CapturedRecord};
use crate::model::summary::{endpoint_key, AliasTable, CallSummary, HostEntry};
use crate::summary::payload_types::payload_label;
use crate::summary::sip::parse_hosts;

const PREVIEW_CHARS: usize = 50;
const DEFAULT_SRC_IP: &str = "127.0.0.1";
const DEFAULT_DST_IP: &str = "127.0.0.2";

/// Header fields merged into one object (protocol header wins on clashes)
/// together with the record columns.
pub fn flatten(record: &CapturedRecord) -> Map<String, Value> {
    let mut element = record.data_header.clone();
    element.extend(record.protocol_header.clone());
    element.insert("id".into(), json!(record.id));
    element.insert("sid".into(), json!(record.sid));
    element.insert("node".into(), json!(record.node));
    element.insert("dbnode".into(), json!(record.origin_node));
    element.insert("profile".into(), json!(record.profile));
    element
}

fn ip_port(element: &Map<String, Value>, ip_key: &str, port_key: &str) -> Option<(String, i64)> {
    let ip = element.get(ip_key).and_then(as_text)?;
    let port = element.get(port_key).and_then(as_f64).unwrap_or(0.0) as i64;
    Some((ip, port))
}

/// Row of a search reply.
pub fn search_element(record: &CapturedRecord, aliases: &AliasTable) -> Map<String, Value> {
    let mut element = flatten(record);
    if let Some((ip, port)) = ip_port(&element, "srcIp", "srcPort") {
        element.insert("aliasSrc".into(), json!(aliases.resolve(&ip, port)));
    }
    if let Some((ip, port)) = ip_port(&element, "dstIp", "dstPort") {
        element.insert("aliasDst".into(), json!(aliases.resolve(&ip, port)));
    }
    element.insert("table".into(), json!(format!("hep_proto_{}", record.profile)));
    element.insert("create_date".into(), json!(record.created_at.timestamp_millis()));
    element.entry("uuid").or_insert_with(|| json!(record.id));
    element
}

/// Row of a message-by-id reply, carrying the payload.
pub fn message_element(record: &CapturedRecord) -> Map<String, Value> {
    let mut element = flatten(record);
    let micros = record.capture_micros();
    element.insert("raw".into(), json!(record.raw));
    element.insert("create_date".into(), json!(micros / 1000));
    element.insert("create_ts".into(), json!(micros / 1000));
    element.insert("micro_ts".into(), json!(micros));
    element.entry("uuid").or_insert_with(|| json!(record.id));
    element
}

/// Keys of all elements, in first-seen order.
pub fn discovered_keys<'a, I: IntoIterator<Item = &'a Map<String, Value>>>(elements: I) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for element in elements {
        for key in element.keys() {
            if seen.insert(key.as_str()) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// `{total, data, keys}` over flat elements.
pub fn flat_reply(elements: Vec<Map<String, Value>>) -> Value {
    let keys = discovered_keys(&elements);
    json!({
        "total": elements.len(),
        "data": elements,
        "keys": keys,
    })
}

/// Host table that hands out positions in first-seen order.
#[derive(Debug, Default)]
struct HostTable {
    entries: Map<String, Value>,
    positions: HashMap<String, usize>,
}

impl HostTable {
    fn position(&mut self, id: &str) -> usize {
        if let Some(position) = self.positions.get(id) {
            return *position;
        }
        let position = self.positions.len();
        self.positions.insert(id.to_string(), position);
        let entry = HostEntry {
            host: vec![id.to_string()],
            position,
        };
        self.entries.insert(id.to_string(), json!(entry));
        position
    }
}

/// Projects records into the call-flow summary:
/// `{total, data: {messages, hosts, calldata, alias}, keys}`.
pub fn summarize(records: &[CapturedRecord], aliases: &AliasTable) -> Value {
    let mut hosts = HostTable::default();
    let mut alias = Map::new();
    let mut messages = Vec::with_capacity(records.len());
    let mut calldata = Vec::with_capacity(records.len());

    for record in records {
        let mut element = flatten(record);
        element.insert("create_date".into(), json!(record.created_at.timestamp_millis()));
        element.insert("raw".into(), json!(record.raw));

        let mut call = CallSummary {
            id: record.id,
            sid: record.sid.clone(),
            ..Default::default()
        };

        let payload_type = element.get("payloadType").and_then(as_f64).map(|p| p as i64);
        if let Some(code) = payload_type {
            let (method, text) = payload_label(code);
            call.method = method.to_string();
            call.method_text = text.to_string();
        }

        if !element.contains_key("srcIp") {
            element.insert("srcIp".into(), json!(DEFAULT_SRC_IP));
            element.insert("srcPort".into(), json!(0));
        }
        if !element.contains_key("dstIp") {
            element.insert("dstIp".into(), json!(DEFAULT_DST_IP));
            element.insert("dstPort".into(), json!(0));
        }
        if let Some((ip, port)) = ip_port(&element, "srcIp", "srcPort") {
            call.src_host = ip.clone();
            call.src_ip = ip;
            call.src_port = port;
        }
        if let Some((ip, port)) = ip_port(&element, "dstIp", "dstPort") {
            call.dst_host = ip.clone();
            call.dst_ip = ip;
            call.dst_port = port;
        }

        for key in ["method", "msg_name", "event"] {
            if let Some(label) = element.get(key).and_then(as_text) {
                call.method = label.clone();
                call.method_text = label;
            }
        }

        let micros = record.capture_micros();
        call.create_date = micros / 1000;
        call.micro_ts = micros;
        if element.contains_key("timeSeconds") && element.contains_key("timeUseconds") {
            element.insert("create_date".into(), json!(call.create_date));
            element.insert("create_ts".into(), json!(call.create_date));
            element.insert("micro_ts".into(), json!(call.micro_ts));
        }

        if let Some(protocol) = element.get("protocol").and_then(as_f64) {
            call.protocol = protocol as i64;
        }

        call.ruri_user = record.raw.chars().take(PREVIEW_CHARS).collect();
        if payload_type == Some(1) && !record.raw.is_empty() {
            let sip = parse_hosts(&record.raw);
            if let Some(from) = sip.from_host {
                element.entry("from_domain").or_insert_with(|| json!(from));
            }
            if let Some(to) = sip.to_host {
                element.entry("to_domain").or_insert_with(|| json!(to));
            }
        }

        call.src_id = endpoint_key(&call.src_host, call.src_port);
        call.dst_id = endpoint_key(&call.dst_host, call.dst_port);

        let src_key = endpoint_key(&call.src_ip, call.src_port);
        let dst_key = endpoint_key(&call.dst_ip, call.dst_port);
        call.alias_src = aliases.resolve(&call.src_ip, call.src_port);
        call.alias_dst = aliases.resolve(&call.dst_ip, call.dst_port);
        alias.insert(src_key, json!(call.alias_src));
        alias.insert(dst_key, json!(call.alias_dst));

        hosts.position(&call.src_id);
        call.destination = hosts.position(&call.dst_id);

        calldata.push(call);
        messages.push(element);
    }

    let keys = discovered_keys(&messages);
    json!({
        "total": messages.len(),
        "data": {
            "messages": messages,
            "hosts": hosts.entries,
            "calldata": calldata,
            "alias": alias,
        },
        "keys": keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const INVITE: &str = "INVITE sip:bob@b.example SIP/2.0\r\n\
                          From: <sip:alice@a.example>;tag=1\r\n\
                          To: <sip:bob@b.example>\r\n\r\n";

    fn sip_record(id: i64, src: (&str, i64), dst: (&str, i64)) -> CapturedRecord {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut r = CapturedRecord::new(id, "call-1", created);
        r.raw = INVITE.into();
        r.protocol_header.insert("srcIp".into(), json!(src.0));
        r.protocol_header.insert("srcPort".into(), json!(src.1));
        r.protocol_header.insert("dstIp".into(), json!(dst.0));
        r.protocol_header.insert("dstPort".into(), json!(dst.1));
        r.protocol_header.insert("payloadType".into(), json!(1));
        r.protocol_header.insert("timeSeconds".into(), json!(1714557600));
        r.protocol_header.insert("timeUseconds".into(), json!(123456));
        r.data_header.insert("method".into(), json!("INVITE"));
        r
    }

    fn aliases() -> AliasTable {
        AliasTable::new(
            [
                ("10.0.0.1:5060".to_string(), "proxy".to_string()),
                ("10.0.0.1:0".to_string(), "proxy-any".to_string()),
                ("10.0.0.2:0".to_string(), "gateway".to_string()),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn summary_builds_hosts_aliases_and_labels() {
        let records = vec![
            sip_record(1, ("10.0.0.1", 5060), ("10.0.0.2", 5080)),
            sip_record(2, ("10.0.0.2", 5080), ("10.0.0.1", 5060)),
            sip_record(3, ("10.0.0.3", 5060), ("10.0.0.1", 5061)),
        ];
        let reply = summarize(&records, &aliases());

        assert_eq!(reply["total"], json!(3));
        let calls = reply["data"]["calldata"].as_array().unwrap();
        assert_eq!(calls[0]["method"], json!("INVITE"));
        assert_eq!(calls[0]["aliasSrc"], json!("proxy"));
        assert_eq!(calls[0]["aliasDst"], json!("gateway"));
        assert_eq!(calls[0]["destination"], json!(1));
        assert_eq!(calls[1]["destination"], json!(0));
        assert_eq!(calls[2]["aliasSrc"], json!("10.0.0.3:5060"));
        assert_eq!(calls[2]["aliasDst"], json!("proxy-any"));
        assert_eq!(calls[2]["destination"], json!(3));
        assert_eq!(calls[0]["micro_ts"], json!(1_714_557_600_123_456i64));
        assert_eq!(calls[0]["create_date"], json!(1_714_557_600_123i64));
        assert_eq!(calls[0]["ruri_user"].as_str().unwrap().chars().count(), 50);

        let hosts = &reply["data"]["hosts"];
        assert_eq!(hosts["10.0.0.1:5060"]["position"], json!(0));
        assert_eq!(hosts["10.0.0.3:5060"]["position"], json!(2));
        assert_eq!(reply["data"]["alias"]["10.0.0.1:5061"], json!("proxy-any"));

        let msg = &reply["data"]["messages"][0];
        assert_eq!(msg["from_domain"], json!("a.example"));
        assert_eq!(msg["to_domain"], json!("b.example"));
        assert_eq!(msg["create_ts"], json!(1_714_557_600_123i64));
        let keys: Vec<&str> = reply["keys"].as_array().unwrap().iter().filter_map(|k| k.as_str()).collect();
        assert!(keys.contains(&"from_domain"));
        assert!(keys.contains(&"srcIp"));
    }

    #[test]
    fn missing_addresses_use_defaults() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut r = CapturedRecord::new(7, "log-1", created);
        r.protocol_header.insert("payloadType".into(), json!(100));
        let reply = summarize(&[r], &AliasTable::default());
        let call = &reply["data"]["calldata"][0];
        assert_eq!(call["srcId"], json!("127.0.0.1:0"));
        assert_eq!(call["dstId"], json!("127.0.0.2:0"));
        assert_eq!(call["method"], json!("LOG"));
        assert_eq!(call["create_date"], json!(created.timestamp_millis()));
        assert_eq!(reply["data"]["messages"][0]["dstPort"], json!(0));
    }

    #[test]
    fn ipv6_endpoints_are_bracketed() {
        let r = sip_record(1, ("2001:db8::1", 5060), ("10.0.0.2", 5060));
        let reply = summarize(&[r], &AliasTable::default());
        assert_eq!(reply["data"]["calldata"][0]["srcId"], json!("[2001:db8::1]:5060"));
        assert!(reply["data"]["hosts"].get("[2001:db8::1]:5060").is_some());
    }

    #[test]
    fn search_rows_carry_aliases_and_table() {
        let mut r = sip_record(9, ("10.0.0.1", 5060), ("10.0.0.9", 5060));
        r.profile = "1_call".into();
        r.node = "local".into();
        let row = search_element(&r, &aliases());
        assert_eq!(row["aliasSrc"], json!("proxy"));
        assert_eq!(row["aliasDst"], json!("10.0.0.9:5060"));
        assert_eq!(row["table"], json!("hep_proto_1_call"));
        assert_eq!(row["uuid"], json!(9));
        assert!(!row.contains_key("raw"));

        let reply = flat_reply(vec![row, message_element(&r)]);
        assert_eq!(reply["total"], json!(2));
        assert_eq!(reply["data"][1]["micro_ts"], json!(1_714_557_600_123_456i64));
    }
}
