use chrono::DateTime;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::decoder::bridge::DecoderBridge;
use crate::error_handling::types::DecodeError;
use crate::model::context::Deadline;
use crate::model::record::CapturedRecord;
use crate::storage::registry::NodeRegistry;

/// Fixed arguments for bulk decoding, with RTP heuristics on.
pub const BULK_ARGS: &[&str] = &["-Q", "-T", "json", "-o", "rtp.heuristic_rtp:TRUE", "-l", "-i", "-"];

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_SCTP: u8 = 132;

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub good: usize,
    pub bad: usize,
}

/// Timing and addressing of one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub micros: i64,
    pub ip_version: Option<String>,
    pub ip_proto: u8,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub frame: Value,
}

fn layer_str<'a>(layers: &'a Value, layer: &str, field: &str) -> Option<&'a str> {
    layers.get(layer)?.get(field)?.as_str()
}

fn layer_num<T: std::str::FromStr>(layers: &Value, layer: &str, field: &str) -> Option<T> {
    layer_str(layers, layer, field)?.trim().parse().ok()
}

/// `"1714557600.123456789"` to microseconds.
fn epoch_micros(text: &str) -> Option<i64> {
    let (secs, frac) = text.trim().split_once('.').unwrap_or((text.trim(), "0"));
    let secs: i64 = secs.parse().ok()?;
    let digits: String = frac.chars().take(6).collect();
    let micros: i64 = format!("{:0<6}", digits).parse().ok()?;
    Some(secs * 1_000_000 + micros)
}

impl DecodedFrame {
    /// Reads one element of the decoder's JSON array; `None` when it has no
    /// frame layer.
    pub fn from_json(element: &Value) -> Option<Self> {
        let layers = element.get("_source")?.get("layers")?;
        let frame = layers.get("frame")?.clone();
        let micros = layer_str(layers, "frame", "frame.time_epoch").and_then(epoch_micros)?;

        let (ip_layer, proto_field) = if layers.get("ip").is_some() {
            ("ip", "ip.proto")
        } else {
            ("ipv6", "ipv6.nxt")
        };
        let ip_proto = layer_num(layers, ip_layer, proto_field).unwrap_or(0);
        let src_ip = layer_str(layers, ip_layer, &format!("{}.src", ip_layer)).unwrap_or_default().to_string();
        let dst_ip = layer_str(layers, ip_layer, &format!("{}.dst", ip_layer)).unwrap_or_default().to_string();
        let ip_version = layer_str(layers, ip_layer, &format!("{}.version", ip_layer))
            .map(str::to_string)
            .or_else(|| layers.get("ipv6").map(|_| "6".to_string()));

        let transport = match ip_proto {
            IPPROTO_UDP => Some("udp"),
            IPPROTO_TCP => Some("tcp"),
            IPPROTO_SCTP => Some("sctp"),
            _ => None,
        };
        let (src_port, dst_port) = match transport {
            Some(t) => (
                layer_num(layers, t, &format!("{}.srcport", t)).unwrap_or(0),
                layer_num(layers, t, &format!("{}.dstport", t)).unwrap_or(0),
            ),
            None => (0, 0),
        };

        Some(Self {
            micros,
            ip_version,
            ip_proto,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            frame,
        })
    }

    /// Deterministic call id for the frame's 4-tuple.
    pub fn correlation_id(&self) -> String {
        correlation_id(&self.src_ip, self.src_port, &self.dst_ip, self.dst_port)
    }

    /// Record for storage, with its time moved by `shift` microseconds.
    pub fn to_record(&self, shift: i64) -> Option<CapturedRecord> {
        let micros = self.micros + shift;
        let created_at = DateTime::from_timestamp_micros(micros)?;
        let sid = self.correlation_id();
        let mut record = CapturedRecord::new(0, sid.clone(), created_at);

        let mut header = Map::new();
        header.insert("proto".into(), json!(self.ip_proto));
        if let Some(version) = &self.ip_version {
            header.insert("ip_version".into(), json!(version));
        }
        if !self.src_ip.is_empty() {
            header.insert("srcIp".into(), json!(self.src_ip));
        }
        if !self.dst_ip.is_empty() {
            header.insert("dstIp".into(), json!(self.dst_ip));
        }
        if self.src_port > 0 || self.dst_port > 0 {
            header.insert("srcPort".into(), json!(self.src_port));
            header.insert("dstPort".into(), json!(self.dst_port));
        }
        header.insert("timeSeconds".into(), json!(micros.div_euclid(1_000_000)));
        header.insert("timeUseconds".into(), json!(micros.rem_euclid(1_000_000)));
        record.protocol_header = header;

        record.data_header.insert("callid".into(), json!(sid));
        record.data_header.insert("method".into(), json!("event"));
        record.raw = json!({ "frame": self.frame }).to_string();
        Some(record)
    }
}

/// First four bytes of SHA-256 over `src:sport->dst:dport`, as a decimal
/// big-endian u32.
pub fn correlation_id(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16) -> String {
    let digest = Sha256::digest(format!("{}:{}->{}:{}", src_ip, src_port, dst_ip, dst_port).as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]).to_string()
}

/// Splits decoder output into frames; elements without a frame layer are
/// counted as bad.
pub fn parse_frames(output: &Value) -> Result<(Vec<DecodedFrame>, usize), DecodeError> {
    let elements = output
        .as_array()
        .ok_or_else(|| DecodeError::InvalidOutput("expected a JSON array of frames".into()))?;
    let mut frames = Vec::with_capacity(elements.len());
    let mut bad = 0;
    for (i, element) in elements.iter().enumerate() {
        match DecodedFrame::from_json(element) {
            Some(frame) => frames.push(frame),
            None => {
                warn!("Decoded element #{} has no usable frame layer", i);
                bad += 1;
            }
        }
    }
    Ok((frames, bad))
}

/// Offset that moves the earliest frame to `now`.
pub fn alignment_shift(frames: &[DecodedFrame], now_micros: i64) -> i64 {
    frames
        .iter()
        .map(|f| f.micros)
        .min()
        .map(|earliest| now_micros - earliest)
        .unwrap_or(0)
}

/// Decodes a whole capture and appends every frame to the import node.
/// `align_to` moves the earliest frame to that instant (microseconds).
pub fn ingest_capture(
    bridge: &DecoderBridge,
    registry: &NodeRegistry,
    capture: Vec<u8>,
    align_to: Option<i64>,
    deadline: &Deadline,
) -> Result<IngestReport, DecodeError> {
    let config = bridge.config();
    let (name, backend) = match config.import_node.as_deref().and_then(|n| registry.get(n).map(|b| (n.to_string(), b))) {
        Some(target) => target,
        None => {
            let fallback = registry.first().ok_or(DecodeError::NoTargetNode)?;
            if let Some(wanted) = &config.import_node {
                warn!("Import node {} is not registered, using {}", wanted, fallback.0);
            }
            fallback
        }
    };

    let (output, identity) = bridge.run(BULK_ARGS, capture, deadline)?;
    let decoded = DecoderBridge::parse_output(&output, identity)?;
    let (frames, mut bad) = parse_frames(&decoded)?;
    let shift = align_to.map(|now| alignment_shift(&frames, now)).unwrap_or(0);
    debug!("Importing {} frames into {}:{} (shift {}us)", frames.len(), name, config.import_table, shift);

    if let Err(e) = backend.ensure_table(&config.import_table) {
        error!("Cannot prepare {} on node {}: {}", config.import_table, name, e);
    }

    let mut good = 0;
    for frame in &frames {
        let Some(record) = frame.to_record(shift) else {
            warn!("Frame time {} is out of range", frame.micros + shift);
            bad += 1;
            continue;
        };
        match backend.insert(&config.import_table, &record) {
            Ok(id) => {
                debug!("Stored frame as {}:{} sid={}", config.import_table, id, record.sid);
                good += 1;
            }
            Err(e) => {
                error!("Save failed for table {} on node {}: {}", config.import_table, name, e);
                bad += 1;
            }
        }
    }
    info!("Import into node {} finished: {} stored, {} failed", name, good, bad);
    Ok(IngestReport { good, bad })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_frame(epoch: &str, src: &str, sport: u16, dst: &str, dport: u16) -> Value {
        json!({
            "_source": {
                "layers": {
                    "frame": { "frame.time_epoch": epoch, "frame.len": "400" },
                    "ip": { "ip.version": "4", "ip.proto": "17", "ip.src": src, "ip.dst": dst },
                    "udp": { "udp.srcport": sport.to_string(), "udp.dstport": dport.to_string() }
                }
            }
        })
    }

    #[test]
    fn correlation_id_is_stable_and_direction_sensitive() {
        let a = correlation_id("10.0.0.1", 5060, "10.0.0.2", 5061);
        assert_eq!(a, correlation_id("10.0.0.1", 5060, "10.0.0.2", 5061));
        assert_ne!(a, correlation_id("10.0.0.2", 5061, "10.0.0.1", 5060));
        assert!(a.parse::<u32>().is_ok());
    }

    #[test]
    fn frames_carry_addresses_and_time() {
        let output = json!([
            udp_frame("1714557600.123456789", "10.0.0.1", 5060, "10.0.0.2", 5061),
            { "_source": { "layers": { "eth": {} } } },
            {
                "_source": { "layers": {
                    "frame": { "frame.time_epoch": "1714557601.5" },
                    "ipv6": { "ipv6.nxt": "6", "ipv6.src": "2001:db8::1", "ipv6.dst": "2001:db8::2" },
                    "tcp": { "tcp.srcport": "5061", "tcp.dstport": "5062" }
                } }
            }
        ]);
        let (frames, bad) = parse_frames(&output).unwrap();
        assert_eq!(bad, 1);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].micros, 1_714_557_600_123_456);
        assert_eq!((frames[0].src_port, frames[0].dst_port), (5060, 5061));
        assert_eq!(frames[1].ip_proto, IPPROTO_TCP);
        assert_eq!(frames[1].src_ip, "2001:db8::1");
        assert_eq!(frames[1].micros, 1_714_557_601_500_000);

        let record = frames[0].to_record(0).unwrap();
        assert_eq!(record.sid, correlation_id("10.0.0.1", 5060, "10.0.0.2", 5061));
        assert_eq!(record.data_header["callid"], json!(record.sid));
        assert_eq!(record.data_header["method"], json!("event"));
        assert_eq!(record.protocol_header["srcPort"], json!(5060));
        assert_eq!(record.capture_micros(), 1_714_557_600_123_456);
        let raw: Value = serde_json::from_str(&record.raw).unwrap();
        assert_eq!(raw["frame"]["frame.len"], json!("400"));
    }

    #[test]
    fn alignment_moves_earliest_frame_to_now() {
        let output = json!([
            udp_frame("1000.000002", "a", 1, "b", 2),
            udp_frame("1000.000001", "a", 1, "b", 2)
        ]);
        let (frames, _) = parse_frames(&output).unwrap();
        let shift = alignment_shift(&frames, 5_000_000_000);
        assert_eq!(frames[1].to_record(shift).unwrap().capture_micros(), 5_000_000_000);
        assert_eq!(frames[0].to_record(shift).unwrap().capture_micros(), 5_000_000_001);
        assert_eq!(alignment_shift(&[], 1), 0);
    }

    #[test]
    fn non_array_output_is_invalid() {
        assert!(matches!(parse_frames(&json!({"a": 1})), Err(DecodeError::InvalidOutput(_))));
    }
}
