use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::model::record::{as_f64, as_text, CapturedRecord};
use crate::storage::types::rfc3339_micros;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const DEFAULT_SNAPLEN: u32 = 65535;
/// Snaplen used for single-record decoder input.
pub const DECODE_SNAPLEN: u32 = 65536;
pub const LINKTYPE_ETHERNET: u32 = 1;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

const DEFAULT_SRC: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const DEFAULT_DST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Endpoints and transport of one synthesized packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowAddress {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: Transport,
}

impl FlowAddress {
    /// Reads addresses from the record's protocol header, falling back to
    /// loopback defaults and port 0.
    pub fn from_record(record: &CapturedRecord) -> Self {
        let ip = |key: &str, default: Ipv4Addr| {
            record
                .protocol_header
                .get(key)
                .and_then(as_text)
                .and_then(|s| s.parse::<IpAddr>().ok())
                .unwrap_or(IpAddr::V4(default))
        };
        let port = |key: &str| {
            record
                .protocol_header
                .get(key)
                .and_then(as_f64)
                .map(|p| p as u16)
                .unwrap_or(0)
        };
        let transport = match record.protocol_header.get("protocol").and_then(as_f64) {
            Some(p) if p as u8 == IPPROTO_TCP => Transport::Tcp,
            _ => Transport::Udp,
        };
        Self {
            src: ip("srcIp", DEFAULT_SRC),
            dst: ip("dstIp", DEFAULT_DST),
            src_port: port("srcPort"),
            dst_port: port("dstPort"),
            transport,
        }
    }
}

fn to_v6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

fn len16(len: usize) -> [u8; 2] {
    u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes()
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])))
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn transport_header(flow: &FlowAddress, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.extend_from_slice(&flow.src_port.to_be_bytes());
    out.extend_from_slice(&flow.dst_port.to_be_bytes());
    match flow.transport {
        Transport::Udp => {
            out.extend_from_slice(&len16(8 + payload_len));
            out.extend_from_slice(&[0, 0]);
        }
        Transport::Tcp => {
            out.extend_from_slice(&[0, 0, 0, 1]); // seq
            out.extend_from_slice(&[0, 0, 0, 0]); // ack
            out.push(0x50);
            out.push(0x18); // PSH|ACK
            out.extend_from_slice(&[0xff, 0xff]);
            out.extend_from_slice(&[0, 0, 0, 0]);
        }
    }
    out
}

/// Ethernet frame carrying `payload` over IPv4 or IPv6 and UDP or TCP.
/// Mixed address families are carried as IPv6 with mapped addresses.
pub fn synthesize_frame(flow: &FlowAddress, payload: &[u8]) -> Vec<u8> {
    let l4 = transport_header(flow, payload.len());
    let proto = match flow.transport {
        Transport::Udp => IPPROTO_UDP,
        Transport::Tcp => IPPROTO_TCP,
    };
    let mut frame = Vec::with_capacity(14 + 40 + l4.len() + payload.len());
    frame.extend_from_slice(&DST_MAC);
    frame.extend_from_slice(&SRC_MAC);

    match (flow.src, flow.dst) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
            let mut ip = Vec::with_capacity(20);
            ip.push(0x45);
            ip.push(0);
            ip.extend_from_slice(&len16(20 + l4.len() + payload.len()));
            ip.extend_from_slice(&[0, 0, 0x40, 0]);
            ip.push(64);
            ip.push(proto);
            ip.extend_from_slice(&[0, 0]);
            ip.extend_from_slice(&src.octets());
            ip.extend_from_slice(&dst.octets());
            let checksum = ipv4_checksum(&ip);
            ip[10..12].copy_from_slice(&checksum.to_be_bytes());
            frame.extend_from_slice(&ip);
        }
        (src, dst) => {
            frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
            frame.extend_from_slice(&[0x60, 0, 0, 0]);
            frame.extend_from_slice(&len16(l4.len() + payload.len()));
            frame.push(proto);
            frame.push(64);
            frame.extend_from_slice(&to_v6(src).octets());
            frame.extend_from_slice(&to_v6(dst).octets());
        }
    }
    frame.extend_from_slice(&l4);
    frame.extend_from_slice(payload);
    frame
}

/// Classic pcap stream builder.
#[derive(Debug)]
pub struct PcapWriter {
    buf: Vec<u8>,
    snaplen: u32,
}

impl PcapWriter {
    pub fn new(snaplen: u32) -> Self {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&snaplen.to_le_bytes());
        buf.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());
        Self { buf, snaplen }
    }

    pub fn write_packet(&mut self, ts_sec: u32, ts_usec: u32, frame: &[u8]) {
        let orig_len = u32::try_from(frame.len()).unwrap_or(u32::MAX);
        let incl_len = orig_len.min(self.snaplen);
        self.buf.extend_from_slice(&ts_sec.to_le_bytes());
        self.buf.extend_from_slice(&ts_usec.to_le_bytes());
        self.buf.extend_from_slice(&incl_len.to_le_bytes());
        self.buf.extend_from_slice(&orig_len.to_le_bytes());
        self.buf.extend_from_slice(&frame[..incl_len as usize]);
    }

    pub fn write_record(&mut self, record: &CapturedRecord) {
        let micros = record.capture_micros().max(0);
        let secs = u32::try_from(micros / 1_000_000).unwrap_or(u32::MAX);
        let usecs = (micros % 1_000_000) as u32;
        let frame = synthesize_frame(&FlowAddress::from_record(record), record.raw.as_bytes());
        self.write_packet(secs, usecs, &frame);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub fn records_to_pcap(records: &[CapturedRecord], snaplen: u32) -> Vec<u8> {
    let mut writer = PcapWriter::new(snaplen);
    for record in records {
        writer.write_record(record);
    }
    writer.into_bytes()
}

/// Plain-text export: a `<time> <src> -> <dst>` line, the payload, a blank line.
pub fn records_to_text(records: &[CapturedRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let flow = FlowAddress::from_record(record);
        let ts = chrono::DateTime::from_timestamp_micros(record.capture_micros()).unwrap_or(record.created_at);
        let _ = writeln!(
            out,
            "{} {} -> {}",
            rfc3339_micros(&ts),
            std::net::SocketAddr::new(flow.src, flow.src_port),
            std::net::SocketAddr::new(flow.dst, flow.dst_port)
        );
        out.push_str(&record.raw);
        if !record.raw.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
