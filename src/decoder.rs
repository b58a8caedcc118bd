//! External decoder bridge and capture-format export.

pub mod bridge;
pub mod ingest;
pub mod pcap_writer;

pub use bridge::DecoderBridge;
pub use ingest::{ingest_capture, IngestReport};
pub use pcap_writer::{records_to_pcap, records_to_text, PcapWriter};
