use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Runtime;

use crate::configuration::types::DecoderConfig;
use crate::decoder::pcap_writer::{records_to_pcap, DECODE_SNAPLEN};
use crate::error_handling::types::DecodeError;
use crate::model::context::Deadline;
use crate::model::record::CapturedRecord;

/// Fixed arguments for single-packet JSON decoding.
pub const SINGLE_PACKET_ARGS: &[&str] = &["-Q", "-T", "json", "-l", "-i", "-"];

/// How far into the output a JSON start is searched for.
const PREAMBLE_SCAN: usize = 100;

/// Identity the decoder process runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchIdentity {
    /// Unprivileged caller, nothing to change.
    Caller,
    /// Privileged caller switching to the configured identity.
    Downgraded { uid: u32, gid: u32 },
    /// Privileged caller with no identity configured.
    Privileged,
}

impl LaunchIdentity {
    pub fn resolve(configured: Option<(u32, u32)>) -> Self {
        if !running_privileged() {
            return LaunchIdentity::Caller;
        }
        match configured {
            Some((uid, gid)) => LaunchIdentity::Downgraded { uid, gid },
            None => LaunchIdentity::Privileged,
        }
    }
}

#[cfg(unix)]
fn running_privileged() -> bool {
    // SAFETY: geteuid/getegid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
    debug!("Decoder caller identity: uid={} gid={}", uid, gid);
    uid == 0 || gid == 0
}

#[cfg(not(unix))]
fn running_privileged() -> bool {
    false
}

/// Returns the output from the first `[` or `{` found near its start.
pub fn skip_preamble(output: &[u8]) -> &[u8] {
    let limit = output.len().min(PREAMBLE_SCAN);
    match output[..limit].iter().position(|b| *b == b'[' || *b == b'{') {
        Some(start) => &output[start..],
        None => output,
    }
}

/// Runs the external protocol decoder over synthesized capture buffers.
pub struct DecoderBridge {
    config: DecoderConfig,
    rt: Runtime,
}

impl DecoderBridge {
    pub fn new(config: DecoderConfig) -> Result<Self, DecodeError> {
        if !config.enabled {
            return Err(DecodeError::NotActive);
        }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DecodeError::SpawnFailed)?;
        info!("External decoder enabled: {}", config.binary.display());
        Ok(Self { config, rt })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Whether records of `category` go through the decoder.
    pub fn handles(&self, category: &str) -> bool {
        self.config.protocols.iter().any(|p| p == category)
    }

    fn time_limit(&self, deadline: &Deadline) -> Option<Duration> {
        let configured = (self.config.timeout_secs > 0).then(|| Duration::from_secs(self.config.timeout_secs));
        match (configured, deadline.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Feeds `input` to the decoder with `args` (plus the configured extra
    /// parameter) and returns stderr followed by stdout. Input is written
    /// while output is drained.
    pub fn run(&self, args: &[&str], input: Vec<u8>, deadline: &Deadline) -> Result<(Vec<u8>, LaunchIdentity), DecodeError> {
        if deadline.is_expired() {
            return Err(DecodeError::Timeout);
        }
        let identity = LaunchIdentity::resolve(self.config.identity());
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args);
        if !self.config.param.is_empty() {
            cmd.arg(&self.config.param);
        }
        match identity {
            LaunchIdentity::Caller => {}
            #[cfg(unix)]
            LaunchIdentity::Downgraded { uid, gid } => {
                info!("Running decoder as uid={} gid={}", uid, gid);
                cmd.uid(uid).gid(gid);
            }
            #[cfg(not(unix))]
            LaunchIdentity::Downgraded { .. } => {}
            LaunchIdentity::Privileged => {
                warn!("External decoder runs with elevated privileges, set decoder uid/gid in the config");
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = self.time_limit(deadline);
        let output = self.rt.block_on(async move {
            let mut child = cmd.spawn().map_err(|e| {
                error!("Failed to spawn decoder: {}", e);
                DecodeError::SpawnFailed(e)
            })?;
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| DecodeError::ProcessFailed("decoder stdin unavailable".into()))?;
            let writer = tokio::spawn(async move {
                let written = stdin.write_all(&input).await;
                drop(stdin);
                written
            });

            let wait = child.wait_with_output();
            let output = match limit {
                Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                    error!("Decoder did not finish within {:?}, killed", limit);
                    DecodeError::Timeout
                })?,
                None => wait.await,
            }
            .map_err(|e| DecodeError::ProcessFailed(e.to_string()))?;

            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Decoder closed its input early: {}", e),
                Err(e) => warn!("Decoder input writer failed: {}", e),
            }
            Ok::<_, DecodeError>(output)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Decoder exited with {}: {}", output.status, stderr.trim());
            return Err(DecodeError::ProcessFailed(format!("exit status {}", output.status)));
        }
        let mut combined = output.stderr;
        combined.extend_from_slice(&output.stdout);
        debug!("Decoder produced {} bytes", combined.len());
        Ok((combined, identity))
    }

    /// Parses decoder output as JSON, skipping a preamble when the process
    /// could not be moved off the privileged identity.
    pub fn parse_output(output: &[u8], identity: LaunchIdentity) -> Result<Value, DecodeError> {
        let body = match identity {
            LaunchIdentity::Privileged => skip_preamble(output),
            _ => output,
        };
        serde_json::from_slice(body).map_err(|e| {
            error!("Decoder output is not JSON: {}", e);
            DecodeError::InvalidOutput(e.to_string())
        })
    }

    /// Decodes one stored record.
    pub fn decode_record(&self, record: &CapturedRecord, deadline: &Deadline) -> Result<Value, DecodeError> {
        debug!("Decoding record {} with {}", record.id, self.config.binary.display());
        let capture = records_to_pcap(std::slice::from_ref(record), DECODE_SNAPLEN);
        let (output, identity) = self.run(SINGLE_PACKET_ARGS, capture, deadline)?;
        Self::parse_output(&output, identity)
    }
}
