//! Persisted frame-store artifact.
//!
//! Layout: MessagePack (named fields) -> LZ4 with prepended size -> SHA-256
//! trailer over the compressed bytes. Floats are written at their native
//! width, so a decoded store is bit-identical to the one that was encoded.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use rmp_serde::{from_slice, to_vec_named};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::frame::Frame;
use super::frame_store::FrameStore;
use crate::error::ArtifactError;

pub const ARTIFACT_VERSION: u32 = 1;
pub const ARTIFACT_EXTENSION: &str = "frames.msgpack.lz4";

const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub version: u32,
    pub match_id: String,
    /// Unix milliseconds.
    pub created_at_ms: u64,
    pub sample_rate_hz: f64,
    pub frame_count: usize,
}

impl ArtifactHeader {
    pub fn created_at_rfc3339(&self) -> String {
        OffsetDateTime::from_unix_timestamp_nanos(self.created_at_ms as i128 * 1_000_000)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    header: &'a ArtifactHeader,
    frames: &'a [Frame],
}

#[derive(Deserialize)]
struct Payload {
    header: ArtifactHeader,
    frames: Vec<Frame>,
}

/// `<dir>/<match_id>.frames.msgpack.lz4`
pub fn artifact_path(dir: impl AsRef<Path>, match_id: &str) -> PathBuf {
    dir.as_ref().join(format!("{}.{}", match_id, ARTIFACT_EXTENSION))
}

pub fn encode(store: &FrameStore, match_id: &str) -> Result<Vec<u8>, ArtifactError> {
    let header = ArtifactHeader {
        version: ARTIFACT_VERSION,
        match_id: match_id.to_string(),
        created_at_ms: now_ms(),
        sample_rate_hz: store.sample_rate_hz(),
        frame_count: store.frame_count(),
    };
    let msgpack = to_vec_named(&PayloadRef { header: &header, frames: store.frames() })?;
    let mut bytes = compress_prepend_size(&msgpack);
    let checksum = Sha256::digest(&bytes);
    bytes.extend_from_slice(&checksum);
    Ok(bytes)
}

/// Decode and re-validate an artifact.
///
/// With `expected_match_id` set, an artifact written for another match is
/// rejected even if it is otherwise intact.
pub fn decode(
    bytes: &[u8],
    expected_match_id: Option<&str>,
) -> Result<(ArtifactHeader, FrameStore), ArtifactError> {
    let payload = decode_payload(bytes)?;
    if let Some(expected) = expected_match_id {
        if payload.header.match_id != expected {
            return Err(ArtifactError::MatchMismatch {
                found: payload.header.match_id,
                expected: expected.to_string(),
            });
        }
    }
    if payload.frames.len() != payload.header.frame_count {
        return Err(ArtifactError::Corrupted);
    }
    let store = FrameStore::from_frames(payload.frames, payload.header.sample_rate_hz)?;
    Ok((payload.header, store))
}

/// Header only; still verifies the checksum and decompresses the payload.
pub fn inspect(bytes: &[u8]) -> Result<ArtifactHeader, ArtifactError> {
    decode_payload(bytes).map(|p| p.header)
}

/// SHA-256 trailer of an encoded artifact, hex encoded.
pub fn checksum_hex(bytes: &[u8]) -> Option<String> {
    let trailer = bytes.get(bytes.len().checked_sub(CHECKSUM_LEN)?..)?;
    Some(trailer.iter().map(|b| format!("{:02x}", b)).collect())
}

fn decode_payload(bytes: &[u8]) -> Result<Payload, ArtifactError> {
    if bytes.len() < 4 + CHECKSUM_LEN {
        return Err(ArtifactError::Corrupted);
    }
    let (compressed, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if Sha256::digest(compressed).as_slice() != checksum {
        return Err(ArtifactError::ChecksumMismatch);
    }
    let msgpack = decompress_size_prepended(compressed).map_err(|_| ArtifactError::Decompression)?;
    let payload: Payload = from_slice(&msgpack)?;
    if payload.header.version != ARTIFACT_VERSION {
        return Err(ArtifactError::VersionMismatch {
            found: payload.header.version,
            expected: ARTIFACT_VERSION,
        });
    }
    Ok(payload)
}

/// Write atomically: temp file, fsync, rename.
pub fn write_artifact(
    path: impl AsRef<Path>,
    store: &FrameStore,
    match_id: &str,
) -> Result<Vec<u8>, ArtifactError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = encode(store, match_id)?;
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    info!(match_id, bytes = bytes.len(), frames = store.frame_count(), path = %path.display(), "artifact written");
    Ok(bytes)
}

pub fn read_artifact(path: impl AsRef<Path>, match_id: &str) -> Result<FrameStore, ArtifactError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ArtifactError::NotFound { path: path.display().to_string() });
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let (header, store) = decode(&bytes, Some(match_id))?;
    debug!(match_id, bytes = bytes.len(), frames = header.frame_count, "artifact read");
    Ok(store)
}

fn now_ms() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}
