//! Cache Builder Library
//!
//! Frame JSONL → validated FrameStore → MessagePack + LZ4 + SHA-256 artifact,
//! plus a JSON metadata sidecar next to it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use replay_core::store::artifact::{self, ArtifactHeader, ARTIFACT_VERSION};
use replay_core::store::{artifact_path, write_artifact};
use replay_core::FrameStore;

/// Sidecar extension written next to every artifact.
pub const METADATA_EXTENSION: &str = "meta.json";

/// Artifact metadata sidecar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheMetadata {
    pub match_id: String,
    /// Artifact format version
    pub format_version: u32,
    /// replay_core version that wrote the artifact
    pub builder_version: String,
    /// SHA-256 of the whole artifact file (hex)
    pub checksum: String,
    /// Creation time (RFC3339)
    pub created_at: String,
    pub frame_count: usize,
    pub sample_rate_hz: f64,
    /// Raw JSONL size (bytes)
    pub original_size: u64,
    /// Artifact size (bytes)
    pub compressed_size: u64,
    /// compressed / original
    pub compression_ratio: f64,
}

/// Result of checking an artifact against its sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub header: ArtifactHeader,
    /// `None` when no sidecar was found.
    pub sidecar_matches: Option<bool>,
}

/// `<artifact>.meta.json`
pub fn metadata_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".");
    name.push(METADATA_EXTENSION);
    PathBuf::from(name)
}

/// Parse a frame JSONL dump, validate it and write the artifact for
/// `match_id` into `out_dir`.
///
/// # Returns
///
/// Metadata of the written artifact; also saved as a sidecar.
pub fn build_match_cache(
    frames_jsonl: &Path,
    match_id: &str,
    out_dir: &Path,
    sample_rate_hz: f64,
) -> Result<CacheMetadata> {
    let original_size = fs::metadata(frames_jsonl)
        .with_context(|| format!("Failed to stat frames file: {}", frames_jsonl.display()))?
        .len();
    let file = File::open(frames_jsonl)
        .with_context(|| format!("Failed to open frames file: {}", frames_jsonl.display()))?;

    let store = FrameStore::load_jsonl(BufReader::new(file), sample_rate_hz)
        .with_context(|| format!("Rejected frames file: {}", frames_jsonl.display()))?;
    debug!(match_id, frames = store.frame_count(), "frames validated");

    let path = artifact_path(out_dir, match_id);
    let bytes = write_artifact(&path, &store, match_id)
        .with_context(|| format!("Failed to write artifact: {}", path.display()))?;

    let compressed_size = bytes.len() as u64;
    let meta = CacheMetadata {
        match_id: match_id.to_string(),
        format_version: ARTIFACT_VERSION,
        builder_version: replay_core::VERSION.to_string(),
        checksum: sha256_hex(&bytes),
        created_at: chrono::Utc::now().to_rfc3339(),
        frame_count: store.frame_count(),
        sample_rate_hz: store.sample_rate_hz(),
        original_size,
        compressed_size,
        compression_ratio: if original_size == 0 { 0.0 } else { compressed_size as f64 / original_size as f64 },
    };
    save_metadata(&metadata_path(&path), &meta)?;
    info!(match_id, path = %path.display(), bytes = compressed_size, "artifact built");
    Ok(meta)
}

/// Decode the artifact fully (checksum, decompression, frame validation)
/// and compare it with its sidecar when one exists.
pub fn verify_cache(artifact_file: &Path) -> Result<VerifyReport> {
    let bytes = fs::read(artifact_file)
        .with_context(|| format!("Failed to read artifact: {}", artifact_file.display()))?;
    let (header, store) = artifact::decode(&bytes, None)
        .with_context(|| format!("Artifact is not valid: {}", artifact_file.display()))?;
    if store.frame_count() != header.frame_count {
        bail!("frame count mismatch: header {}, decoded {}", header.frame_count, store.frame_count());
    }

    let sidecar = metadata_path(artifact_file);
    let sidecar_matches = if sidecar.exists() {
        let meta = load_metadata(&sidecar)?;
        Some(meta.checksum == sha256_hex(&bytes) && meta.match_id == header.match_id)
    } else {
        None
    };
    Ok(VerifyReport { header, sidecar_matches })
}

/// Header of an artifact without rebuilding the frame store.
pub fn inspect(artifact_file: &Path) -> Result<ArtifactHeader> {
    let bytes = fs::read(artifact_file)
        .with_context(|| format!("Failed to read artifact: {}", artifact_file.display()))?;
    artifact::inspect(&bytes).with_context(|| format!("Artifact is not valid: {}", artifact_file.display()))
}

pub fn save_metadata(path: &Path, meta: &CacheMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(path, json).with_context(|| format!("Failed to write metadata: {}", path.display()))?;
    Ok(())
}

pub fn load_metadata(path: &Path) -> Result<CacheMetadata> {
    let json = fs::read_to_string(path).with_context(|| format!("Failed to read metadata: {}", path.display()))?;
    serde_json::from_str(&json).context("Failed to parse metadata")
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn frames_file(frames: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..frames {
            let mut players = vec![serde_json::Value::Null; 22];
            players[0] = serde_json::json!({"id": 4, "team": "home", "x": i as f64 * 0.1, "y": 1.0});
            players[11] = serde_json::json!({"id": 15, "team": "away", "x": 10.0, "y": -(i as f64) * 0.05});
            let line = serde_json::json!({
                "timestamp": i as f64 / 10.0,
                "period": 1,
                "ball": {"x": 0.0, "y": 0.0, "z": 0.0},
                "players": players,
            });
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_build_verify_inspect() -> Result<()> {
        let input = frames_file(200);
        let dir = tempdir()?;

        let meta = build_match_cache(input.path(), "m-42", dir.path(), 10.0)?;
        assert_eq!(meta.frame_count, 200);
        assert_eq!(meta.format_version, ARTIFACT_VERSION);
        assert!(meta.compression_ratio < 1.0);

        let path = artifact_path(dir.path(), "m-42");
        assert_eq!(load_metadata(&metadata_path(&path))?, meta);

        let report = verify_cache(&path)?;
        assert_eq!(report.header.match_id, "m-42");
        assert_eq!(report.sidecar_matches, Some(true));

        let header = inspect(&path)?;
        assert_eq!(header.frame_count, 200);
        Ok(())
    }

    #[test]
    fn test_verify_flags_stale_sidecar() -> Result<()> {
        let input = frames_file(20);
        let dir = tempdir()?;
        build_match_cache(input.path(), "m-1", dir.path(), 10.0)?;
        let path = artifact_path(dir.path(), "m-1");

        let mut meta = load_metadata(&metadata_path(&path))?;
        meta.checksum = "0".repeat(64);
        save_metadata(&metadata_path(&path), &meta)?;
        assert_eq!(verify_cache(&path)?.sidecar_matches, Some(false));

        fs::remove_file(metadata_path(&path))?;
        assert_eq!(verify_cache(&path)?.sidecar_matches, None);
        Ok(())
    }

    #[test]
    fn test_rejects_malformed_frames() {
        let mut input = NamedTempFile::new().unwrap();
        writeln!(input, "{{\"timestamp\": 0.0, \"players\": []}}").unwrap();
        let dir = tempdir().unwrap();
        assert!(build_match_cache(input.path(), "bad", dir.path(), 10.0).is_err());
        assert!(!artifact_path(dir.path(), "bad").exists());
    }
}
