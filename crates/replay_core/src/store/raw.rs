//! Raw records handed over by the ingestion collaborator.
//!
//! Every field is optional at this layer so that a missing value becomes a
//! precise [`FormatError`] instead of a generic deserializer message.
//! Ill-typed values still fail at parse time with the offending line.

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use super::frame::Team;
use crate::error::FormatError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub period: Option<u8>,
    #[serde(default)]
    pub ball: Option<RawBall>,
    #[serde(default)]
    pub players: Option<Vec<Option<RawPlayer>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBall {
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub z: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlayer {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub team: Option<Team>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
}

/// Parse one raw frame per non-blank line.
pub fn parse_jsonl<R: BufRead>(reader: R) -> Result<Vec<RawFrame>, FormatError> {
    let mut frames = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FormatError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: RawFrame = serde_json::from_str(&line)
            .map_err(|e| FormatError::Parse { line: idx + 1, message: e.to_string() })?;
        frames.push(frame);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_jsonl_skips_blank_lines() {
        let input = "{\"timestamp\": 0.0, \"period\": 1}\n\n{\"timestamp\": 0.1, \"period\": 1}\n";
        let frames = parse_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp, Some(0.1));
        assert!(frames[0].players.is_none());
    }

    #[test]
    fn test_parse_jsonl_reports_line_of_type_error() {
        let input = "{\"timestamp\": 0.0}\n{\"timestamp\": \"soon\"}\n";
        let err = parse_jsonl(Cursor::new(input)).unwrap_err();
        assert!(matches!(err, FormatError::Parse { line: 2, .. }));
    }
}
