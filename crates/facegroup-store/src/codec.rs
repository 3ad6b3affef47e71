//! Column encodings.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

pub(crate) fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, String> {
    if blob.len() % 4 != 0 {
        return Err(format!("embedding blob length {} is not a multiple of 4", blob.len()));
    }
    let mut out = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err("embedding contains non-finite values".to_string());
        }
        out.push(value);
    }
    Ok(out)
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {text:?}: {e}"))
}

pub(crate) fn parse_uuid(text: &str) -> Result<Uuid, String> {
    Uuid::parse_str(text).map_err(|e| format!("bad uuid {text:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_embedding_blob_layout() {
        let blob = encode_embedding(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding(&blob).unwrap(), vec![1.0, -0.5]);
    }

    #[test]
    fn test_decode_rejects_bad_blobs() {
        assert!(decode_embedding(&[0, 0, 0]).is_err());
        assert!(decode_embedding(&f32::NAN.to_le_bytes()).is_err());
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 9).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let (a, b) = (format_timestamp(&early), format_timestamp(&late));
        assert!(a < b);
        assert_eq!(a, "2024-01-01T00:00:09.000000000Z");
        assert_eq!(parse_timestamp(&a).unwrap(), early);
    }

    #[test]
    fn test_parse_uuid_error() {
        assert!(parse_uuid("nope").is_err());
    }
}
