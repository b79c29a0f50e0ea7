//! Metadata keys and list encoding shared by job producers and consumers.
//!
//! List-valued metadata is stored as a JSON array so that paths containing
//! commas or pipes survive the round trip. Older workers joined values with
//! commas (and object triples with pipes); [`decode_legacy_triples`] and
//! [`decode_legacy_optional_list`] still read that format.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Content hashes computed by a hash job, one per input path, in input order.
pub const HASH_RESULT: &str = "hash_result";
/// Fast hashes computed by a hash job, one per input path, in input order.
pub const FAST_HASH_RESULT: &str = "fast_hash_result";
/// Bytes transferred so far by a transfer job.
pub const COMPLETED_BYTES: &str = "completed_bytes";
/// Dataset paths of objects a transfer job failed to move.
pub const FAILURE_KEYS: &str = "failure_keys";
/// Full descriptions of objects a transfer job failed to move.
pub const FAILURES: &str = "failures";
/// Human-readable summary published by a transfer job when it finishes.
pub const MESSAGE: &str = "message";

/// Sentinel used by the legacy encoding for a missing list entry.
const LEGACY_NONE: &str = "None";

/// Errors decoding job metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// A metadata value could not be decoded.
    #[error("malformed job metadata '{key}': {reason}")]
    Malformed {
        /// The metadata key whose value was rejected.
        key: String,
        /// Description of the problem.
        reason: String,
    },
}

/// Encodes a list for storage in job metadata.
pub fn encode_list<T: Serialize>(items: &[T]) -> String {
    // Serializing plain strings and options of strings cannot fail.
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Decodes a list written by [`encode_list`]. An empty value is an empty list.
pub fn decode_list<T: DeserializeOwned>(key: &str, value: &str) -> Result<Vec<T>, MetaError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(value).map_err(|e| MetaError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Returns `true` if `value` looks like a structured (JSON) list.
pub fn is_structured(value: &str) -> bool {
    value.trim_start().starts_with('[')
}

/// Decodes the legacy comma-joined list with a `None` sentinel per missing entry.
pub fn decode_legacy_optional_list(value: &str) -> Vec<Option<String>> {
    if value.is_empty() {
        return Vec::new();
    }
    value
        .split(',')
        .map(|item| (item != LEGACY_NONE).then(|| item.to_string()))
        .collect()
}

/// Decodes the legacy `a|b|c,a|b|c` triple encoding.
///
/// Commas inside a field are recovered by joining comma-separated fragments
/// until a fragment group holds at least three fields. Extra pipes are
/// attributed to the middle field, since the first and last fields are a
/// content-addressed object path and a revision id that never contain them.
/// A trailing group with fewer than three fields is rejected.
pub fn decode_legacy_triples(key: &str, value: &str) -> Result<Vec<[String; 3]>, MetaError> {
    let mut triples = Vec::new();
    if value.is_empty() {
        return Ok(triples);
    }

    let mut pending: Option<String> = None;
    for fragment in value.split(',') {
        let group = match pending.take() {
            Some(mut prefix) => {
                prefix.push(',');
                prefix.push_str(fragment);
                prefix
            }
            None => fragment.to_string(),
        };
        if group.matches('|').count() < 2 {
            pending = Some(group);
            continue;
        }
        let (first, rest) = group.split_once('|').unwrap_or_default();
        let (middle, last) = rest.rsplit_once('|').unwrap_or_default();
        triples.push([first.to_string(), middle.to_string(), last.to_string()]);
    }

    if let Some(rest) = pending {
        return Err(MetaError::Malformed {
            key: key.to_string(),
            reason: format!("incomplete entry '{rest}'"),
        });
    }
    Ok(triples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_list_keeps_delimiters() {
        let paths = vec!["a,b.csv".to_string(), "x|y.txt".to_string()];
        let encoded = encode_list(&paths);
        assert!(is_structured(&encoded));
        let decoded: Vec<String> = decode_list(FAILURE_KEYS, &encoded).unwrap();
        assert_eq!(decoded, paths);
    }

    #[test]
    fn structured_optional_list() {
        let hashes = vec![Some("ab".to_string()), None];
        let decoded: Vec<Option<String>> =
            decode_list(HASH_RESULT, &encode_list(&hashes)).unwrap();
        assert_eq!(decoded, hashes);
    }

    #[test]
    fn empty_value_is_empty_list() {
        let decoded: Vec<String> = decode_list(FAILURE_KEYS, "").unwrap();
        assert!(decoded.is_empty());
        assert!(decode_legacy_triples(FAILURES, "").unwrap().is_empty());
        assert!(decode_legacy_optional_list("").is_empty());
    }

    #[test]
    fn malformed_structured_list_errors() {
        let err = decode_list::<String>(FAILURE_KEYS, "[1, 2").unwrap_err();
        assert!(err.to_string().contains("failure_keys"));
    }

    #[test]
    fn legacy_optional_list() {
        assert_eq!(
            decode_legacy_optional_list("aa,None,bb"),
            vec![Some("aa".to_string()), None, Some("bb".to_string())]
        );
    }

    #[test]
    fn legacy_triples_simple() {
        let triples = decode_legacy_triples(FAILURES, "o1|data/a.csv|r1,o2|b.txt|r1").unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0], ["o1".to_string(), "data/a.csv".to_string(), "r1".to_string()]);
        assert_eq!(triples[1][1], "b.txt");
    }

    #[test]
    fn legacy_triples_with_delimiters_in_path() {
        let triples = decode_legacy_triples(FAILURES, "o1|data/a,b.csv|r1,o2|x|y.txt|r2").unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0][1], "data/a,b.csv");
        assert_eq!(triples[1][1], "x|y.txt");
        assert_eq!(triples[1][2], "r2");
    }

    #[test]
    fn legacy_triples_incomplete_errors() {
        assert!(decode_legacy_triples(FAILURES, "o1|a|r1,o2|b").is_err());
    }
}
