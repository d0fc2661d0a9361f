//! Candidate proxy sources
//!
//! A candidate source is a JSON array of objects such as
//! `{"ipAddress": "1.2.3.4", "port": 8080, "protocols": ["http"], "anonymityLevel": "elite"}`.
//! Keys are lower-cased, `protocols` collapses into a single `protocol`
//! and `port` becomes a string whatever its JSON type.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, RotatorError};
use crate::models::{Attributes, FIELD_PORT, FIELD_PROTOCOL};

const KEY_PROTOCOLS: &str = "protocols";

/// Anything that yields a batch of candidate attribute bags
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Read and parse the whole batch. Nothing is returned on partial input.
    async fn read(&self) -> Result<Vec<Attributes>>;

    /// Human-readable name for logs and errors
    fn name(&self) -> String;
}

/// Candidates stored in a JSON file
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandidateSource for FileSource {
    async fn read(&self) -> Result<Vec<Attributes>> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| RotatorError::SourceUnreadable {
                source_name: self.name(),
                reason: e.to_string(),
            })?;

        parse_candidates(&self.name(), &data)
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Candidates handed over in memory, e.g. an admin request body
#[derive(Debug, Clone)]
pub struct JsonSource {
    name: String,
    body: Bytes,
}

impl JsonSource {
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

#[async_trait]
impl CandidateSource for JsonSource {
    async fn read(&self) -> Result<Vec<Attributes>> {
        parse_candidates(&self.name, &self.body)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Parse a JSON candidate array
pub fn parse_candidates(source_name: &str, data: &[u8]) -> Result<Vec<Attributes>> {
    let malformed = |reason: String| RotatorError::SourceMalformed {
        source_name: source_name.to_string(),
        reason,
    };

    let values: Vec<Value> = serde_json::from_slice(data).map_err(|e| malformed(e.to_string()))?;

    let candidates = values
        .iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Object(object) => {
                parse_candidate(object).map_err(|reason| malformed(format!("entry {}: {}", index, reason)))
            }
            _ => Err(malformed(format!("entry {} is not an object", index))),
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(source = source_name, count = candidates.len(), "Parsed candidate source");
    Ok(candidates)
}

fn parse_candidate(object: &Map<String, Value>) -> std::result::Result<Attributes, String> {
    let mut attributes = Attributes::default();

    for (key, value) in object {
        let key = key.to_lowercase();
        match key.as_str() {
            // Only the last listed protocol survives. A candidate advertising
            // ["http", "socks5"] is therefore treated as socks5 and dropped.
            KEY_PROTOCOLS => {
                let Value::Array(protocols) = value else {
                    return Err(format!("{} must be an array", KEY_PROTOCOLS));
                };
                for protocol in protocols {
                    let Value::String(protocol) = protocol else {
                        return Err(format!("{} must contain strings", KEY_PROTOCOLS));
                    };
                    attributes.set(FIELD_PROTOCOL, protocol.to_lowercase());
                }
            }
            FIELD_PORT => match value {
                Value::Number(port) => attributes.set(FIELD_PORT, port.to_string()),
                Value::String(port) => attributes.set(FIELD_PORT, port.trim()),
                _ => return Err("port must be a number or a string".to_string()),
            },
            _ => match value {
                Value::Null => {}
                Value::String(s) => attributes.set(&key, s.to_lowercase()),
                other => attributes.set(&key, other.to_string()),
            },
        }
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_recognized_keys() {
        let data = br#"[{
            "ipAddress": "1.2.3.4",
            "port": 8080,
            "protocols": ["http"],
            "anonymityLevel": "Elite",
            "source": "feed-a",
            "country": "DE"
        }]"#;

        let candidates = parse_candidates("test", data).unwrap();
        assert_eq!(candidates.len(), 1);

        let attrs = &candidates[0];
        assert_eq!(attrs.ip_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(attrs.port.as_deref(), Some("8080"));
        assert_eq!(attrs.protocol.as_deref(), Some("http"));
        assert_eq!(attrs.anonymity_level.as_deref(), Some("elite"));
        assert_eq!(attrs.source.as_deref(), Some("feed-a"));
        assert_eq!(attrs.country.as_deref(), Some("de"));
        assert!(attrs.extra.is_empty());
        assert!(attrs.is_eligible());
    }

    #[test]
    fn test_last_protocol_wins() {
        let data = br#"[
            {"ipAddress": "1.1.1.1", "port": 1, "protocols": ["socks5", "https"], "anonymityLevel": "elite"},
            {"ipAddress": "2.2.2.2", "port": 2, "protocols": ["http", "socks4"], "anonymityLevel": "elite"}
        ]"#;

        let candidates = parse_candidates("test", data).unwrap();
        assert_eq!(candidates[0].protocol.as_deref(), Some("https"));
        assert!(candidates[0].is_eligible());
        assert_eq!(candidates[1].protocol.as_deref(), Some("socks4"));
        assert!(!candidates[1].is_eligible());
    }

    #[test]
    fn test_port_as_string_and_unknown_keys_pass_through() {
        let data = br#"[{"IPADDRESS": "5.6.7.8", "port": " 3128 ", "Uptime": 97.5, "Google": true, "isp": "ACME", "note": null}]"#;

        let candidates = parse_candidates("test", data).unwrap();
        let attrs = &candidates[0];
        assert_eq!(attrs.address(), "5.6.7.8:3128");
        assert_eq!(attrs.extra.get("uptime").map(String::as_str), Some("97.5"));
        assert_eq!(attrs.extra.get("google").map(String::as_str), Some("true"));
        assert_eq!(attrs.extra.get("isp").map(String::as_str), Some("acme"));
        assert!(!attrs.extra.contains_key("note"));
    }

    #[test]
    fn test_empty_protocols_leaves_protocol_unset() {
        let candidates =
            parse_candidates("test", br#"[{"ipAddress": "1.1.1.1", "protocols": []}]"#).unwrap();
        assert_eq!(candidates[0].protocol, None);
    }

    #[test]
    fn test_malformed_sources() {
        let cases: [&[u8]; 6] = [
            b"not json",
            br#"{"ipAddress": "1.1.1.1"}"#,
            br#"[42]"#,
            br#"[{"protocols": "http"}]"#,
            br#"[{"protocols": [1]}]"#,
            br#"[{"port": [8080]}]"#,
        ];
        for data in cases {
            let err = parse_candidates("test", data).unwrap_err();
            assert!(
                matches!(err, RotatorError::SourceMalformed { .. }),
                "unexpected error for {:?}: {}",
                String::from_utf8_lossy(data),
                err
            );
        }
    }

    #[tokio::test]
    async fn test_file_source_reads_and_reports_missing_file() {
        let dir = std::env::temp_dir().join(format!("rotator-candidates-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("proxy_data.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"[{"ipAddress": "9.9.9.9", "port": 80}]"#)
            .unwrap();

        let source = FileSource::new(&path);
        let candidates = source.read().await.unwrap();
        assert_eq!(candidates[0].address(), "9.9.9.9:80");

        let missing = FileSource::new(dir.join("missing.json"));
        let err = missing.read().await.unwrap_err();
        assert!(matches!(err, RotatorError::SourceUnreadable { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_json_source() {
        let source = JsonSource::new("admin", r#"[{"ipAddress": "1.2.3.4", "port": "80"}]"#);
        assert_eq!(source.name(), "admin");
        assert_eq!(source.read().await.unwrap().len(), 1);
    }
}
