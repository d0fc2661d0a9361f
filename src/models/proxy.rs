use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::Serialize;

use crate::error::{Result, RotatorError};

/// Stored field names, as they appear in a `proxy:<id>` hash
pub const FIELD_IP_ADDRESS: &str = "ipaddress";
pub const FIELD_PORT: &str = "port";
pub const FIELD_PROTOCOL: &str = "protocol";
pub const FIELD_ANONYMITY_LEVEL: &str = "anonymitylevel";
pub const FIELD_SOURCE: &str = "source";
pub const FIELD_COUNTRY: &str = "country";

/// Fields fetched for every identity on reload
pub const STORED_FIELDS: [&str; 6] = [
    FIELD_IP_ADDRESS,
    FIELD_PORT,
    FIELD_PROTOCOL,
    FIELD_ANONYMITY_LEVEL,
    FIELD_SOURCE,
    FIELD_COUNTRY,
];

/// The only anonymity level accepted for persistence
pub const ELITE: &str = "elite";

/// Upstream proxy protocols accepted into the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Attribute bag of a proxy.
///
/// The fields the pool relies on are typed; anything else a candidate source
/// carries is kept in `extra` under its lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attributes {
    pub ip_address: Option<String>,
    pub port: Option<String>,
    pub protocol: Option<String>,
    pub anonymity_level: Option<String>,
    pub source: Option<String>,
    pub country: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Attributes {
    /// Assign a field by its stored name. Names are matched case-insensitively.
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        let value = Some(value.into());
        let field = field.to_lowercase();
        match field.as_str() {
            FIELD_IP_ADDRESS => self.ip_address = value,
            FIELD_PORT => self.port = value,
            FIELD_PROTOCOL => self.protocol = value,
            FIELD_ANONYMITY_LEVEL => self.anonymity_level = value,
            FIELD_SOURCE => self.source = value,
            FIELD_COUNTRY => self.country = value,
            _ => {
                if let Some(v) = value {
                    self.extra.insert(field, v);
                }
            }
        }
    }

    /// Look up a field by its stored name
    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            FIELD_IP_ADDRESS => self.ip_address.as_deref(),
            FIELD_PORT => self.port.as_deref(),
            FIELD_PROTOCOL => self.protocol.as_deref(),
            FIELD_ANONYMITY_LEVEL => self.anonymity_level.as_deref(),
            FIELD_SOURCE => self.source.as_deref(),
            FIELD_COUNTRY => self.country.as_deref(),
            other => self.extra.get(other).map(String::as_str),
        }
    }

    /// Rebuild an attribute bag from stored `(field, value)` pairs
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut attributes = Attributes::default();
        for (field, value) in fields {
            attributes.set(field.as_ref(), value);
        }
        attributes
    }

    /// Flatten into the field map written to the store. Absent fields are omitted.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = self.extra.clone();
        for name in STORED_FIELDS {
            if let Some(value) = self.get(name) {
                fields.insert(name.to_string(), value.to_string());
            }
        }
        fields
    }

    /// `ip:port`, with missing parts rendered empty
    pub fn address(&self) -> String {
        format!(
            "{}:{}",
            self.ip_address.as_deref().unwrap_or_default(),
            self.port.as_deref().unwrap_or_default()
        )
    }

    /// Elite anonymity over HTTP or HTTPS
    pub fn is_eligible(&self) -> bool {
        self.anonymity_level.as_deref() == Some(ELITE)
            && self
                .protocol
                .as_deref()
                .and_then(ProxyProtocol::from_str)
                .is_some()
    }
}

/// One upstream proxy: identity, resolved endpoint and attributes.
///
/// Records are immutable; a reload replaces them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRecord {
    id: i64,
    endpoint: Option<SocketAddr>,
    attributes: Attributes,
}

impl ProxyRecord {
    /// A record parsed from a candidate source: no identity, no endpoint
    pub fn candidate(attributes: Attributes) -> Self {
        Self {
            id: 0,
            endpoint: None,
            attributes,
        }
    }

    /// A record reconstructed from the store
    pub fn resolved(id: i64, endpoint: SocketAddr, attributes: Attributes) -> Self {
        Self {
            id,
            endpoint: Some(endpoint),
            attributes,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// `ip:port` built from the current attributes
    pub fn address(&self) -> String {
        self.attributes.address()
    }

    pub fn protocol(&self) -> &str {
        self.attributes.protocol.as_deref().unwrap_or_default()
    }

    pub fn anonymity_level(&self) -> &str {
        self.attributes.anonymity_level.as_deref().unwrap_or_default()
    }

    pub fn is_eligible(&self) -> bool {
        self.attributes.is_eligible()
    }

    /// Network address of the upstream proxy
    pub fn resolved_endpoint(&self) -> Result<SocketAddr> {
        self.endpoint.ok_or_else(|| RotatorError::Unresolved {
            address: self.address(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elite_http() -> Attributes {
        Attributes {
            ip_address: Some("1.2.3.4".to_string()),
            port: Some("8080".to_string()),
            protocol: Some("http".to_string()),
            anonymity_level: Some("elite".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_proxy_protocol_parsing() {
        assert_eq!(ProxyProtocol::from_str("http"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str("https"), Some(ProxyProtocol::Https));
        assert_eq!(ProxyProtocol::from_str("socks5"), None);
        assert_eq!(ProxyProtocol::Https.to_string(), "https");
    }

    #[test]
    fn test_eligibility() {
        let mut attrs = elite_http();
        assert!(attrs.is_eligible());

        attrs.protocol = Some("https".to_string());
        assert!(attrs.is_eligible());

        attrs.protocol = Some("socks4".to_string());
        assert!(!attrs.is_eligible());

        attrs.protocol = Some("http".to_string());
        attrs.anonymity_level = Some("anonymous".to_string());
        assert!(!attrs.is_eligible());

        attrs.anonymity_level = None;
        assert!(!attrs.is_eligible());
    }

    #[test]
    fn test_set_routes_known_and_extra_fields() {
        let mut attrs = Attributes::default();
        attrs.set("IPADDRESS", "10.0.0.1");
        attrs.set("port", "3128");
        attrs.set("uptime", "99");

        assert_eq!(attrs.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(attrs.get(FIELD_PORT), Some("3128"));
        assert_eq!(attrs.get("uptime"), Some("99"));
        assert_eq!(attrs.get(FIELD_COUNTRY), None);
    }

    #[test]
    fn test_fields_round_trip_keeps_extras() {
        let mut attrs = elite_http();
        attrs.country = Some("de".to_string());
        attrs.extra.insert("speed".to_string(), "fast".to_string());

        let fields = attrs.to_fields();
        assert_eq!(fields.get("ipaddress").map(String::as_str), Some("1.2.3.4"));
        assert_eq!(fields.get("anonymitylevel").map(String::as_str), Some("elite"));
        assert!(!fields.contains_key("source"));

        assert_eq!(Attributes::from_fields(fields), attrs);
    }

    #[test]
    fn test_record_accessors_without_endpoint() {
        let record = ProxyRecord::candidate(elite_http());

        assert!(!record.is_persisted());
        assert_eq!(record.address(), "1.2.3.4:8080");
        assert_eq!(record.protocol(), "http");
        assert_eq!(record.anonymity_level(), "elite");
        assert!(matches!(
            record.resolved_endpoint(),
            Err(RotatorError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_record_missing_attributes_are_empty() {
        let record = ProxyRecord::candidate(Attributes::default());

        assert_eq!(record.address(), ":");
        assert_eq!(record.protocol(), "");
        assert_eq!(record.anonymity_level(), "");
        assert!(!record.is_eligible());
    }

    #[test]
    fn test_resolved_record_exposes_endpoint() {
        let endpoint: SocketAddr = "1.2.3.4:8080".parse().unwrap();
        let record = ProxyRecord::resolved(7, endpoint, elite_http());

        assert_eq!(record.id(), 7);
        assert!(record.is_persisted());
        assert_eq!(record.resolved_endpoint().unwrap(), endpoint);
    }
}
