//! Shared types for fleetscope
//!
//! This crate contains the document locators, device references and log line
//! records used across the fleetscope crates.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheme of live device log documents
pub const DEVICE_LOG_SCHEME: &str = "deviceLogs";

/// Scheme of static build log documents
pub const BUILD_LOG_SCHEME: &str = "buildLogs";

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while parsing or decoding a locator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("locator has no scheme: {0:?}")]
    MissingScheme(String),

    #[error("malformed percent-encoding at byte {position}")]
    Decode { position: usize },

    #[error("percent-decoded payload is not valid UTF-8")]
    InvalidUtf8,
}

// ============================================================================
// Locators
// ============================================================================

/// Identifies a virtual log document.
///
/// The string form is `scheme:path?query#fragment`, with absent parts
/// omitted. It doubles as the canonical key: two locators name the same
/// document iff their string forms are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogLocator {
    scheme: String,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

/// Which provider a locator belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocatorKind {
    /// Live tail of a device's log feed
    DeviceLogs,
    /// Self-contained build log
    BuildLogs,
    /// Any scheme fleetscope does not serve
    Other(String),
}

impl LogLocator {
    pub fn new(
        scheme: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
        fragment: Option<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            path: path.into(),
            query,
            fragment,
        }
    }

    /// Live locator `deviceLogs:<name>#<uuid>`
    pub fn device_logs(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self::new(DEVICE_LOG_SCHEME, name, None, Some(uuid.into()))
    }

    /// Live locator for a device reference
    pub fn for_device(device: &DeviceRef) -> Self {
        Self::device_logs(device.name.clone(), device.uuid.clone())
    }

    /// Static locator `buildLogs:?<encoded>` carrying `text` inline
    pub fn build_logs(text: &str) -> Self {
        Self::new(BUILD_LOG_SCHEME, "", Some(encode_component(text)), None)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn kind(&self) -> LocatorKind {
        match self.scheme.as_str() {
            DEVICE_LOG_SCHEME => LocatorKind::DeviceLogs,
            BUILD_LOG_SCHEME => LocatorKind::BuildLogs,
            other => LocatorKind::Other(other.to_string()),
        }
    }

    /// Registry key for this locator
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LogLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

impl FromStr for LogLocator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = match s.split_once(':') {
            Some((scheme, rest)) if !scheme.is_empty() => (scheme, rest),
            _ => return Err(LocatorError::MissingScheme(s.to_string())),
        };

        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (rest, None),
        };

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (rest, None),
        };

        Ok(Self::new(scheme, path, query, fragment))
    }
}

// ============================================================================
// Devices
// ============================================================================

/// Minimal reference to a fleet device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub name: String,
    pub uuid: String,
}

impl DeviceRef {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    /// First seven characters of the UUID, as shown in fleet listings
    pub fn short_uuid(&self) -> &str {
        let end = self
            .uuid
            .char_indices()
            .nth(7)
            .map(|(idx, _)| idx)
            .unwrap_or(self.uuid.len());
        &self.uuid[..end]
    }
}

// ============================================================================
// Log Lines
// ============================================================================

/// One log message delivered by a feed.
///
/// Deserializes from the platform's JSON log message shape, where
/// `timestamp` is epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Text appended to the document verbatim
    pub message: String,

    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub service_id: Option<u64>,

    #[serde(default, rename = "isStdErr")]
    pub is_stderr: bool,

    #[serde(default)]
    pub is_system: bool,
}

impl LogLine {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            service_id: None,
            is_stderr: false,
            is_system: false,
        }
    }

    /// Build a line from one line of plain command output
    pub fn from_text(line: &str) -> Self {
        let mut message = String::with_capacity(line.len() + 1);
        message.push_str(line);
        message.push('\n');
        Self::new(message)
    }

    /// Parse a JSON log message
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

// ============================================================================
// Percent Codec
// ============================================================================

/// Characters left unescaped by the platform's URI component encoder
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a URI component
pub fn encode_component(text: &str) -> String {
    utf8_percent_encode(text, COMPONENT).to_string()
}

/// Strictly percent-decode a URI component.
///
/// Every `%` must start a two-digit hex escape and the decoded bytes must be
/// UTF-8; anything else is an error rather than a partial decode.
pub fn decode_component(input: &str) -> Result<String, LocatorError> {
    let bytes = input.as_bytes();
    let mut cursor = 0;
    while let Some(offset) = bytes[cursor..].iter().position(|&b| b == b'%') {
        let position = cursor + offset;
        let escape_ok = bytes
            .get(position + 1..position + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !escape_ok {
            return Err(LocatorError::Decode { position });
        }
        cursor = position + 3;
    }

    percent_decode_str(input)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| LocatorError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_locator() {
        let locator: LogLocator = "deviceLogs:my-device#abc-123".parse().unwrap();
        assert_eq!(locator.kind(), LocatorKind::DeviceLogs);
        assert_eq!(locator.path(), "my-device");
        assert_eq!(locator.fragment(), Some("abc-123"));
        assert_eq!(locator.query(), None);
        assert_eq!(locator.canonical(), "deviceLogs:my-device#abc-123");
    }

    #[test]
    fn test_parse_build_locator() {
        let locator: LogLocator = "buildLogs:?Hello%20World".parse().unwrap();
        assert_eq!(locator.kind(), LocatorKind::BuildLogs);
        assert_eq!(locator.path(), "");
        assert_eq!(locator.query(), Some("Hello%20World"));
        assert_eq!(locator.to_string(), "buildLogs:?Hello%20World");
    }

    #[test]
    fn test_fragment_may_contain_question_mark() {
        let locator: LogLocator = "deviceLogs:dev#a?b".parse().unwrap();
        assert_eq!(locator.path(), "dev");
        assert_eq!(locator.query(), None);
        assert_eq!(locator.fragment(), Some("a?b"));
        assert_eq!(locator.to_string(), "deviceLogs:dev#a?b");
    }

    #[test]
    fn test_missing_scheme() {
        assert!(matches!(
            "no-scheme-here".parse::<LogLocator>(),
            Err(LocatorError::MissingScheme(_))
        ));
        assert!(":path".parse::<LogLocator>().is_err());
    }

    #[test]
    fn test_other_scheme() {
        let locator: LogLocator = "file:/tmp/x".parse().unwrap();
        assert_eq!(locator.kind(), LocatorKind::Other("file".to_string()));
    }

    #[test]
    fn test_for_device() {
        let device = DeviceRef::new("kiosk-7", "4f1c9e2d8b");
        let locator = LogLocator::for_device(&device);
        assert_eq!(locator.to_string(), "deviceLogs:kiosk-7#4f1c9e2d8b");
        assert_eq!(device.short_uuid(), "4f1c9e2");
    }

    #[test]
    fn test_build_logs_encoding() {
        let locator = LogLocator::build_logs("step 1/2: ok (cached)\n100%");
        assert_eq!(
            locator.query(),
            Some("step%201%2F2%3A%20ok%20(cached)%0A100%25")
        );
        let decoded = decode_component(locator.query().unwrap()).unwrap();
        assert_eq!(decoded, "step 1/2: ok (cached)\n100%");
    }

    #[test]
    fn test_decode_rejects_malformed_escapes() {
        assert_eq!(
            decode_component("100%"),
            Err(LocatorError::Decode { position: 3 })
        );
        assert_eq!(
            decode_component("a%zzb"),
            Err(LocatorError::Decode { position: 1 })
        );
        assert_eq!(
            decode_component("ok%2"),
            Err(LocatorError::Decode { position: 2 })
        );
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(decode_component("%FF%FE"), Err(LocatorError::InvalidUtf8));
    }

    #[test]
    fn test_decode_multibyte() {
        assert_eq!(decode_component("caf%C3%A9").unwrap(), "café");
        assert_eq!(decode_component("plain").unwrap(), "plain");
    }

    #[test]
    fn test_log_line_from_json() {
        let line = LogLine::from_json(
            r#"{"message":"booting\n","timestamp":1700000000000,"serviceId":42,"isStdErr":true,"isSystem":false}"#,
        )
        .unwrap();
        assert_eq!(line.message, "booting\n");
        assert_eq!(line.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(line.service_id, Some(42));
        assert!(line.is_stderr);
        assert!(!line.is_system);
    }

    #[test]
    fn test_log_line_from_text() {
        let line = LogLine::from_text("ready");
        assert_eq!(line.message, "ready\n");
        assert!(line.service_id.is_none());
    }
}
