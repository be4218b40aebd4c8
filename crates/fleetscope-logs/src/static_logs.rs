use fleetscope_types::{BUILD_LOG_SCHEME, LocatorKind, LogLocator, decode_component};

use crate::{ContentProvider, ProviderError};

/// Serves documents whose whole content travels in the locator's query.
///
/// Stateless: no registry, no subscription, no change notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticLogProvider;

impl StaticLogProvider {
    pub fn new() -> Self {
        Self
    }

    /// Percent-decode the locator's payload
    pub fn request_content(&self, locator: &LogLocator) -> Result<String, ProviderError> {
        if locator.kind() != LocatorKind::BuildLogs {
            return Err(ProviderError::WrongScheme {
                expected: BUILD_LOG_SCHEME,
                found: locator.scheme().to_string(),
            });
        }

        match locator.query() {
            Some(payload) => Ok(decode_component(payload)?),
            None => Ok(String::new()),
        }
    }
}

impl ContentProvider for StaticLogProvider {
    fn provide_content(&self, locator: &LogLocator) -> Result<String, ProviderError> {
        self.request_content(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetscope_types::LocatorError;

    #[test]
    fn test_decodes_payload() {
        let locator: LogLocator = "buildLogs:?Hello%20World".parse().unwrap();
        assert_eq!(
            StaticLogProvider::new().request_content(&locator).unwrap(),
            "Hello World"
        );
    }

    #[test]
    fn test_round_trips_encoded_build_log() {
        let text = "[main] Step 3/7 : RUN make\n[main] 100% done ✓\n";
        let locator = LogLocator::build_logs(text);
        assert_eq!(StaticLogProvider.request_content(&locator).unwrap(), text);
    }

    #[test]
    fn test_missing_query_is_empty() {
        let locator: LogLocator = "buildLogs:".parse().unwrap();
        assert_eq!(StaticLogProvider.request_content(&locator).unwrap(), "");
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let locator: LogLocator = "buildLogs:?50%25%2".parse().unwrap();
        let err = StaticLogProvider.request_content(&locator).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Decode(LocatorError::Decode { position: 5 })
        ));
    }

    #[test]
    fn test_rejects_live_locator() {
        let locator: LogLocator = "deviceLogs:dev#abc".parse().unwrap();
        assert!(matches!(
            StaticLogProvider.request_content(&locator),
            Err(ProviderError::WrongScheme { .. })
        ));
    }
}
