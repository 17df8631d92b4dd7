use crate::constants::DEFAULT_DISCOVERY_PREFIX;
use crate::constants::PATH_SEPARATOR;
use crate::DecodeError;

/// Maps registration keys to `(service_type, service_id)` and back
///
/// Keys have the shape `<prefix><service_type>/<service_id>` where the
/// prefix defaults to `/srvdis/`. Neither segment may be empty or contain
/// the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCodec {
    prefix: String,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_PREFIX)
    }
}

impl PathCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Splits a registration key into `(service_type, service_id)`
    pub fn parse(
        &self,
        key: &[u8],
    ) -> std::result::Result<(String, String), DecodeError> {
        let invalid = |reason| DecodeError::InvalidKey {
            key: String::from_utf8_lossy(key).into_owned(),
            reason,
        };

        let path = std::str::from_utf8(key).map_err(|_| invalid("not valid UTF-8"))?;
        let rest = path
            .strip_prefix(self.prefix.as_str())
            .ok_or_else(|| invalid("outside of the discovery prefix"))?;
        let (service_type, service_id) = rest
            .split_once(PATH_SEPARATOR)
            .ok_or_else(|| invalid("missing service id segment"))?;

        if service_type.is_empty() {
            return Err(invalid("empty service type"));
        }
        if service_id.is_empty() {
            return Err(invalid("empty service id"));
        }
        if service_id.contains(PATH_SEPARATOR) {
            return Err(invalid("too many path segments"));
        }

        Ok((service_type.to_string(), service_id.to_string()))
    }

    /// Builds the key a registration for `(service_type, service_id)` is stored at
    pub fn format(
        &self,
        service_type: &str,
        service_id: &str,
    ) -> String {
        format!("{}{}{}{}", self.prefix, service_type, PATH_SEPARATOR, service_id)
    }
}
