// -
// Key namespaces

/// Prefix under which every service registration key lives
pub const DEFAULT_DISCOVERY_PREFIX: &str = "/srvdis/";

/// Separator between the service type and service id segments
pub(crate) const PATH_SEPARATOR: char = '/';

// -
// Config

/// Environment variable prefix for config overrides (`SRVDIS__WATCH__...`)
pub(crate) const CONFIG_ENV_PREFIX: &str = "SRVDIS";
