//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - missing or invalid config file or chart path
pub const CONFIG_ERROR: i32 = 2;

/// Template error - helm could not render the chart
pub const TEMPLATE_ERROR: i32 = 3;

/// Cluster error - an API call, readiness wait or deletion failed
pub const CLUSTER_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Poll found the server stopped
pub const NOT_RUNNING: i32 = 6;
