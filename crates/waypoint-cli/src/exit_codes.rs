//! Exit codes for the waypoint CLI.
//! Progress errors map through `ProgressError::exit_code`; the rest are CLI-level outcomes.

pub const SUCCESS: i32 = 0;
pub const NOT_FOUND: i32 = 1; // Unknown assessment, or bad config
pub const AUTH_FAILED: i32 = 2; // Token missing or rejected
pub const DEGRADED: i32 = 3; // Watch gave up reconnecting before completion
pub const INTERRUPTED: i32 = 4; // Watch stopped by Ctrl+C
pub const NETWORK: i32 = 5; // Transport failure or rate limit after retries
pub const INVALID_RESPONSE: i32 = 6; // Server returned data we could not use
pub const INTERNAL_ERROR: i32 = 7; // Anything else
