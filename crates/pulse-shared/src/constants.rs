/// Application name
pub const APP_NAME: &str = "Pulse";

/// Maximum consecutive connection attempts per connect cycle
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Delay between connection attempts in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1_000;

/// Delay before the automatic reconnect that follows a server-initiated
/// drop, in milliseconds
pub const RECONNECT_DELAY_MS: u64 = 1_000;

/// Interval of the history polling fallback in seconds
pub const HISTORY_POLL_SECS: u64 = 5;

/// Capacity of command channels into background tasks
pub const COMMAND_BUFFER: usize = 256;

/// Capacity of notification channels out of background tasks
pub const NOTIFICATION_BUFFER: usize = 256;

/// Capacity of per-view update channels
pub const VIEW_UPDATE_BUFFER: usize = 64;

/// Prefix of client-generated placeholder message ids
pub const PLACEHOLDER_ID_PREFIX: &str = "local-";
