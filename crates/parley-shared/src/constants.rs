/// Maximum message content length, in characters
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Fallback poll interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Change feed buffer per subscriber
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Maximum object size accepted by object storage (50 MiB)
pub const MAX_OBJECT_SIZE: usize = 50 * 1024 * 1024;

/// Maximum length of a sanitized storage file name, in bytes
pub const MAX_STORED_FILE_NAME: usize = 100;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Conversation preview placeholders
pub const PREVIEW_IMAGE: &str = "Photo";
pub const PREVIEW_VIDEO: &str = "Video";
pub const PREVIEW_DOCUMENT: &str = "Document";
pub const PREVIEW_FALLBACK: &str = "New message";

/// Display name used when the profile lookup has no entry
pub const UNKNOWN_USER_NAME: &str = "Unknown user";
