/// Protocol version reported by `/health`
pub const PROTOCOL_VERSION: &str = "bazaar-chat/1";

/// Application name
pub const APP_NAME: &str = "Bazaar Chat";

/// Header set by the upstream auth gateway with the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Maximum length of a user identifier
pub const MAX_USER_ID_LEN: usize = 64;

/// Maximum length of a product reference
pub const MAX_PRODUCT_REF_LEN: usize = 128;

/// Default maximum message length, in characters
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 4000;

/// Default capacity of a live session's outbound event queue
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 256;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
