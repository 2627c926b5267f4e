pub const CACHIFY_STATUS_KEY: &str = "X-Cachify-Status";
pub const PROTOCOL_REQUEST_ID_KEY: &str = "X-Request-ID";
