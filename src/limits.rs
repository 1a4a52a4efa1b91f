use crate::model::Ms;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_IMAGE_URL_LEN: usize = 2048;
pub const MAX_USER_ID_LEN: usize = 256;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest availability query: one week.
pub const MAX_QUERY_WINDOW_MS: Ms = 7 * 24 * 3_600_000;

/// Longest accepted protocol line, in bytes.
pub const MAX_LINE_LEN: usize = 16 * 1024;
