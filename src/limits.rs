use crate::model::Ms;

pub const MAX_CLIENT_NAME_LEN: usize = 140;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_APPOINTMENTS_PER_SELLER: usize = 100_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
