use crate::model::Ms;

/// Interval length assumed for a booking whose service no longer resolves.
pub const DEFAULT_SERVICE_DURATION_MIN: u32 = 60;

pub const MAX_SERVICE_DURATION_MIN: u32 = 24 * 60;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 8 * 1024;
pub const MAX_CATEGORY_LEN: usize = 128;
pub const MAX_IMAGES: usize = 16;
pub const MAX_IMAGE_URI_LEN: usize = 2048;
pub const MAX_ADDRESS_LEN: usize = 512;
pub const MAX_PHONE_LEN: usize = 32;
/// Pending plus confirmed; settled history does not count.
pub const MAX_ACTIVE_BOOKINGS_PER_PROVIDER: usize = 100_000;

/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
