use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single booking may not run longer than a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * DAY_MS;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PURPOSE_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_ROOMS: usize = 64;

/// Shortest booking-code prefix accepted as proof for a user cancellation.
pub const MIN_CANCEL_CODE_LEN: usize = 8;
/// Shortest code accepted for data export/erasure requests.
pub const MIN_PRIVACY_CODE_LEN: usize = 6;
/// Length of the code printed in confirmation notices.
pub const DISPLAY_CODE_LEN: usize = 12;

/// Hard cap on bookings generated from one recurrence request.
pub const MAX_SERIES_OCCURRENCES: u32 = 12;
