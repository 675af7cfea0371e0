use crate::model::Minutes;

/// Shortest bookable duration.
pub const MIN_BOOKING_MINUTES: Minutes = 15;

/// Longest bookable duration (a full business day of simulator time).
pub const MAX_BOOKING_MINUTES: Minutes = 6 * 60;

pub const MAX_NOTES_LEN: usize = 2_000;

pub const MAX_NAME_LEN: usize = 200;

/// Upper bound on remediate-then-retry cycles for one transition.
pub const MAX_REMEDIATION_ROUNDS: usize = 3;

pub const MAX_MEMBER_SEARCH_RESULTS: usize = 25;

/// Guests on a single bay booking, host excluded.
pub const MAX_GUESTS: u8 = 7;

/// Days either side of today covered by a refresh.
pub const REFRESH_WINDOW_DAYS: u64 = 90;
