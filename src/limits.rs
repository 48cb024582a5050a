// Hard bounds on request fields and store growth.

pub const MAX_PROPERTY_ID_LEN: usize = 64;
pub const MIN_VISITOR_NAME_LEN: usize = 2;
pub const MAX_VISITOR_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PHONE_LEN: usize = 7;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Bookings kept per property before inserts are refused.
pub const MAX_BOOKINGS_PER_PROPERTY: usize = 100_000;

/// Rate-limit client keys longer than this are truncated before use.
pub const MAX_CLIENT_KEY_LEN: usize = 128;

pub const AVAILABILITY_CACHE_CAPACITY: u64 = 10_000;
