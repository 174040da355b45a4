//! Hard caps on input sizes and state growth.

pub const MAX_THERAPISTS: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CLIENT_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_SLOTS: usize = 96;
pub const MAX_BOOKINGS_PER_THERAPIST: usize = 1_000_000;
pub const MAX_OVERRIDES_PER_THERAPIST: usize = 10_000;
