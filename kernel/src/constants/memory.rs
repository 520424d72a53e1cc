//! Memory layout constants.

/// Size of a hardware page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// First address handed out to user mappings. Everything below stays
/// unmapped so null dereferences and low wild pointers keep faulting.
pub const USER_SPACE_START: u64 = 0x10_0000;

/// Exclusive end of the managed user window. This is the top of the
/// lower canonical half on x86-64, so it must never be materialized as
/// a `VirtAddr`; interval ends are carried as plain `u64`.
pub const USER_SPACE_END: u64 = 0x8000_0000_0000;

/// Length of the managed user window.
pub const USER_SPACE_LENGTH: u64 = USER_SPACE_END - USER_SPACE_START;
