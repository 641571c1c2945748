//! Frame sizes.

/// Flags, key and version.
pub const DATA_HEADER: usize = 1 + 2 + 4;

/// Data header plus the payload digest.
pub const SUMMARY_HEADER: usize = DATA_HEADER + 4;

/// Bytes added by an image GUID.
pub const GUID_LEN: usize = 16;

/// Smallest MTU that carries a summary frame.
#[must_use]
pub fn min_mtu(with_guid: bool) -> usize {
    SUMMARY_HEADER + guid_len(with_guid)
}

/// Largest value a data frame can carry within `mtu` bytes.
///
/// Returns 0 when `mtu` is below [`min_mtu`], since a key whose summaries
/// cannot be sent never converges.
#[must_use]
pub fn max_value_size(mtu: usize, with_guid: bool) -> usize {
    if mtu < min_mtu(with_guid) {
        return 0;
    }
    mtu - DATA_HEADER - guid_len(with_guid)
}

fn guid_len(with_guid: bool) -> usize {
    if with_guid {
        GUID_LEN
    } else {
        0
    }
}
