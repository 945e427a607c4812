//! Debug assertion macros for the claim/publish protocol.
//!
//! Active only in debug builds; release builds carry no overhead. The
//! argument expressions are not evaluated in release, so atomic loads may be
//! written directly at the call sites.

/// Assert that a claimed position sits below the refreshed capacity bound.
///
/// A claim at or past `consumer_index + capacity` would overwrite a slot the
/// consumer has not vacated.
macro_rules! debug_assert_claim_in_bound {
    ($pos:expr, $bound:expr) => {
        debug_assert!(
            $pos < $bound,
            "claimed position {} not below capacity bound {}",
            $pos,
            $bound
        )
    };
}

/// Assert that a slot about to be published still carries an older marker.
///
/// Markers for one slot are strictly increasing across laps; seeing the
/// current lap's marker already in place means a double publish.
macro_rules! debug_assert_slot_vacant {
    ($seq:expr, $marker:expr) => {
        debug_assert!(
            $seq < $marker,
            "slot marker {} already at or past {}",
            $seq,
            $marker
        )
    };
}

/// Assert that a count stays within its bound.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $bound:expr) => {
        debug_assert!(
            $count <= $bound,
            "count {} exceeds bound {}",
            $count,
            $bound
        )
    };
}

/// Assert that a cursor only moves forward.
macro_rules! debug_assert_cursor_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} cursor went backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_claim_in_bound;
pub(crate) use debug_assert_cursor_monotonic;
pub(crate) use debug_assert_slot_vacant;
