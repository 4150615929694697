//! Timestamp-sortable identifiers.
//!
//! Rows whose recency matters (refresh tokens, sessions, one-time codes,
//! recovery codes, audit events) get UUIDv7 ids generated app-side, so
//! "latest row" lookups can tie-break on the id. User ids stay v4.

use uuid::Uuid;

/// Generate a new UUIDv7.
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuidv7_has_version_seven() {
        assert_eq!(uuidv7().get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let a = uuidv7();
        let b = uuidv7();
        assert!(b >= a);
    }
}
