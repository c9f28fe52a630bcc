use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Length of the tail appended to the timestamp
const TAIL_LEN: usize = 12;

/// Allocates a run id of the form `YYYYMMDDTHHMMSSZ-<tail>`
///
/// The tail is taken from just after the millisecond timestamp of a UUIDv7,
/// where the counter bits live, so runs started within the same second stay
/// distinct. Ids order by their second prefix.
pub fn new_run_id(started_at: DateTime<Utc>) -> String {
    let uuid = Uuid::now_v7().simple().to_string();
    let tail = &uuid[12..12 + TAIL_LEN];
    format!("{}-{}", started_at.format("%Y%m%dT%H%M%SZ"), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_id_shape() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let id = new_run_id(at);
        assert!(id.starts_with("20260314T092653Z-"));
        assert_eq!(id.len(), "20260314T092653Z-".len() + TAIL_LEN);
        // Tail opens on the version nibble that follows the timestamp
        assert_eq!(&id["20260314T092653Z-".len()..][..1], "7");
    }

    #[test]
    fn test_run_ids_are_unique_and_sortable() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        assert_ne!(new_run_id(early), new_run_id(early));
        assert!(new_run_id(early) < new_run_id(late));
    }

    #[test]
    fn test_burst_of_ids_in_one_second_is_distinct() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ids: std::collections::HashSet<String> = (0..256).map(|_| new_run_id(at)).collect();
        assert_eq!(ids.len(), 256);
    }
}
