use std::collections::HashSet;

use log::debug;

use crate::model::record::CapturedRecord;

/// Drops records whose `(id, createdAt)` key was already seen, keeping the
/// first occurrence in place. Idempotent.
pub fn dedup_exact(records: Vec<CapturedRecord>) -> Vec<CapturedRecord> {
    let mut seen = HashSet::new();
    let before = records.len();
    let kept: Vec<_> = records.into_iter().filter(|r| seen.insert(r.dedup_key())).collect();
    debug!("Exact dedup kept {} of {} records", kept.len(), before);
    kept
}

/// Collapses repeated payloads reported by the same capture agent. A payload
/// seen by a different agent is kept.
pub fn dedup_by_content(records: Vec<CapturedRecord>) -> Vec<CapturedRecord> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| seen.insert((r.raw.clone(), r.capture_id())))
        .collect();
    debug!("Content dedup kept {} of {} records", kept.len(), before);
    kept
}

/// Both stages, the second only when `global` is set.
pub fn dedup_records(records: Vec<CapturedRecord>, global: bool) -> Vec<CapturedRecord> {
    let exact = dedup_exact(records);
    if global {
        dedup_by_content(exact)
    } else {
        exact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn rec(id: i64, offset: i64, raw: &str, capture: &str) -> CapturedRecord {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut r = CapturedRecord::new(id, "call", base + Duration::seconds(offset));
        r.raw = raw.into();
        r.protocol_header.insert("captureId".into(), json!(capture));
        r
    }

    #[test]
    fn exact_dedup_keeps_first_and_is_idempotent() {
        let records = vec![
            rec(1, 0, "a", "x"),
            rec(2, 1, "b", "x"),
            rec(1, 0, "a-copy", "y"),
            rec(1, 5, "a-later", "x"),
        ];
        let once = dedup_exact(records);
        assert_eq!(once.len(), 3);
        assert_eq!(once[0].raw, "a");
        assert_eq!(once[2].raw, "a-later");
        assert_eq!(dedup_exact(once.clone()), once);
    }

    #[test]
    fn content_dedup_is_per_capture_point() {
        let records = vec![
            rec(1, 0, "INVITE", "agent-1"),
            rec(2, 1, "INVITE", "agent-1"),
            rec(3, 2, "INVITE", "agent-2"),
            rec(4, 3, "INVITE", "agent-1"),
            rec(5, 4, "BYE", "agent-1"),
        ];
        let kept = dedup_by_content(records);
        let ids: Vec<i64> = kept.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn global_flag_gates_second_stage() {
        let records = vec![rec(1, 0, "INVITE", "a"), rec(2, 1, "INVITE", "a")];
        assert_eq!(dedup_records(records.clone(), false).len(), 2);
        assert_eq!(dedup_records(records, true).len(), 1);
    }
}
