use crate::task::LifecycleState;

/// Backend sub-states in pipeline order, each pinned to a coarse progress
/// value. Celery's builtin states are uppercase; the backend's own stage
/// markers (audio extracted, vocals separated, text converted) are lowercase.
/// Matching is exact.
const SUB_STATE_PROGRESS: &[(&str, u8)] = &[
    ("PENDING", 10),
    ("STARTED", 20),
    ("separated", 40),
    ("distracted", 65),
    ("converted", 90),
];

const UNKNOWN_SUB_STATE_PROGRESS: u8 = 30;

/// Maps a backend poll status to a lifecycle state and progress estimate.
///
/// Total: terminal statuses map directly, every other status (including
/// unrecognized ones) is treated as still processing with progress taken
/// from the sub-state table.
pub fn translate(status: &str, sub_state: Option<&str>) -> (LifecycleState, u8) {
    match status {
        "success" => (LifecycleState::Succeeded, 100),
        "failed" => (LifecycleState::Failed, 0),
        _ => {
            let progress = sub_state
                .and_then(|s| SUB_STATE_PROGRESS.iter().find(|(name, _)| *name == s))
                .map(|(_, p)| *p)
                .unwrap_or(UNKNOWN_SUB_STATE_PROGRESS);
            (LifecycleState::Processing, progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_map_directly() {
        assert_eq!(translate("success", None), (LifecycleState::Succeeded, 100));
        assert_eq!(
            translate("success", Some("converted")),
            (LifecycleState::Succeeded, 100)
        );
        assert_eq!(translate("failed", None), (LifecycleState::Failed, 0));
        assert_eq!(
            translate("failed", Some("STARTED")),
            (LifecycleState::Failed, 0)
        );
    }

    #[test]
    fn known_sub_states_follow_the_table() {
        for (sub, expected) in [
            ("PENDING", 10u8),
            ("STARTED", 20),
            ("separated", 40),
            ("distracted", 65),
            ("converted", 90),
        ] {
            assert_eq!(
                translate("progress", Some(sub)),
                (LifecycleState::Processing, expected)
            );
        }
    }

    #[test]
    fn unknown_sub_state_or_none_defaults_to_mid_range() {
        assert_eq!(
            translate("progress", Some("RETRY")),
            (LifecycleState::Processing, 30)
        );
        assert_eq!(
            translate("progress", Some("pending")),
            (LifecycleState::Processing, 30)
        );
        assert_eq!(translate("progress", None), (LifecycleState::Processing, 30));
    }

    #[test]
    fn unrecognized_status_still_counts_as_processing() {
        assert_eq!(
            translate("queued-for-gpu", Some("STARTED")),
            (LifecycleState::Processing, 20)
        );
        assert_eq!(translate("", None), (LifecycleState::Processing, 30));
    }

    #[test]
    fn progress_always_within_bounds() {
        let statuses = ["success", "failed", "progress", "weird", ""];
        let subs = [
            None,
            Some("PENDING"),
            Some("STARTED"),
            Some("separated"),
            Some("distracted"),
            Some("converted"),
            Some("garbage"),
            Some(""),
        ];
        for status in statuses {
            for sub in subs {
                let (_, p) = translate(status, sub);
                assert!(p <= 100, "status={status:?} sub={sub:?} gave {p}");
            }
        }
    }
}
