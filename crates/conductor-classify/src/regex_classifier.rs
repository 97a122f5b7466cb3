use conductor_core::types::{ClassificationResult, PaneLifecycle};
use regex::Regex;

use crate::pack::ClassifierPack;

/// Deterministic classifier driven entirely by a pack's regex cues.
/// Precedence: error > needs_confirmation > busy > idle-match > default-ready.
pub struct RegexClassifier<'a> {
    pack: &'a ClassifierPack,
}

impl<'a> RegexClassifier<'a> {
    pub fn new(pack: &'a ClassifierPack) -> Self {
        RegexClassifier { pack }
    }

    pub fn classify(&self, snapshot: &str) -> ClassificationResult {
        if match_any(&self.pack.error_regexes, snapshot) {
            return ClassificationResult {
                state: PaneLifecycle::Error,
                summary: "Detected error output".to_string(),
                actions_needed: Some("Inspect the PTY logs to unblock the worker.".to_string()),
            };
        }
        if match_any(&self.pack.confirm_regexes, snapshot) {
            return ClassificationResult {
                state: PaneLifecycle::NeedsConfirmation,
                summary: "Tool is waiting for explicit confirmation".to_string(),
                actions_needed: Some("Answer the confirmation prompt in the PTY.".to_string()),
            };
        }
        if match_any(&self.pack.busy_regexes, snapshot) {
            return ClassificationResult {
                state: PaneLifecycle::Busy,
                summary: "Workload still running".to_string(),
                actions_needed: None,
            };
        }
        if match_any(&self.pack.idle_regexes, snapshot) {
            return ClassificationResult {
                state: PaneLifecycle::Ready,
                summary: "Idle prompt detected".to_string(),
                actions_needed: None,
            };
        }
        ClassificationResult {
            state: PaneLifecycle::Ready,
            summary: "No activity detected in snapshot".to_string(),
            actions_needed: None,
        }
    }
}

fn match_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(text))
}


#[cfg(test)]
mod proptests {
    use super::tests::*;
    use super::*;
    use proptest::prelude::*;

    /// A snapshot built from arbitrary filler text plus zero or more of the
    /// four marker words, in random order.
    fn arb_snapshot() -> impl Strategy<Value = (String, bool, bool, bool)> {
        (
            ".*",
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            proptest::collection::vec(0usize..4, 0..6),
        )
            .prop_map(|(filler, has_error, has_confirm, has_busy, order)| {
                let mut parts = vec![filler];
                if has_error {
                    parts.push("TRACEBACK_MARKER".to_string());
                }
                if has_confirm {
                    parts.push("CONFIRM_MARKER".to_string());
                }
                if has_busy {
                    parts.push("BUSY_MARKER".to_string());
                }
                for idx in order {
                    if idx < parts.len() {
                        parts.swap(0, idx);
                    }
                }
                (parts.join(" "), has_error, has_confirm, has_busy)
            })
    }

    proptest! {
        /// Precedence invariant: error beats everything else no matter what
        /// other markers or filler text also appear in the snapshot.
        #[test]
        fn error_marker_always_wins((snapshot, has_error, _, _) in arb_snapshot()) {
            let pack = pack_with(
                &["TRACEBACK_MARKER"],
                &["CONFIRM_MARKER"],
                &["BUSY_MARKER"],
                &[],
            );
            let classifier = RegexClassifier::new(&pack);
            let result = classifier.classify(&snapshot);
            if has_error {
                prop_assert_eq!(result.state, PaneLifecycle::Error);
            }
        }

        /// Precedence invariant: absent an error marker, confirm beats busy.
        #[test]
        fn confirm_marker_wins_over_busy_without_error((snapshot, has_error, has_confirm, has_busy) in arb_snapshot()) {
            let pack = pack_with(
                &["TRACEBACK_MARKER"],
                &["CONFIRM_MARKER"],
                &["BUSY_MARKER"],
                &[],
            );
            let classifier = RegexClassifier::new(&pack);
            let result = classifier.classify(&snapshot);
            if !has_error && has_confirm {
                prop_assert_eq!(result.state, PaneLifecycle::NeedsConfirmation);
            } else if !has_error && !has_confirm && has_busy {
                prop_assert_eq!(result.state, PaneLifecycle::Busy);
            }
        }

        /// Classification never panics on arbitrary text, with or without
        /// any configured regexes.
        #[test]
        fn classify_never_panics(text in ".*") {
            let pack = pack_with(&[], &[], &[], &[]);
            let classifier = RegexClassifier::new(&pack);
            let _ = classifier.classify(&text);
        }
    }
}
