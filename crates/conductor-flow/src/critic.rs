use std::path::Path;

use serde::{Deserialize, Serialize};

/// Heuristic stand-in for a design critic: scores the current draft by
/// structure and length rather than judgment, but the score and issue list
/// shape the refinement loop exactly as a real critic task's output would.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticResult {
    pub persona: String,
    pub score: u32,
    pub issues: Vec<String>,
    pub suggestions: String,
    pub iteration: u32,
}

pub fn run_carmack_critic(design_path: &Path, iteration: u32) -> CriticResult {
    let content = std::fs::read_to_string(design_path).unwrap_or_default();
    let heading_count = content.matches('#').count() as u32;
    let word_count = content.split_whitespace().count() as u32;
    let score = std::cmp::min(10, 4 + heading_count + word_count / 200);

    let mut issues = Vec::new();
    if heading_count < 3 {
        issues.push("Add more structured sections to the design.".to_string());
    }
    if !content.to_lowercase().contains("performance") {
        issues.push("Explicitly discuss performance considerations.".to_string());
    }

    CriticResult {
        persona: "john_carmack".to_string(),
        score,
        issues,
        suggestions: "Iterate on the architecture and quantify trade-offs.".to_string(),
        iteration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_design_file_scores_minimum_and_flags_everything() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_carmack_critic(&dir.path().join("design.md"), 1);
        assert_eq!(result.score, 4);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn well_structured_long_document_scores_higher_and_clears_issues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.md");
        let mut body = String::from("# One\n## Two\n### Three\nThis design discusses performance extensively.\n");
        body.push_str(&"word ".repeat(500));
        std::fs::write(&path, body).unwrap();

        let result = run_carmack_critic(&path, 2);
        assert!(result.score > 4);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn score_never_exceeds_ten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.md");
        let mut body = String::from("# # # # # # # # # # performance\n");
        body.push_str(&"word ".repeat(5000));
        std::fs::write(&path, body).unwrap();

        let result = run_carmack_critic(&path, 3);
        assert_eq!(result.score, 10);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Score invariant: never below the floor of 4, never above the cap
        /// of 10, regardless of heading/word counts or document content.
        #[test]
        fn score_always_stays_within_bounds(body in ".{0,2000}", iteration in 0u32..50) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("design.md");
            std::fs::write(&path, &body).unwrap();

            let result = run_carmack_critic(&path, iteration);
            prop_assert!(result.score >= 4);
            prop_assert!(result.score <= 10);
            prop_assert_eq!(result.iteration, iteration);
        }

        /// A document with at least 3 headings and the word "performance"
        /// always clears both issues, whatever else it contains.
        #[test]
        fn enough_headings_and_performance_mention_clears_issues(filler in "[a-zA-Z ]{0,200}") {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("design.md");
            let body = format!("# One\n## Two\n### Three\nperformance {filler}");
            std::fs::write(&path, &body).unwrap();

            let result = run_carmack_critic(&path, 1);
            prop_assert!(result.issues.is_empty());
        }
    }
}
