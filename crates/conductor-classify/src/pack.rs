use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// A loaded pack of per-CLI regex cues plus a stability threshold.
///
/// Pack files live at `<packs_dir>/<cli_type>.yml` and despite the `.yml`
/// extension are parsed as JSON — preserved from the original implementation
/// so existing pack files do not need renaming or reformatting.
pub struct ClassifierPack {
    pub name: String,
    pub stability_polls: u32,
    pub idle_regexes: Vec<Regex>,
    pub busy_regexes: Vec<Regex>,
    pub confirm_regexes: Vec<Regex>,
    pub error_regexes: Vec<Regex>,
}

#[derive(Debug, Deserialize, Default)]
struct RawPack {
    stability_polls: Option<u32>,
    #[serde(default)]
    idle_patterns: Vec<String>,
    #[serde(default)]
    busy_patterns: Vec<String>,
    #[serde(default)]
    needs_confirmation_patterns: Vec<String>,
    #[serde(default)]
    error_patterns: Vec<String>,
}

impl ClassifierPack {
    fn empty(name: impl Into<String>, default_stability: u32) -> Self {
        ClassifierPack {
            name: name.into(),
            stability_polls: default_stability,
            idle_regexes: Vec::new(),
            busy_regexes: Vec::new(),
            confirm_regexes: Vec::new(),
            error_regexes: Vec::new(),
        }
    }

    /// Load `<packs_dir>/<cli_type>.yml`. A missing or malformed file falls
    /// back to an empty pack (no cues, default stability) rather than an
    /// error, so an unconfigured CLI type still gets the default-READY
    /// regex classifier behavior.
    pub fn load(packs_dir: &Path, cli_type: &str, default_stability: u32) -> Self {
        let pack_path = packs_dir.join(format!("{cli_type}.yml"));
        let raw_text = match std::fs::read_to_string(&pack_path) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(cli_type, "no classifier pack found, falling back to defaults");
                return ClassifierPack::empty(cli_type, default_stability);
            }
        };
        let raw: RawPack = match serde_json::from_str(&raw_text) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(cli_type, %err, "failed to parse classifier pack");
                return ClassifierPack::empty(cli_type, default_stability);
            }
        };
        ClassifierPack {
            name: cli_type.to_string(),
            stability_polls: raw.stability_polls.unwrap_or(default_stability),
            idle_regexes: compile_all(&raw.idle_patterns),
            busy_regexes: compile_all(&raw.busy_patterns),
            confirm_regexes: compile_all(&raw.needs_confirmation_patterns),
            error_regexes: compile_all(&raw.error_patterns),
        }
    }
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            RegexBuilder::new(pattern)
                .multi_line(true)
                .case_insensitive(true)
                .build()
                .inspect_err(|err| tracing::warn!(pattern, %err, "invalid classifier pattern, skipping"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_pack_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let pack = ClassifierPack::load(dir.path(), "codex", 3);
        assert_eq!(pack.stability_polls, 3);
        assert!(pack.idle_regexes.is_empty());
    }

    #[test]
    fn malformed_pack_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("codex.yml")).unwrap();
        write!(file, "not valid json {{").unwrap();
        let pack = ClassifierPack::load(dir.path(), "codex", 3);
        assert_eq!(pack.stability_polls, 3);
    }

    #[test]
    fn loads_patterns_from_json_despite_yml_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("codex.yml"),
            r#"{"stability_polls": 5, "idle_patterns": ["^\\$\\s*$"], "error_patterns": ["Traceback"]}"#,
        )
        .unwrap();
        let pack = ClassifierPack::load(dir.path(), "codex", 3);
        assert_eq!(pack.stability_polls, 5);
        assert_eq!(pack.idle_regexes.len(), 1);
        assert_eq!(pack.error_regexes.len(), 1);
    }
}
