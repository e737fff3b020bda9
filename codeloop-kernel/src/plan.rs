//! The plan-first artifact (the model's patch-free first turn) and the
//! blueprint set it is grounded against: four canonical markdown documents
//! the Blueprint Manager ensures exist before planning starts.

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Syntactic classification of a repo file, used to gate which files each
/// iteration is allowed to write (iterations 1-2: code/doc only, iteration
/// 3: deferred too) and to order the manifest shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    Code,
    Doc,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileClassification {
    pub path: String,
    pub class: FileClass,
}

/// Structured output of the plan-first step: the model's one patch-free
/// turn before iterations begin. Persisted as JSON (source of truth) with
/// a markdown twin regenerated on every write, never parsed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IterationPlan {
    pub overview: String,
    #[serde(default)]
    pub suggested_run_command: Option<String>,
    #[serde(default)]
    pub classifications: Vec<FileClassification>,
    /// Bounded 1..=3 by [`IterationPlan::clamp_estimate`].
    pub estimated_iterations: u8,
}

/// Parses the plan-first turn's reply: exactly one JSON object, same
/// "no prose, no code fences, no trailing data" discipline as the patch
/// envelope validator, with `estimated_iterations` clamped into its
/// documented 1..=3 bound rather than rejected outright.
pub fn parse_plan_reply(raw_text: &str) -> Result<IterationPlan, RunError> {
    let trimmed = raw_text.trim();
    let mut de = serde_json::Deserializer::from_str(trimmed);
    let mut plan: IterationPlan = serde_path_to_error::deserialize(&mut de)
        .map_err(|e| RunError::SchemaViolation(format!("plan envelope: {e}")))?;
    de.end().map_err(|_| {
        RunError::MalformedEnvelope("trailing data after plan JSON object".to_string())
    })?;
    plan.estimated_iterations = IterationPlan::clamp_estimate(plan.estimated_iterations);
    Ok(plan)
}

impl IterationPlan {
    pub fn clamp_estimate(raw: u8) -> u8 {
        raw.clamp(1, 3)
    }

    pub fn files_of(&self, class: FileClass) -> impl Iterator<Item = &str> {
        self.classifications
            .iter()
            .filter(move |c| c.class == class)
            .map(|c| c.path.as_str())
    }

    /// The markdown twin: regenerated from the JSON on every write, never
    /// parsed back in.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Iteration plan\n\n");
        out.push_str("## Overview\n\n");
        out.push_str(&self.overview);
        out.push_str("\n\n## Suggested verification command\n\n");
        match &self.suggested_run_command {
            Some(cmd) => out.push_str(&format!("`{cmd}`\n\n")),
            None => out.push_str("_none suggested_\n\n"),
        }
        out.push_str("## File classification\n\n");
        for class in [FileClass::Code, FileClass::Doc, FileClass::Deferred] {
            let label = match class {
                FileClass::Code => "Code",
                FileClass::Doc => "Doc",
                FileClass::Deferred => "Deferred",
            };
            let files: Vec<&str> = self.files_of(class).collect();
            out.push_str(&format!("- **{label}**: "));
            if files.is_empty() {
                out.push_str("_none_\n");
            } else {
                out.push_str(&files.join(", "));
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "\n## Estimated iterations\n\n{}\n",
            self.estimated_iterations
        ));
        out
    }
}

/// One of the four canonical documents the Blueprint Manager grounds work
/// on, stored under a fixed subdirectory (`<state-dir>/blueprints/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintKind {
    Whitepaper,
    BuildGuide,
    SystemDesign,
    ProjectInstructions,
}

impl BlueprintKind {
    pub const ALL: [BlueprintKind; 4] = [
        BlueprintKind::Whitepaper,
        BlueprintKind::BuildGuide,
        BlueprintKind::SystemDesign,
        BlueprintKind::ProjectInstructions,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            BlueprintKind::Whitepaper => "whitepaper.md",
            BlueprintKind::BuildGuide => "build-guide.md",
            BlueprintKind::SystemDesign => "system-design.md",
            BlueprintKind::ProjectInstructions => "project-instructions.md",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            BlueprintKind::Whitepaper => "Whitepaper",
            BlueprintKind::BuildGuide => "Build Guide",
            BlueprintKind::SystemDesign => "System Design",
            BlueprintKind::ProjectInstructions => "Project Instructions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintDocStatus {
    pub kind: BlueprintKind,
    pub present: bool,
    pub size_bytes: u64,
}

/// Presence/absence and cached size of each of the four canonical docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintSet {
    pub docs: Vec<BlueprintDocStatus>,
}

impl BlueprintSet {
    pub fn all_present(&self) -> bool {
        self.docs.iter().all(|d| d.present)
    }

    pub fn missing(&self) -> Vec<BlueprintKind> {
        self.docs
            .iter()
            .filter(|d| !d.present)
            .map(|d| d.kind)
            .collect()
    }

    /// A compact summary used as prompt context, truncated to `byte_budget`.
    pub fn summary(&self, byte_budget: usize) -> String {
        let mut out = String::new();
        for doc in &self.docs {
            let line = format!(
                "- {}: {} ({} bytes)\n",
                doc.kind.title(),
                if doc.present { "present" } else { "missing" },
                doc.size_bytes
            );
            out.push_str(&line);
        }
        if out.len() > byte_budget {
            out.truncate(byte_budget);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_clamps_to_inclusive_1_to_3() {
        assert_eq!(IterationPlan::clamp_estimate(0), 1);
        assert_eq!(IterationPlan::clamp_estimate(2), 2);
        assert_eq!(IterationPlan::clamp_estimate(9), 3);
    }

    #[test]
    fn markdown_twin_lists_each_classification_bucket() {
        let plan = IterationPlan {
            overview: "ship the thing".to_string(),
            suggested_run_command: Some("cargo test".to_string()),
            classifications: vec![
                FileClassification {
                    path: "src/lib.rs".to_string(),
                    class: FileClass::Code,
                },
                FileClassification {
                    path: "README.md".to_string(),
                    class: FileClass::Doc,
                },
            ],
            estimated_iterations: 2,
        };
        let md = plan.to_markdown();
        assert!(md.contains("src/lib.rs"));
        assert!(md.contains("README.md"));
        assert!(md.contains("cargo test"));
        assert!(md.contains("_none_"));
    }

    #[test]
    fn blueprint_set_reports_missing_docs() {
        let set = BlueprintSet {
            docs: vec![
                BlueprintDocStatus {
                    kind: BlueprintKind::Whitepaper,
                    present: true,
                    size_bytes: 120,
                },
                BlueprintDocStatus {
                    kind: BlueprintKind::BuildGuide,
                    present: false,
                    size_bytes: 0,
                },
            ],
        };
        assert!(!set.all_present());
        assert_eq!(set.missing(), vec![BlueprintKind::BuildGuide]);
    }

    #[test]
    fn parse_plan_reply_clamps_out_of_range_estimate() {
        let plan = parse_plan_reply(
            r#"{"overview":"x","estimated_iterations":9,"classifications":[]}"#,
        )
        .unwrap();
        assert_eq!(plan.estimated_iterations, 3);
    }

    #[test]
    fn parse_plan_reply_rejects_trailing_prose() {
        let err =
            parse_plan_reply(r#"{"overview":"x","estimated_iterations":1} thanks!"#).unwrap_err();
        assert!(matches!(err, RunError::MalformedEnvelope(_)));
    }

    #[test]
    fn parse_plan_reply_rejects_unknown_fields() {
        let err = parse_plan_reply(
            r#"{"overview":"x","estimated_iterations":1,"bogus":true}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::SchemaViolation(_)));
    }

    #[test]
    fn summary_is_bounded_by_byte_budget() {
        let set = BlueprintSet {
            docs: vec![BlueprintDocStatus {
                kind: BlueprintKind::Whitepaper,
                present: true,
                size_bytes: 9999,
            }],
        };
        let summary = set.summary(5);
        assert!(summary.len() <= 5);
    }
}
