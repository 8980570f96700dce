//! Cohesiveness scoring.
//!
//! Deterministic checks over a repository's structural snapshot. Each check
//! deducts from one sub-score and emits an issue; the overall score is the
//! rounded mean of the four sub-scores. Naming and dependency sub-scores
//! default to 100 until their checks exist.

use chrono::{DateTime, Utc};

use crate::domain::models::{
    CohesivenessIssue, CohesivenessScore, IssueKind, IssueSeverity, RepoStructure,
};

const MISSING_MANIFEST_PENALTY: i32 = 30;
const MISSING_TYPE_CONFIG_PENALTY: i32 = 20;
const MISSING_DEPLOY_CONFIG_PENALTY: i32 = 25;
const LOOSE_TREE_PENALTY: i32 = 20;
const MISSING_README_PENALTY: i32 = 10;

/// Files beyond this without a `src/` directory count as a loose tree.
const LOOSE_TREE_FILE_THRESHOLD: usize = 5;

/// Score a repository's structure.
pub fn score_structure(structure: &RepoStructure, now: DateTime<Utc>) -> CohesivenessScore {
    let mut config: i32 = 100;
    let mut structure_score: i32 = 100;
    let mut issues = Vec::new();

    if !structure.has_package_manifest {
        config -= MISSING_MANIFEST_PENALTY;
        issues.push(CohesivenessIssue {
            kind: IssueKind::MissingConfig,
            severity: IssueSeverity::Warning,
            message: "Repository has no project manifest".into(),
            path: None,
            suggestion: Some("Add a project manifest (package.json, Cargo.toml or equivalent)".into()),
            auto_fixable: true,
        });
    }

    if !structure.has_type_config {
        config -= MISSING_TYPE_CONFIG_PENALTY;
        issues.push(CohesivenessIssue {
            kind: IssueKind::MissingConfig,
            severity: IssueSeverity::Info,
            message: "Repository has no type-checker configuration".into(),
            path: None,
            suggestion: Some("Add a type-config file (tsconfig.json or equivalent)".into()),
            auto_fixable: true,
        });
    }

    if !structure.has_deploy_config {
        config -= MISSING_DEPLOY_CONFIG_PENALTY;
        issues.push(CohesivenessIssue {
            kind: IssueKind::MissingConfig,
            severity: IssueSeverity::Warning,
            message: "Repository has no deployment configuration".into(),
            path: None,
            suggestion: Some("Add a deployment config (wrangler.toml, Dockerfile or equivalent)".into()),
            auto_fixable: true,
        });
    }

    if !structure.has_src_dir() && structure.files.len() > LOOSE_TREE_FILE_THRESHOLD {
        structure_score -= LOOSE_TREE_PENALTY;
        issues.push(CohesivenessIssue {
            kind: IssueKind::StructureMismatch,
            severity: IssueSeverity::Info,
            message: format!(
                "{} files at the top level with no src/ directory",
                structure.files.len()
            ),
            path: None,
            suggestion: Some("Move source files under src/".into()),
            auto_fixable: false,
        });
    }

    if !structure.has_readme() {
        structure_score -= MISSING_README_PENALTY;
        issues.push(CohesivenessIssue {
            kind: IssueKind::MissingConfig,
            severity: IssueSeverity::Info,
            message: "Repository has no README".into(),
            path: None,
            suggestion: Some("Add a README.md".into()),
            auto_fixable: true,
        });
    }

    let structure_score = clamp_score(structure_score);
    let config = clamp_score(config);
    let naming: u8 = 100;
    let dependencies: u8 = 100;

    CohesivenessScore {
        structure: structure_score,
        naming,
        dependencies,
        config,
        overall: rounded_mean(structure_score, naming, dependencies, config),
        issues,
        checked_at: now,
    }
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 100) as u8
}

/// round((a + b + c + d) / 4) under integer arithmetic.
fn rounded_mean(a: u8, b: u8, c: u8, d: u8) -> u8 {
    let sum = a as u32 + b as u32 + c as u32 + d as u32;
    ((sum + 2) / 4) as u8
}
