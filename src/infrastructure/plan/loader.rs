//! Plan file loading.
//!
//! Plans are YAML documents deserialized into [`ProjectPlan`]. Parse
//! failures carry the file and line; validation runs separately so a
//! syntactically valid plan with semantic problems reports all of them at
//! once.

use std::path::Path;

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::ProjectPlan;

use super::validator::{validate_plan, ValidationReport};

/// Load, parse, and validate a plan file. Returns the plan together with
/// any non-fatal validation warnings.
pub async fn load_plan(path: &Path) -> OrchestrationResult<(ProjectPlan, ValidationReport)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OrchestrationError::PlanParse {
            file: Some(path.display().to_string()),
            line: None,
            message: e.to_string(),
        })?;

    let plan = parse_plan(&text, Some(path))?;
    let report = validate_plan(&plan)?;
    Ok((plan, report))
}

/// Parse a plan from YAML text.
pub fn parse_plan(text: &str, path: Option<&Path>) -> OrchestrationResult<ProjectPlan> {
    serde_yaml::from_str(text).map_err(|e| OrchestrationError::PlanParse {
        file: path.map(|p| p.display().to_string()),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_YAML: &str = r#"
name: demo
epics:
  - id: E001
    title: Core
    milestone_id: M001
    stories:
      - id: S001
        title: Setup
        epic_id: E001
        tasks:
          - id: T001
            description: Scaffold the project
            role: developer
          - id: T002
            description: Wire CI
            role: developer
            dependencies: [T001]
        acceptance_criteria:
          - builds cleanly
milestones:
  - id: M001
    title: v0
    epic_ids: [E001]
personas:
  - id: P001
    role: developer
    capabilities: [rust]
    instruction_template: "You are a {{role}}."
"#;

    #[test]
    fn test_parse_valid_plan() {
        let plan = parse_plan(PLAN_YAML, None).unwrap();
        assert_eq!(plan.name, "demo");
        assert_eq!(plan.task_count(), 2);
        assert_eq!(plan.personas.len(), 1);
        assert_eq!(
            plan.tasks().nth(1).unwrap().dependencies,
            vec!["T001".to_string()]
        );
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err = parse_plan("epics: [unclosed", None).unwrap_err();
        match err {
            OrchestrationError::PlanParse { line, .. } => {
                assert!(line.is_some());
            }
            other => panic!("expected PlanParse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load_plan(Path::new("/nonexistent/plan.yaml")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::PlanParse { .. }));
    }

    #[tokio::test]
    async fn test_load_valid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plan.yaml");
        tokio::fs::write(&path, PLAN_YAML).await.unwrap();

        let (plan, report) = load_plan(&path).await.unwrap();
        assert_eq!(plan.task_count(), 2);
        assert!(report.warnings.is_empty());
    }
}
