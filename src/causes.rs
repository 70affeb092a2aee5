use crate::error::{RelayError, Result};
use crate::tracker::events::{CiCausesType, CiEventCause};

/// Position of a pipeline component in the caused-by chain.
///
/// `cause_type` and `parent` stay optional so a malformed caller input is
/// caught as a contract violation in [`build_causes`] rather than silently
/// producing an incomplete chain.
#[derive(Debug, Clone)]
pub enum CauseJobData {
    Root {
        job_name: String,
        cause_type: Option<String>,
        user_id: Option<String>,
        user_name: Option<String>,
    },
    Upstream {
        job_name: String,
        parent: Option<Box<CauseJobData>>,
    },
}

impl CauseJobData {
    pub fn job_name(&self) -> &str {
        match self {
            Self::Root { job_name, .. } | Self::Upstream { job_name, .. } => job_name,
        }
    }

    /// Wrap `parent` as the cause data of one of its child components.
    pub fn child_of(parent: &CauseJobData, job_name: String) -> Self {
        Self::Upstream {
            job_name,
            parent: Some(Box::new(parent.clone())),
        }
    }
}

/// Build the nested cause list for a component: a single entry per level,
/// chaining upstream until the root trigger.
pub fn build_causes(job_data: &CauseJobData, build_ci_id: &str) -> Result<Vec<CiEventCause>> {
    match job_data {
        CauseJobData::Root {
            job_name,
            cause_type,
            user_id,
            user_name,
        } => {
            let cause_type = cause_type.as_deref().ok_or(RelayError::MissingCauseType)?;
            Ok(vec![CiEventCause {
                cause_type: root_cause_type(cause_type),
                project: job_name.clone(),
                build_ci_id: build_ci_id.to_string(),
                user_id: user_id.clone(),
                user_name: user_name.clone(),
                causes: vec![],
            }])
        }
        CauseJobData::Upstream { parent, .. } => {
            let parent = parent.as_deref().ok_or(RelayError::MissingParentData)?;
            Ok(vec![CiEventCause {
                cause_type: CiCausesType::Upstream,
                project: parent.job_name().to_string(),
                build_ci_id: build_ci_id.to_string(),
                user_id: None,
                user_name: None,
                causes: build_causes(parent, build_ci_id)?,
            }])
        }
    }
}

/// Total mapping from a workflow trigger event to a root cause type.
pub fn root_cause_type(cause_type: &str) -> CiCausesType {
    match cause_type {
        "workflow_dispatch" => CiCausesType::User,
        "pull_request" | "push" | "create" | "delete" | "fork" | "merge_group" => {
            CiCausesType::Scm
        }
        "schedule" => CiCausesType::Timer,
        "workflow_run" | "workflow_call" => CiCausesType::Upstream,
        _ => CiCausesType::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> CauseJobData {
        CauseJobData::Root {
            job_name: "acme/widgets/ci.yml".to_string(),
            cause_type: Some("push".to_string()),
            user_id: Some("octocat".to_string()),
            user_name: Some("octocat".to_string()),
        }
    }

    #[test]
    fn test_root_cause() {
        let causes = build_causes(&root(), "42").unwrap();

        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].cause_type, CiCausesType::Scm);
        assert_eq!(causes[0].project, "acme/widgets/ci.yml");
        assert_eq!(causes[0].build_ci_id, "42");
        assert_eq!(causes[0].user_id.as_deref(), Some("octocat"));
        assert!(causes[0].causes.is_empty());
    }

    #[test]
    fn test_nesting_depth_matches_parent_chain() {
        let job = CauseJobData::child_of(&root(), "acme/widgets/ci.yml/build".to_string());
        let step =
            CauseJobData::child_of(&job, "acme/widgets/ci.yml/build/checkout".to_string());

        let causes = build_causes(&step, "42").unwrap();

        // step -> job -> root: two UPSTREAM levels wrapping the root cause.
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].cause_type, CiCausesType::Upstream);
        assert_eq!(causes[0].project, "acme/widgets/ci.yml/build");
        let inner = &causes[0].causes;
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].cause_type, CiCausesType::Upstream);
        assert_eq!(inner[0].project, "acme/widgets/ci.yml");
        let innermost = &inner[0].causes;
        assert_eq!(innermost.len(), 1);
        assert_eq!(innermost[0].cause_type, CiCausesType::Scm);
        assert!(innermost[0].causes.is_empty());
    }

    #[test]
    fn test_root_without_cause_type_fails() {
        let data = CauseJobData::Root {
            job_name: "acme/widgets/ci.yml".to_string(),
            cause_type: None,
            user_id: None,
            user_name: None,
        };

        assert!(matches!(
            build_causes(&data, "42"),
            Err(RelayError::MissingCauseType)
        ));
    }

    #[test]
    fn test_non_root_without_parent_fails() {
        let data = CauseJobData::Upstream {
            job_name: "acme/widgets/ci.yml/build".to_string(),
            parent: None,
        };

        assert!(matches!(
            build_causes(&data, "42"),
            Err(RelayError::MissingParentData)
        ));
    }

    #[test]
    fn test_root_cause_type_mapping_is_total_and_stable() {
        assert_eq!(root_cause_type("workflow_dispatch"), CiCausesType::User);
        assert_eq!(root_cause_type("push"), CiCausesType::Scm);
        assert_eq!(root_cause_type("pull_request"), CiCausesType::Scm);
        assert_eq!(root_cause_type("merge_group"), CiCausesType::Scm);
        assert_eq!(root_cause_type("schedule"), CiCausesType::Timer);
        assert_eq!(root_cause_type("workflow_run"), CiCausesType::Upstream);
        assert_eq!(root_cause_type("workflow_call"), CiCausesType::Upstream);
        assert_eq!(root_cause_type("deployment"), CiCausesType::Undefined);

        // Referential stability: same input, same output.
        assert_eq!(root_cause_type("push"), root_cause_type("push"));
    }
}
