//! CI environment harvesting.

use dagspan_core::{AttributeValue, Attributes};

const GITHUB_VARIABLES: &[&str] = &[
    "GITHUB_REPOSITORY",
    "GITHUB_WORKFLOW",
    "GITHUB_ACTION_REF",
    "RUNNER_NAME",
    "GITHUB_RUN_ID",
    "GITHUB_ACTOR",
    "GITHUB_JOB",
    "GITHUB_BASE_REF",
    "GITHUB_HEAD_REF",
    "GITHUB_SHA",
    "GITHUB_REF",
    "GITHUB_REF_TYPE",
    "GITHUB_REF_NAME",
    "GITHUB_EVENT_NAME",
];

/// `pipeline.github.*` attributes from the GitHub Actions environment.
pub fn github_env_attributes() -> Attributes {
    github_env_attributes_from(|key| std::env::var(key).ok())
}

/// Same as [`github_env_attributes`], reading variables through `lookup`.
pub fn github_env_attributes_from(lookup: impl Fn(&str) -> Option<String>) -> Attributes {
    GITHUB_VARIABLES
        .iter()
        .filter_map(|var| {
            let value = lookup(var)?;
            let short = var.to_lowercase().replacen("github_", "", 1);
            Some((format!("pipeline.github.{}", short), AttributeValue::from(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_set_variables_are_harvested() {
        let attrs = github_env_attributes_from(|key| match key {
            "GITHUB_SHA" => Some("abc123".into()),
            "RUNNER_NAME" => Some("runner-1".into()),
            "HOME" => Some("/root".into()),
            _ => None,
        });

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["pipeline.github.sha"], AttributeValue::from("abc123"));
        assert_eq!(attrs["pipeline.github.runner_name"], AttributeValue::from("runner-1"));
    }

    #[test]
    fn test_empty_environment() {
        assert!(github_env_attributes_from(|_| None).is_empty());
    }
}
