use std::fs;
use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use log::{debug, error, info};
use regex::Regex;

use crate::error::{RelayError, Result};
use crate::github::GitHubClient;
use crate::tracker::events::CiParameter;

const LOGS_DIR: &str = "logs";
const LOG_FILES_PATTERN: &str = "*.txt";

/// Parameters declared on the workflow's `workflow_dispatch` trigger.
pub async fn parameters_from_config(
    github: &GitHubClient,
    workflow_file_name: &str,
    branch: Option<&str>,
) -> Result<Vec<CiParameter>> {
    let file = github.get_workflow_file(workflow_file_name, branch).await?;

    if file.encoding != "base64" {
        error!(
            "The content of the workflow's configuration file has an unknown encoding: {}",
            file.encoding
        );
        return Ok(vec![]);
    }

    debug!("Decoding the content of the workflow's configuration file...");
    let single_line: String = file
        .content
        .chars()
        .filter(|character| *character != '\n')
        .collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(single_line)
        .map_err(|e| RelayError::Config(format!("Invalid file encoding: {e}")))?;
    let content = String::from_utf8_lossy(&decoded).into_owned();

    parse_workflow_parameters(&content)
}

/// Execution parameter values recovered from the run's log archive.
///
/// The workflow echoes one `execution_parameter:: {json}` marker line; the
/// first match across the log files wins.
pub async fn parameters_from_logs(
    github: &GitHubClient,
    run_id: u64,
) -> Result<Vec<CiParameter>> {
    let logs_url = match github.get_download_logs_url(run_id).await? {
        Some(url) => url,
        None => return Ok(vec![]),
    };

    let archive = reqwest::get(logs_url.as_str()).await?.bytes().await?;

    fs::create_dir_all(LOGS_DIR)?;
    zip::ZipArchive::new(Cursor::new(archive.as_ref()))?.extract(LOGS_DIR)?;

    let serialized = find_execution_parameters(Path::new(LOGS_DIR))?;

    // Scratch space is reset whether or not a marker line was found.
    fs::remove_dir_all(LOGS_DIR)?;

    match serialized {
        Some(serialized) => deserialize_parameters(&serialized),
        None => Ok(vec![]),
    }
}

fn find_execution_parameters(logs_dir: &Path) -> Result<Option<String>> {
    let pattern = format!("{}/{LOG_FILES_PATTERN}", logs_dir.display());
    let marker = Regex::new(
        r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{7}Z execution_parameter:: (.*)$",
    )
    .map_err(|e| RelayError::Config(format!("Invalid marker pattern: {e}")))?;

    let mut log_files: Vec<_> = glob::glob(&pattern)?.filter_map(|entry| entry.ok()).collect();
    log_files.sort();
    info!(
        "Found {} log file(s) according to pattern '{LOG_FILES_PATTERN}'.",
        log_files.len()
    );

    for log_file in log_files {
        let content = fs::read_to_string(&log_file)?;
        for line in content.lines() {
            if let Some(captures) = marker.captures(line) {
                let serialized = captures[1].to_string();
                debug!("Found execution parameters: {serialized}");
                return Ok(Some(serialized));
            }
        }
    }

    Ok(None)
}

fn deserialize_parameters(serialized: &str) -> Result<Vec<CiParameter>> {
    let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(serialized)?;

    let mut parameters = Vec::with_capacity(parsed.len());
    for (name, value) in parsed {
        let string_value = match &value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        debug!("Found parameter in log files with {{name='{name}', value='{string_value}'}}.");
        parameters.push(CiParameter {
            name,
            value: Some(string_value),
            default_value: String::new(),
            choices: vec![],
            description: String::new(),
            parameter_type: "string".to_string(),
        });
    }

    Ok(parameters)
}

/// Extract `on.workflow_dispatch.inputs` from a workflow definition.
///
/// The trigger section has several legal YAML shapes (string, list,
/// mapping), so navigation is dynamic rather than typed.
fn parse_workflow_parameters(yaml_content: &str) -> Result<Vec<CiParameter>> {
    let document: serde_yaml::Value = serde_yaml::from_str(yaml_content)?;

    let inputs = document
        .get("on")
        .and_then(|triggers| triggers.get("workflow_dispatch"))
        .and_then(|dispatch| dispatch.get("inputs"))
        .and_then(serde_yaml::Value::as_mapping);

    let inputs = match inputs {
        Some(inputs) => inputs,
        None => return Ok(vec![]),
    };

    let mut parameters = Vec::with_capacity(inputs.len());
    for (name, details) in inputs {
        let name = match name.as_str() {
            Some(name) => name.to_string(),
            None => continue,
        };

        let parameter = CiParameter {
            name,
            value: None,
            default_value: yaml_scalar_to_string(details.get("default")),
            choices: details
                .get("options")
                .and_then(serde_yaml::Value::as_sequence)
                .map(|options| {
                    options
                        .iter()
                        .map(|option| yaml_scalar_to_string(Some(option)))
                        .collect()
                })
                .unwrap_or_default(),
            description: yaml_scalar_to_string(details.get("description")),
            parameter_type: "string".to_string(),
        };
        debug!("Found parameter in configuration file: {parameter:?}");
        parameters.push(parameter);
    }

    Ok(parameters)
}

fn yaml_scalar_to_string(value: Option<&serde_yaml::Value>) -> String {
    match value {
        Some(serde_yaml::Value::String(text)) => text.clone(),
        Some(serde_yaml::Value::Bool(flag)) => flag.to_string(),
        Some(serde_yaml::Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_workflow_dispatch_inputs() {
        let yaml = r#"
name: CI
on:
  workflow_dispatch:
    inputs:
      environment:
        description: Target environment
        default: staging
        options:
          - staging
          - production
      dry-run:
        default: true
"#;

        let parameters = parse_workflow_parameters(yaml).unwrap();

        assert_eq!(parameters.len(), 2);
        let environment = parameters
            .iter()
            .find(|parameter| parameter.name == "environment")
            .unwrap();
        assert_eq!(environment.description, "Target environment");
        assert_eq!(environment.default_value, "staging");
        assert_eq!(environment.choices, vec!["staging", "production"]);

        let dry_run = parameters
            .iter()
            .find(|parameter| parameter.name == "dry-run")
            .unwrap();
        assert_eq!(dry_run.default_value, "true");
        assert!(dry_run.choices.is_empty());
    }

    #[test]
    fn test_workflows_without_dispatch_inputs_have_no_parameters() {
        assert!(parse_workflow_parameters("on: push").unwrap().is_empty());
        assert!(parse_workflow_parameters("on:\n  push:\n    branches: [main]")
            .unwrap()
            .is_empty());
        assert!(parse_workflow_parameters("name: CI").unwrap().is_empty());
    }

    #[test]
    fn test_find_execution_parameters_in_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("1_build.txt")).unwrap();
        writeln!(file, "2024-05-01T10:00:00.0000000Z Starting job").unwrap();
        writeln!(
            file,
            "2024-05-01T10:00:01.0000000Z execution_parameter:: {{\"environment\":\"staging\",\"retries\":2}}"
        )
        .unwrap();

        let serialized = find_execution_parameters(dir.path()).unwrap().unwrap();
        let parameters = deserialize_parameters(&serialized).unwrap();

        assert_eq!(parameters.len(), 2);
        let environment = parameters
            .iter()
            .find(|parameter| parameter.name == "environment")
            .unwrap();
        assert_eq!(environment.value.as_deref(), Some("staging"));
        let retries = parameters
            .iter()
            .find(|parameter| parameter.name == "retries")
            .unwrap();
        assert_eq!(retries.value.as_deref(), Some("2"));
    }

    #[test]
    fn test_logs_without_marker_line_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("1_build.txt")).unwrap();
        writeln!(file, "2024-05-01T10:00:00.0000000Z plain output").unwrap();

        assert!(find_execution_parameters(dir.path()).unwrap().is_none());
    }
}
