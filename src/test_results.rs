use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::Result;
use crate::github::GitHubClient;
use crate::tracker::TrackerClient;

const ARTIFACTS_DIR: &str = "artifacts";

/// Download the run's artifacts, discover test reports matching the
/// configured glob patterns, and submit each one.
///
/// Submission is best-effort telemetry: a failing report is logged and
/// skipped, never aborting the batch.
pub async fn send_test_results(
    github: &GitHubClient,
    tracker: &TrackerClient,
    run_id: u64,
    build_ci_id: &str,
    job_ci_id: &str,
    instance_id: &str,
    patterns: &[&str],
) -> Result<()> {
    info!("Searching for test results...");

    let artifacts = github.get_workflow_run_artifacts(run_id).await?;

    fs::create_dir_all(ARTIFACTS_DIR)?;

    for artifact in &artifacts {
        info!("Downloading artifact {}...", artifact.name);
        let archive = github.download_artifact(artifact.id).await?;
        zip::ZipArchive::new(Cursor::new(archive))?.extract(ARTIFACTS_DIR)?;
    }

    for pattern in patterns {
        let report_files = discover_reports(Path::new(ARTIFACTS_DIR), pattern)?;
        info!(
            "Found {} test result file(s) according to pattern '{pattern}'",
            report_files.len()
        );

        for report_file in report_files {
            let report = fs::read_to_string(&report_file)?;
            if let Err(error) = tracker
                .send_test_result(&report, instance_id, job_ci_id, build_ci_id)
                .await
            {
                warn!(
                    "Failed to submit test results from '{}': {error}",
                    report_file.display()
                );
            }
        }
    }

    fs::remove_dir_all(ARTIFACTS_DIR)?;

    Ok(())
}

fn discover_reports(base_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full_pattern = format!("{}/{pattern}", base_dir.display());
    let mut files: Vec<PathBuf> = glob::glob(&full_pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_reports_matches_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("unit/nested")).unwrap();
        fs::write(dir.path().join("unit/results.xml"), "<testsuite/>").unwrap();
        fs::write(dir.path().join("unit/nested/more.xml"), "<testsuite/>").unwrap();
        fs::write(dir.path().join("unit/readme.txt"), "not a report").unwrap();

        let reports = discover_reports(dir.path(), "**/*.xml").unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|path| path.extension().unwrap() == "xml"));
    }

    #[test]
    fn test_discover_reports_empty_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), "no reports here").unwrap();

        let reports = discover_reports(dir.path(), "**/*.xml").unwrap();

        assert!(reports.is_empty());
    }
}
