use chrono::{DateTime, Utc};
use log::info;

use crate::error::{RelayError, Result};
use crate::event::{EventPullRequest, WorkflowEventData};
use crate::github::types::Commit;
use crate::github::GitHubClient;
use crate::tracker::events::{
    PullRequestData, PullRequestState, ScmChangeType, ScmCommit, ScmCommitChange, ScmData,
    ScmRepository,
};
use crate::tracker::TrackerClient;

/// Collect the commit delta on the event's branch since `since`.
///
/// Returns `None` when no commit falls inside the window; the caller must
/// not emit an SCM event in that case.
pub async fn collect_scm_data(
    github: &GitHubClient,
    data: &WorkflowEventData,
    since: DateTime<Utc>,
) -> Result<Option<ScmData>> {
    let branch = data.head_branch.as_deref().unwrap_or_default();

    let commit_shas = github.get_commit_ids(branch, since).await?;

    let mut commits = Vec::with_capacity(commit_shas.len());
    for commit_sha in &commit_shas {
        commits.push(github.get_commit(commit_sha).await?);
    }

    if commits.is_empty() {
        return Ok(None);
    }

    let repo_url = data
        .repo_html_url
        .as_deref()
        .ok_or(RelayError::MissingRequiredField("repository.html_url"))?;

    Ok(Some(ScmData {
        repository: tree_repository(repo_url, branch),
        commits: map_commits(&commits)?,
    }))
}

/// Translate and submit one pull-request snapshot.
pub async fn send_pull_request_data(
    github: &GitHubClient,
    tracker: &TrackerClient,
    pull_request: &EventPullRequest,
    repo_url: &str,
) -> Result<()> {
    let source_branch = pull_request
        .head
        .as_ref()
        .map(|head| head.git_ref.as_str())
        .unwrap_or_default();
    let target_branch = pull_request
        .base
        .as_ref()
        .map(|base| base.git_ref.as_str())
        .unwrap_or_default();

    let merged = pull_request.merged.unwrap_or(false);
    let state = pr_state(pull_request.state.as_deref(), merged);

    let mut data = PullRequestData {
        id: pull_request.number.to_string(),
        author_name: pull_request
            .user
            .as_ref()
            .map(|user| user.login.clone())
            .unwrap_or_default(),
        author_email: pull_request
            .user
            .as_ref()
            .and_then(|user| user.email.clone())
            .unwrap_or_default(),
        title: pull_request.title.clone().unwrap_or_default(),
        description: pull_request.body.clone().unwrap_or_default(),
        created_time: pull_request
            .created_at
            .map(|time| time.timestamp_millis())
            .unwrap_or_default(),
        updated_time: pull_request
            .updated_at
            .map(|time| time.timestamp_millis())
            .unwrap_or_default(),
        merged,
        self_url: pull_request.html_url.clone().unwrap_or_default(),
        state,
        source_repository: tree_repository(repo_url, source_branch),
        target_repository: tree_repository(repo_url, target_branch),
        commits: vec![],
        merged_time: None,
        closed_time: None,
    };

    if data.merged {
        data.merged_time = pull_request.merged_at.map(|time| time.timestamp_millis());
    }
    if matches!(state, PullRequestState::Merged | PullRequestState::Closed) {
        data.closed_time = pull_request.closed_at.map(|time| time.timestamp_millis());
    }

    let commit_shas = github
        .get_pull_request_commit_ids(pull_request.number)
        .await?;
    let mut commits = Vec::with_capacity(commit_shas.len());
    for commit_sha in &commit_shas {
        commits.push(github.get_commit(commit_sha).await?);
    }
    data.commits = map_commits(&commits)?;

    info!("Sending pull request #{} data...", pull_request.number);
    tracker.send_pull_requests(&[data]).await
}

fn tree_repository(repo_url: &str, branch: &str) -> ScmRepository {
    ScmRepository {
        url: format!("{repo_url}\\tree\\{branch}"),
        branch: branch.to_string(),
        repository_type: "git".to_string(),
    }
}

fn pr_state(state: Option<&str>, merged: bool) -> PullRequestState {
    match state {
        Some("closed") if merged => PullRequestState::Merged,
        Some("closed") => PullRequestState::Closed,
        _ => PullRequestState::Open,
    }
}

fn map_commits(commits: &[Commit]) -> Result<Vec<ScmCommit>> {
    commits.iter().map(map_commit).collect()
}

fn map_commit(commit: &Commit) -> Result<ScmCommit> {
    let author = commit
        .commit
        .author
        .as_ref()
        .ok_or(RelayError::MissingRequiredField("commit.author"))?;

    let mut changes = Vec::with_capacity(commit.files.len());
    for file_change in &commit.files {
        let mut change = ScmCommitChange {
            file: file_change.filename.clone(),
            change_type: map_change_type(&file_change.status),
            rename_to_file: None,
        };

        if file_change.status == "renamed" {
            change.rename_to_file = Some(file_change.filename.clone());
            change.file = file_change.previous_filename.clone().unwrap_or_default();
        }

        changes.push(change);
    }

    Ok(ScmCommit {
        rev_id: commit.sha.clone(),
        user: author.name.clone().unwrap_or_default(),
        user_email: author.email.clone(),
        time: author
            .date
            .map(|date| date.timestamp_millis())
            .unwrap_or_default(),
        comment: commit.commit.message.clone(),
        changes,
    })
}

fn map_change_type(status: &str) -> ScmChangeType {
    match status {
        "added" => ScmChangeType::Add,
        "removed" => ScmChangeType::Delete,
        _ => ScmChangeType::Edit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{CommitAuthor, CommitDetail, CommitFile};

    fn commit(sha: &str, files: Vec<CommitFile>) -> Commit {
        Commit {
            sha: sha.to_string(),
            commit: CommitDetail {
                author: Some(CommitAuthor {
                    name: Some("Octo Cat".to_string()),
                    email: Some("octo@example.com".to_string()),
                    date: Some("2024-05-01T10:00:00Z".parse().unwrap()),
                }),
                message: "fix widget".to_string(),
            },
            files,
        }
    }

    fn file(name: &str, status: &str) -> CommitFile {
        CommitFile {
            filename: name.to_string(),
            status: status.to_string(),
            previous_filename: None,
        }
    }

    #[test]
    fn test_commit_mapping() {
        let mapped = map_commit(&commit(
            "abc123",
            vec![file("a.rs", "added"), file("b.rs", "removed"), file("c.rs", "modified")],
        ))
        .unwrap();

        assert_eq!(mapped.rev_id, "abc123");
        assert_eq!(mapped.user, "Octo Cat");
        assert_eq!(mapped.comment, "fix widget");
        assert_eq!(mapped.changes[0].change_type, ScmChangeType::Add);
        assert_eq!(mapped.changes[1].change_type, ScmChangeType::Delete);
        assert_eq!(mapped.changes[2].change_type, ScmChangeType::Edit);
    }

    #[test]
    fn test_rename_keeps_both_file_names() {
        let mut renamed = file("new.rs", "renamed");
        renamed.previous_filename = Some("old.rs".to_string());

        let mapped = map_commit(&commit("abc123", vec![renamed])).unwrap();

        assert_eq!(mapped.changes[0].file, "old.rs");
        assert_eq!(mapped.changes[0].rename_to_file.as_deref(), Some("new.rs"));
    }

    #[test]
    fn test_commit_without_author_fails() {
        let mut broken = commit("abc123", vec![]);
        broken.commit.author = None;

        assert!(matches!(
            map_commit(&broken),
            Err(RelayError::MissingRequiredField("commit.author"))
        ));
    }

    #[test]
    fn test_pr_state_mapping() {
        assert_eq!(pr_state(Some("open"), false), PullRequestState::Open);
        assert_eq!(pr_state(Some("closed"), false), PullRequestState::Closed);
        assert_eq!(pr_state(Some("closed"), true), PullRequestState::Merged);
        assert_eq!(pr_state(None, false), PullRequestState::Open);
    }

    #[test]
    fn test_tree_repository_url_shape() {
        let repository = tree_repository("https://github.com/acme/widgets", "main");
        assert_eq!(repository.url, "https://github.com/acme/widgets\\tree\\main");
        assert_eq!(repository.branch, "main");
        assert_eq!(repository.repository_type, "git");
    }
}
