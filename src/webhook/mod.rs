//! Push-event webhook router.
//!
//! Resolves an inbound repository-push notification to a tracked project and
//! records commit provenance on the project's open change record. The next
//! detection cycle completes (or discards) that record.
//!
//! Every failure mode — unknown provider, missing payload fields, no matching
//! account or project, store errors — swallows the event: webhook senders
//! must always see success, or the provider disables the hook.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::storage::Storage;
use crate::vcs::Provider;

/// Which external commits presumably triggered a spec change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitProvenance {
    pub pushed_by: String,
    pub timestamp: String,
    pub commit_urls: Vec<String>,
}

/// A fully parsed push event, ready for the store lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub provider: Provider,
    pub account_name: String,
    pub repo_name: String,
    pub branch: String,
    pub provenance: CommitProvenance,
}

/// Handle one inbound webhook request. Infallible by contract: the ingress
/// layer acknowledges the sender no matter what happened here.
pub async fn handle_push_event(storage: &Storage, agent_header: &str, payload: &Value) {
    let Some(provider) = Provider::from_webhook_agent(agent_header) else {
        debug!(agent = agent_header, "webhook from unrecognized provider — ignored");
        return;
    };

    let Some(event) = parse_event(provider, payload, &Utc::now().to_rfc3339()) else {
        debug!(provider = provider.code(), "webhook payload missing expected fields — ignored");
        return;
    };

    if let Err(e) = record_event(storage, &event).await {
        warn!(error = %e, "failed to record webhook provenance — event dropped");
    }
}

/// Extract the event fields along provider-specific payload paths.
/// Any missing field makes the whole event unusable.
pub fn parse_event(provider: Provider, payload: &Value, timestamp: &str) -> Option<PushEvent> {
    let (account_name, branch, pushed_by, commit_urls) = match provider {
        Provider::GitHub => {
            let account = payload["repository"]["owner"]["name"].as_str()?;
            let branch = payload["ref"].as_str()?.rsplit('/').next()?;
            let pushed_by = payload["pusher"]["name"].as_str()?;
            let urls = payload["commits"]
                .as_array()?
                .iter()
                .map(|commit| commit["url"].as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()?;
            (account, branch, pushed_by, urls)
        }
        Provider::Bitbucket => {
            let account = payload["repository"]["full_name"].as_str()?.split('/').next()?;
            let change = &payload["push"]["changes"][0];
            let branch = change["new"]["name"].as_str()?;
            let pushed_by = payload["actor"]["display_name"].as_str()?;
            let urls = change["commits"]
                .as_array()?
                .iter()
                .map(|commit| commit["links"]["html"]["href"].as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()?;
            (account, branch, pushed_by, urls)
        }
    };

    Some(PushEvent {
        provider,
        account_name: account_name.to_string(),
        repo_name: payload["repository"]["name"].as_str()?.to_string(),
        branch: branch.to_string(),
        provenance: CommitProvenance {
            pushed_by: pushed_by.to_string(),
            timestamp: timestamp.to_string(),
            commit_urls,
        },
    })
}

/// Look up the account and project, then append provenance to the open
/// record. No row lock: the store's atomic get-or-create is the only
/// synchronization with detection cycles, so overlapping bursts for one
/// project may lose an append.
async fn record_event(storage: &Storage, event: &PushEvent) -> anyhow::Result<()> {
    let Some(account_id) = storage
        .find_account_id(&event.account_name, event.provider.code())
        .await?
    else {
        debug!(account = %event.account_name, "webhook for unknown account — ignored");
        return Ok(());
    };

    let Some(project_id) = storage
        .find_project_id(&account_id, &event.repo_name, &event.branch)
        .await?
    else {
        debug!(repo = %event.repo_name, branch = %event.branch, "webhook for untracked repo/branch — ignored");
        return Ok(());
    };

    let record = storage.get_or_create_open_record(&project_id).await?;
    let mut provenance: Vec<CommitProvenance> =
        serde_json::from_str(&record.provenance).unwrap_or_default();
    provenance.push(event.provenance.clone());
    storage
        .update_record_provenance(&record.id, &serde_json::to_string(&provenance)?)
        .await?;

    debug!(project = %project_id, "webhook provenance recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn github_payload() -> Value {
        json!({
            "ref": "refs/heads/main",
            "repository": {"name": "petstore-api", "owner": {"name": "acme"}},
            "pusher": {"name": "jdoe"},
            "commits": [
                {"url": "https://github.com/acme/petstore-api/commit/aaa"},
                {"url": "https://github.com/acme/petstore-api/commit/bbb"}
            ]
        })
    }

    fn bitbucket_payload() -> Value {
        json!({
            "repository": {"name": "petstore-api", "full_name": "acme/petstore-api"},
            "actor": {"display_name": "J. Doe"},
            "push": {"changes": [{
                "new": {"name": "main"},
                "commits": [
                    {"links": {"html": {"href": "https://bitbucket.org/acme/petstore-api/commits/ccc"}}}
                ]
            }]}
        })
    }

    #[test]
    fn github_event_fields_are_extracted() {
        let event = parse_event(Provider::GitHub, &github_payload(), "t0").unwrap();
        assert_eq!(event.account_name, "acme");
        assert_eq!(event.repo_name, "petstore-api");
        assert_eq!(event.branch, "main");
        assert_eq!(event.provenance.pushed_by, "jdoe");
        assert_eq!(event.provenance.timestamp, "t0");
        assert_eq!(event.provenance.commit_urls.len(), 2);
    }

    #[test]
    fn bitbucket_event_fields_are_extracted() {
        let event = parse_event(Provider::Bitbucket, &bitbucket_payload(), "t0").unwrap();
        assert_eq!(event.account_name, "acme");
        assert_eq!(event.branch, "main");
        assert_eq!(event.provenance.pushed_by, "J. Doe");
        assert_eq!(
            event.provenance.commit_urls,
            vec!["https://bitbucket.org/acme/petstore-api/commits/ccc"]
        );
    }

    #[test]
    fn branch_is_the_last_ref_segment() {
        let mut payload = github_payload();
        payload["ref"] = json!("refs/heads/feature/new-endpoints");
        let event = parse_event(Provider::GitHub, &payload, "t0").unwrap();
        assert_eq!(event.branch, "new-endpoints");
    }

    #[test]
    fn missing_field_invalidates_the_whole_event() {
        let mut payload = github_payload();
        payload["pusher"] = json!({});
        assert_eq!(parse_event(Provider::GitHub, &payload, "t0"), None);

        let mut payload = github_payload();
        payload["commits"][1] = json!({"sha": "bbb"});
        assert_eq!(parse_event(Provider::GitHub, &payload, "t0"), None);
    }

    #[test]
    fn wrong_provider_shape_is_rejected() {
        // A Bitbucket-shaped payload parsed along GitHub paths has no usable fields.
        assert_eq!(parse_event(Provider::GitHub, &bitbucket_payload(), "t0"), None);
    }
}
