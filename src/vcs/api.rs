//! Per-provider strategy tables for the VCS adapter.
//!
//! Pure functions only: endpoint shapes, payload encodings, headers, and
//! response parsers per provider. Adding a provider touches this file and
//! the `Provider` enum, nothing else.

use serde_json::{json, Value};

use crate::config::ProviderCredentials;
use crate::vcs::{Provider, TokenPair, VcsError};

// ─── OAuth token exchange ────────────────────────────────────────────────────

pub fn token_endpoint(provider: Provider) -> &'static str {
    match provider {
        Provider::GitHub => "https://github.com/login/oauth/access_token",
        Provider::Bitbucket => "https://bitbucket.org/site/oauth2/access_token",
    }
}

pub fn token_exchange_payload(
    provider: Provider,
    creds: &ProviderCredentials,
    code: &str,
) -> Vec<(&'static str, String)> {
    match provider {
        Provider::GitHub => vec![
            ("client_id", creds.client_id.clone()),
            ("client_secret", creds.client_secret.clone()),
            ("code", code.to_string()),
        ],
        Provider::Bitbucket => vec![
            ("grant_type", "authorization_code".to_string()),
            ("client_id", creds.client_id.clone()),
            ("client_secret", creds.client_secret.clone()),
            ("code", code.to_string()),
        ],
    }
}

/// Parse a token response body.
///
/// GitHub answers with a form-urlencoded string and issues no refresh token
/// (explicit `None`); Bitbucket answers with JSON carrying both tokens.
pub fn parse_token_response(provider: Provider, body: &str) -> Result<TokenPair, VcsError> {
    match provider {
        Provider::GitHub => {
            let access_token = body
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "access_token")
                .map(|(_, value)| value.to_string())
                .ok_or(VcsError::MalformedResponse("access_token"))?;
            Ok(TokenPair {
                access_token,
                refresh_token: None,
            })
        }
        Provider::Bitbucket => {
            let parsed: Value = serde_json::from_str(body)
                .map_err(|_| VcsError::MalformedResponse("access_token"))?;
            let access_token = parsed["access_token"]
                .as_str()
                .ok_or(VcsError::MalformedResponse("access_token"))?
                .to_string();
            let refresh_token = parsed["refresh_token"]
                .as_str()
                .ok_or(VcsError::MalformedResponse("refresh_token"))?
                .to_string();
            Ok(TokenPair {
                access_token,
                refresh_token: Some(refresh_token),
            })
        }
    }
}

// ─── OAuth token refresh ─────────────────────────────────────────────────────

/// GitHub OAuth apps issue non-expiring tokens — there is nothing to refresh.
pub fn refresh_endpoint(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::GitHub => None,
        Provider::Bitbucket => Some("https://bitbucket.org/site/oauth2/access_token"),
    }
}

pub fn refresh_payload(
    provider: Provider,
    creds: &ProviderCredentials,
    refresh_token: &str,
) -> Option<Vec<(&'static str, String)>> {
    match provider {
        Provider::GitHub => None,
        Provider::Bitbucket => Some(vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", creds.client_id.clone()),
            ("client_secret", creds.client_secret.clone()),
            ("refresh_token", refresh_token.to_string()),
        ]),
    }
}

// ─── OAuth token revocation ──────────────────────────────────────────────────

/// Bitbucket exposes no revocation endpoint — revoke is a no-op there.
pub fn revoke_endpoint(provider: Provider, creds: &ProviderCredentials) -> Option<String> {
    match provider {
        Provider::GitHub => Some(format!(
            "https://api.github.com/applications/{}/grant",
            creds.client_id
        )),
        Provider::Bitbucket => None,
    }
}

pub fn revoke_uses_basic_auth(provider: Provider) -> bool {
    matches!(provider, Provider::GitHub)
}

pub fn revoke_payload(provider: Provider, access_token: &str) -> Option<Value> {
    match provider {
        Provider::GitHub => Some(json!({ "access_token": access_token })),
        Provider::Bitbucket => None,
    }
}

// ─── Repository webhooks ─────────────────────────────────────────────────────

pub fn webhook_registration_endpoint(
    provider: Provider,
    account_name: &str,
    repo_name: &str,
) -> String {
    match provider {
        Provider::GitHub => {
            format!("https://api.github.com/repos/{account_name}/{repo_name}/hooks")
        }
        Provider::Bitbucket => {
            format!("https://api.bitbucket.org/2.0/repositories/{account_name}/{repo_name}/hooks")
        }
    }
}

pub fn webhook_registration_payload(provider: Provider, callback_url: &str) -> Value {
    match provider {
        Provider::GitHub => json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": callback_url,
                "content_type": "json",
                "insecure_ssl": "0",
            }
        }),
        Provider::Bitbucket => json!({
            "description": "specwatch push events",
            "url": callback_url,
            "active": true,
            "events": ["repo:push"],
        }),
    }
}

pub fn webhook_deletion_endpoint(
    provider: Provider,
    account_name: &str,
    repo_name: &str,
    webhook_id: &str,
) -> String {
    format!(
        "{}/{webhook_id}",
        webhook_registration_endpoint(provider, account_name, repo_name)
    )
}

/// Extract the webhook id from a registration response. GitHub returns a
/// numeric `id`; Bitbucket returns a brace-wrapped `uuid`.
pub fn parse_webhook_registration_response(
    provider: Provider,
    body: &Value,
) -> Result<String, VcsError> {
    match provider {
        Provider::GitHub => body["id"]
            .as_i64()
            .map(|id| id.to_string())
            .ok_or(VcsError::MalformedResponse("id")),
        Provider::Bitbucket => body["uuid"]
            .as_str()
            .map(|uuid| uuid.trim_matches(|c| c == '{' || c == '}').to_string())
            .ok_or(VcsError::MalformedResponse("uuid")),
    }
}
