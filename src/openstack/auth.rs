// src/openstack/auth.rs

//! Keystone v3 password authentication
//!
//! Credentials come from the standard `OS_*` environment variables that
//! `openstack` CLI users already have in their `openrc` files.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

/// Re-authenticate when the token expires within this window
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Password credentials for Keystone v3
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub user_domain_name: String,
    pub project_domain_name: String,
    /// Endpoint interface to use (`public`, `internal`, `admin`)
    pub interface: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("interface", &self.interface)
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read credentials from `OS_*` variables
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with("OS_"))
            .collect();
        let required = |name: &str| {
            vars.get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| Error::ConfigError(format!("{name} is not set")))
        };
        let optional = |name: &str, default: &str| {
            vars.get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let auth_url = required("OS_AUTH_URL")?;
        let username = required("OS_USERNAME")?;
        let password = required("OS_PASSWORD")?;
        let project_name = match vars.get("OS_PROJECT_NAME").filter(|v| !v.is_empty()) {
            Some(name) => name.clone(),
            None => required("OS_TENANT_NAME")?,
        };
        Ok(Self {
            auth_url,
            username,
            password,
            project_name,
            user_domain_name: optional("OS_USER_DOMAIN_NAME", "Default"),
            project_domain_name: optional("OS_PROJECT_DOMAIN_NAME", "Default"),
            interface: optional("OS_INTERFACE", "public"),
        })
    }

    /// Token endpoint, appending `/v3` when the URL is unversioned
    pub fn tokens_url(&self) -> Result<Url> {
        let base = self.auth_url.trim_end_matches('/');
        let versioned = if base.ends_with("/v3") {
            base.to_string()
        } else {
            format!("{base}/v3")
        };
        Url::parse(&format!("{versioned}/auth/tokens"))
            .map_err(|e| Error::ConfigError(format!("Invalid OS_AUTH_URL '{}': {e}", self.auth_url)))
    }

    fn request_body(&self) -> serde_json::Value {
        json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.username,
                            "domain": { "name": self.user_domain_name },
                            "password": self.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.project_name,
                        "domain": { "name": self.project_domain_name },
                    }
                }
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenBody {
    expires_at: DateTime<Utc>,
    #[serde(default)]
    catalog: Vec<CatalogService>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogService {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

/// Scoped token with its service catalog
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    catalog: Vec<CatalogService>,
}

impl Session {
    fn from_response(token: String, body: &str) -> Result<Self> {
        let parsed: TokenResponse = serde_json::from_str(body)
            .map_err(|e| Error::PublishError(format!("Malformed Keystone token response: {e}")))?;
        Ok(Self {
            token,
            expires_at: parsed.token.expires_at,
            catalog: parsed.token.catalog,
        })
    }

    /// Whether the token is expired or about to be
    pub fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) <= now
    }

    /// Endpoint URL of a service in a region
    pub fn endpoint(&self, service_type: &str, region: &str, interface: &str) -> Result<Url> {
        let endpoint = self
            .catalog
            .iter()
            .filter(|s| s.service_type == service_type)
            .flat_map(|s| &s.endpoints)
            .find(|e| {
                e.interface == interface
                    && (e.region_id.as_deref() == Some(region) || e.region.as_deref() == Some(region))
            })
            .ok_or_else(|| {
                Error::PublishError(format!(
                    "No {interface} {service_type} endpoint for region {region}"
                ))
            })?;
        let normalized = format!("{}/", endpoint.url.trim_end_matches('/'));
        Url::parse(&normalized)
            .map_err(|e| Error::PublishError(format!("Invalid endpoint '{}': {e}", endpoint.url)))
    }
}

/// Obtain a project-scoped token
pub fn authenticate(client: &Client, credentials: &Credentials) -> Result<Session> {
    let url = credentials.tokens_url()?;
    debug!("Authenticating as {} against {}", credentials.username, url);

    let response = client
        .post(url.clone())
        .json(&credentials.request_body())
        .send()
        .map_err(|e| Error::PublishError(format!("Keystone request to {url} failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::PublishError(format!("Keystone authentication failed: HTTP {status}")));
    }
    let token = response
        .headers()
        .get("X-Subject-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::PublishError("Keystone response has no X-Subject-Token".to_string()))?;
    let body = response
        .text()
        .map_err(|e| Error::PublishError(format!("Failed to read Keystone response: {e}")))?;

    let session = Session::from_response(token, &body)?;
    info!(
        "Authenticated to {} as {} (token expires {})",
        credentials.auth_url,
        credentials.username,
        session.expires_at.to_rfc3339()
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const TOKEN: &str = r#"{
        "token": {
            "expires_at": "2024-01-01T12:00:00.000000Z",
            "catalog": [
                {"type": "image", "name": "glance", "endpoints": [
                    {"interface": "public", "region_id": "RegionOne", "region": "RegionOne", "url": "https://glance.one:9292"},
                    {"interface": "internal", "region_id": "RegionOne", "url": "http://glance.internal:9292"},
                    {"interface": "public", "region_id": "RegionTwo", "url": "https://glance.two:9292/"}
                ]},
                {"type": "compute", "name": "nova", "endpoints": [
                    {"interface": "public", "region_id": "RegionOne", "url": "https://nova.one/v2.1"}
                ]}
            ]
        }
    }"#;

    #[test]
    fn test_credentials_from_vars() {
        let creds = Credentials::from_vars(vars(&[
            ("OS_AUTH_URL", "https://keystone:5000"),
            ("OS_USERNAME", "admin"),
            ("OS_PASSWORD", "secret"),
            ("OS_PROJECT_NAME", "admin"),
            ("HOME", "/root"),
        ]))
        .unwrap();
        assert_eq!(creds.user_domain_name, "Default");
        assert_eq!(creds.interface, "public");
        assert_eq!(creds.tokens_url().unwrap().as_str(), "https://keystone:5000/v3/auth/tokens");
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[test]
    fn test_missing_credentials() {
        let err = Credentials::from_vars(vars(&[("OS_AUTH_URL", "https://keystone/v3")])).unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains("OS_USERNAME")));
    }

    #[test]
    fn test_versioned_auth_url() {
        let creds = Credentials::from_vars(vars(&[
            ("OS_AUTH_URL", "https://keystone/identity/v3/"),
            ("OS_USERNAME", "u"),
            ("OS_PASSWORD", "p"),
            ("OS_TENANT_NAME", "t"),
        ]))
        .unwrap();
        assert_eq!(creds.project_name, "t");
        assert_eq!(creds.tokens_url().unwrap().as_str(), "https://keystone/identity/v3/auth/tokens");
    }

    #[test]
    fn test_endpoint_lookup() {
        let session = Session::from_response("tok".to_string(), TOKEN).unwrap();
        assert_eq!(
            session.endpoint("image", "RegionOne", "public").unwrap().as_str(),
            "https://glance.one:9292/"
        );
        assert_eq!(
            session.endpoint("image", "RegionOne", "internal").unwrap().as_str(),
            "http://glance.internal:9292/"
        );
        assert_eq!(
            session.endpoint("compute", "RegionOne", "public").unwrap().as_str(),
            "https://nova.one/v2.1/"
        );
        assert!(session.endpoint("compute", "RegionTwo", "public").is_err());
    }

    #[test]
    fn test_token_expiry() {
        let session = Session::from_response("tok".to_string(), TOKEN).unwrap();
        let early = DateTime::parse_from_rfc3339("2024-01-01T11:00:00Z").unwrap().with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2024-01-01T11:58:00Z").unwrap().with_timezone(&Utc);
        assert!(!session.is_expiring(early));
        assert!(session.is_expiring(late));
    }
}
