// src/openstack/nova.rs

//! Nova server lookups (image consumers)
//!
//! Server listings are paged; the `servers_links` entry with `rel = next`
//! points at the following page and is absent on the last one.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const API_TIMEOUT: Duration = Duration::from_secs(60);

/// Compute endpoint of one region
pub struct NovaClient {
    http: Client,
    endpoint: Url,
}

impl NovaClient {
    pub fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// Resolve an absolute or endpoint-relative link
    fn resolve(&self, link: &str) -> Result<Url> {
        Url::parse(link)
            .or_else(|_| self.endpoint.join(link))
            .map_err(|e| Error::PublishError(format!("Invalid Nova link '{link}': {e}")))
    }

    fn get_page(&self, token: &str, url: Url) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .header("X-Auth-Token", token)
            .timeout(API_TIMEOUT)
            .send()
            .map_err(|e| Error::PublishError(format!("Nova server list failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::PublishError(format!("Nova server list failed: HTTP {status}")));
        }
        response
            .json()
            .map_err(|e| Error::PublishError(format!("Malformed Nova response: {e}")))
    }

    /// Number of servers, across all projects, booted from `image_id`
    pub fn count_servers_using(&self, token: &str, image_id: &str) -> Result<usize> {
        let mut url = self.resolve("servers")?;
        url.query_pairs_mut()
            .append_pair("all_tenants", "1")
            .append_pair("image", image_id);

        let mut count = 0;
        let mut next = Some(url);
        while let Some(page) = next.take() {
            let body = self.get_page(token, page)?;
            count += count_servers(&body)?;
            next = match next_link(&body) {
                Some(link) => Some(self.resolve(link)?),
                None => None,
            };
        }
        debug!("{} server(s) use image {}", count, image_id);
        Ok(count)
    }
}

fn count_servers(body: &Value) -> Result<usize> {
    body.get("servers")
        .and_then(Value::as_array)
        .map(Vec::len)
        .ok_or_else(|| Error::PublishError("Nova response has no server list".to_string()))
}

/// Link to the next page of a server listing
fn next_link(body: &Value) -> Option<&str> {
    body.get("servers_links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))?
        .get("href")?
        .as_str()
}
