// src/openstack/glance.rs

//! Glance v2 image API

use crate::config::Visibility;
use crate::error::{Error, Result};
use crate::target::{ImageQuery, ImageSpec, ImageUpdate, TargetRecord};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for metadata calls (uploads are unbounded)
const API_TIMEOUT: Duration = Duration::from_secs(60);

/// Page size of image listings
const PAGE_SIZE: usize = 100;

const JSON_PATCH: &str = "application/openstack-images-v2.1-json-patch";

/// Image fields that are not free-form properties
const CORE_FIELDS: &[&str] = &[
    "id",
    "name",
    "visibility",
    "status",
    "tags",
    "locations",
    "direct_url",
    "file",
    "schema",
    "self",
    "checksum",
    "os_hash_algo",
    "os_hash_value",
    "size",
    "virtual_size",
    "min_disk",
    "min_ram",
    "owner",
    "protected",
    "os_hidden",
    "created_at",
    "updated_at",
    "stores",
];

/// Glance endpoint of one region
pub struct GlanceClient {
    http: Client,
    endpoint: Url,
}

impl GlanceClient {
    pub fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| Error::PublishError(format!("Invalid Glance path '{path}': {e}")))
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .map_err(|e| Error::PublishError(format!("Glance {what} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(Error::PublishError(format!(
                "Glance {what} failed: HTTP {status}: {}",
                detail.trim()
            )));
        }
        Ok(response)
    }

    fn json(response: Response, what: &str) -> Result<Value> {
        response
            .json()
            .map_err(|e| Error::PublishError(format!("Malformed Glance {what} response: {e}")))
    }

    pub fn list(&self, token: &str, query: &ImageQuery) -> Result<Vec<TargetRecord>> {
        let mut url = self.url("v2/images")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &PAGE_SIZE.to_string());
            pairs.append_pair(crate::target::props::CLOUD, &query.cloud_name);
            if let Some(content_id) = &query.content_id {
                pairs.append_pair(crate::target::props::CONTENT_ID, content_id);
            }
        }

        let mut records = Vec::new();
        let mut next = Some(url);
        while let Some(page) = next.take() {
            let request = self.http.get(page).header("X-Auth-Token", token).timeout(API_TIMEOUT);
            let body = Self::json(self.send(request, "image list")?, "image list")?;
            for image in body.get("images").and_then(Value::as_array).into_iter().flatten() {
                match record_from_json(image) {
                    Ok(record) if query.matches(&record) => records.push(record),
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable image entry: {}", e),
                }
            }
            // `next` is a path relative to the endpoint root
            next = match body.get("next").and_then(Value::as_str) {
                Some(link) => Some(self.url(link.trim_start_matches('/'))?),
                None => None,
            };
        }
        debug!("Glance lists {} matching image(s)", records.len());
        Ok(records)
    }

    pub fn create(&self, token: &str, spec: &ImageSpec) -> Result<TargetRecord> {
        let request = self
            .http
            .post(self.url("v2/images")?)
            .header("X-Auth-Token", token)
            .timeout(API_TIMEOUT)
            .json(&create_body(spec));
        let body = Self::json(self.send(request, "image create")?, "image create")?;
        let record = record_from_json(&body)?;
        info!("Created Glance image {} ({})", record.id, record.name);
        Ok(record)
    }

    fn put_data(&self, token: &str, id: &str, suffix: &str, artifact: &Path) -> Result<()> {
        let file = File::open(artifact)?;
        let length = file.metadata()?.len();
        let request = self
            .http
            .put(self.url(&format!("v2/images/{id}/{suffix}"))?)
            .header("X-Auth-Token", token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::sized(file, length));
        self.send(request, &format!("image {suffix}"))?;
        Ok(())
    }

    pub fn upload(&self, token: &str, id: &str, artifact: &Path) -> Result<()> {
        self.put_data(token, id, "file", artifact)
    }

    /// Stage the data and run the `glance-direct` import
    ///
    /// Conversion itself is done by Glance's image conversion plugin, whose
    /// configured output format has to match `target_format`.
    pub fn import(&self, token: &str, id: &str, artifact: &Path, target_format: &str) -> Result<()> {
        self.put_data(token, id, "stage", artifact)?;
        let request = self
            .http
            .post(self.url(&format!("v2/images/{id}/import"))?)
            .header("X-Auth-Token", token)
            .timeout(API_TIMEOUT)
            .json(&json!({ "method": { "name": "glance-direct" } }));
        self.send(request, "image import")?;
        info!("Requested import of image {} as {}", id, target_format);
        Ok(())
    }

    pub fn update(&self, token: &str, id: &str, update: &ImageUpdate) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!("v2/images/{id}"))?)
            .header("X-Auth-Token", token)
            .header(reqwest::header::CONTENT_TYPE, JSON_PATCH)
            .timeout(API_TIMEOUT)
            .body(patch_body(update).to_string());
        self.send(request, "image update")?;
        Ok(())
    }

    pub fn delete(&self, token: &str, id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("v2/images/{id}"))?)
            .header("X-Auth-Token", token)
            .timeout(API_TIMEOUT);
        self.send(request, "image delete")?;
        info!("Deleted Glance image {}", id);
        Ok(())
    }
}

/// Convert a Glance image object into a record
pub fn record_from_json(image: &Value) -> Result<TargetRecord> {
    let object = image
        .as_object()
        .ok_or_else(|| Error::PublishError("image entry is not an object".to_string()))?;
    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

    let id = text("id").ok_or_else(|| Error::PublishError("image entry has no id".to_string()))?;
    let visibility = match text("visibility") {
        Some(v) => v
            .parse::<Visibility>()
            .map_err(|_| Error::PublishError(format!("image {id}: unknown visibility '{v}'")))?,
        None => Visibility::default(),
    };

    let properties: BTreeMap<String, String> = object
        .iter()
        .filter(|(key, _)| !CORE_FIELDS.contains(&key.as_str()))
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect();

    Ok(TargetRecord {
        name: text("name").unwrap_or_default(),
        id,
        visibility,
        properties,
    })
}

fn create_body(spec: &ImageSpec) -> Value {
    let mut body = Map::new();
    for (key, value) in &spec.properties {
        body.insert(key.clone(), Value::String(value.clone()));
    }
    body.insert("name".to_string(), Value::String(spec.name.clone()));
    body.insert("visibility".to_string(), Value::String(spec.visibility.to_string()));
    body.insert("disk_format".to_string(), Value::String(spec.disk_format.clone()));
    body.insert("container_format".to_string(), Value::String(spec.container_format.clone()));
    Value::Object(body)
}

/// Escape a property name for use in a JSON pointer
fn pointer(key: &str) -> String {
    format!("/{}", key.replace('~', "~0").replace('/', "~1"))
}

/// JSON-patch document for an update
pub fn patch_body(update: &ImageUpdate) -> Value {
    let mut ops = Vec::new();
    for (key, value) in &update.set {
        ops.push(json!({ "op": "add", "path": pointer(key), "value": value }));
    }
    for key in &update.remove {
        ops.push(json!({ "op": "remove", "path": pointer(key) }));
    }
    if let Some(visibility) = update.visibility {
        ops.push(json!({ "op": "replace", "path": "/visibility", "value": visibility.to_string() }));
    }
    if let Some(name) = &update.name {
        ops.push(json!({ "op": "replace", "path": "/name", "value": name }));
    }
    Value::Array(ops)
}
