// src/openstack/mod.rs

//! OpenStack target
//!
//! Images live in Glance; consumers are Nova servers booted from an image.
//! A single Keystone session is shared by all regions and renewed shortly
//! before the token expires.

pub mod auth;
pub mod glance;
pub mod nova;

pub use auth::{Credentials, Session};

use crate::error::{Error, Result};
use crate::target::{ImageQuery, ImageService, ImageSpec, ImageUpdate, TargetCloud, TargetRecord};
use chrono::Utc;
use glance::GlanceClient;
use nova::NovaClient;
use reqwest::blocking::Client;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Timeout for establishing connections; request bodies may stream for long
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenStack cloud reached through Keystone
pub struct OpenStackCloud {
    http: Client,
    credentials: Credentials,
    session: Mutex<Option<Session>>,
}

impl OpenStackCloud {
    /// Build from the `OS_*` environment
    pub fn from_env() -> Result<Self> {
        Self::new(Credentials::from_env()?)
    }

    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            credentials,
            session: Mutex::new(None),
        })
    }

    /// Run `f` against a valid session, authenticating first if needed
    fn with_session<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| Error::PublishError("Keystone session lock poisoned".to_string()))?;
        let stale = guard.as_ref().is_none_or(|s| s.is_expiring(Utc::now()));
        if stale {
            debug!("Keystone token missing or expiring, authenticating");
            *guard = Some(auth::authenticate(&self.http, &self.credentials)?);
        }
        match guard.as_ref() {
            Some(session) => f(session),
            None => Err(Error::PublishError("No Keystone session".to_string())),
        }
    }

    fn token(&self) -> Result<String> {
        self.with_session(|s| Ok(s.token.clone()))
    }
}

impl TargetCloud for OpenStackCloud {
    fn region(&self, region: &str) -> Result<Box<dyn ImageService + '_>> {
        let interface = self.credentials.interface.as_str();
        let (image, compute) = self.with_session(|s| {
            Ok((
                s.endpoint("image", region, interface)?,
                s.endpoint("compute", region, interface)?,
            ))
        })?;
        debug!("Region {}: image at {}, compute at {}", region, image, compute);
        Ok(Box::new(RegionClient {
            cloud: self,
            glance: GlanceClient::new(self.http.clone(), image),
            nova: NovaClient::new(self.http.clone(), compute),
        }))
    }
}

/// Glance and Nova of one region
struct RegionClient<'a> {
    cloud: &'a OpenStackCloud,
    glance: GlanceClient,
    nova: NovaClient,
}

impl ImageService for RegionClient<'_> {
    fn list_images(&self, query: &ImageQuery) -> Result<Vec<TargetRecord>> {
        self.glance.list(&self.cloud.token()?, query)
    }

    fn create_image(&self, spec: &ImageSpec) -> Result<TargetRecord> {
        self.glance.create(&self.cloud.token()?, spec)
    }

    fn upload_image(&self, id: &str, artifact: &Path) -> Result<()> {
        self.glance.upload(&self.cloud.token()?, id, artifact)
    }

    fn import_image(&self, id: &str, artifact: &Path, target_format: &str) -> Result<()> {
        self.glance.import(&self.cloud.token()?, id, artifact, target_format)
    }

    fn update_image(&self, id: &str, update: &ImageUpdate) -> Result<()> {
        self.glance.update(&self.cloud.token()?, id, update)
    }

    fn delete_image(&self, id: &str) -> Result<()> {
        self.glance.delete(&self.cloud.token()?, id)
    }

    fn count_consumers(&self, id: &str) -> Result<usize> {
        self.nova.count_servers_using(&self.cloud.token()?, id)
    }
}
