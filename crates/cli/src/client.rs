//! Fleet API connection settings resolved from flags and the config file

use anyhow::{Context, Result};
use std::sync::Arc;
use tracker_lib::client::{AuthContext, ClientConfig, FleetApiClient};

use crate::config::Config;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_TENANT: &str = "t_demo";

/// Effective connection settings; flags win over the config file
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub api_url: String,
    pub tenant_id: String,
    pub driver_id: Option<String>,
}

impl Connection {
    pub fn resolve(
        api_url: Option<String>,
        tenant_id: Option<String>,
        driver_id: Option<String>,
        config: &Config,
    ) -> Self {
        Self {
            api_url: api_url
                .or_else(|| config.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            tenant_id: tenant_id
                .or_else(|| config.tenant_id.clone())
                .unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            driver_id: driver_id.or_else(|| config.driver_id.clone()),
        }
    }

    pub fn auth(&self) -> AuthContext {
        match &self.driver_id {
            Some(driver_id) => AuthContext::driver(&self.tenant_id, driver_id),
            None => AuthContext::dispatcher(&self.tenant_id),
        }
    }

    /// Create an API client for these settings
    pub fn client(&self) -> Result<Arc<FleetApiClient>> {
        let config = ClientConfig {
            base_url: self.api_url.clone(),
            ..Default::default()
        };
        let client = FleetApiClient::new(&config, self.auth()).context("Invalid API URL")?;
        Ok(Arc::new(client))
    }
}
