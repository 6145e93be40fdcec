//! Platform management API client
//!
//! Each instance exposes its own management endpoint once deployed. The
//! workflow connects to it per continuation (never caching a session
//! across invocations), mounts the subscribed content library, and deploys
//! the workshop VM from a library template. [`VcenterApi`] is the seam;
//! [`VcenterClient`] implements it over the platform's REST surface using
//! a session token obtained at connect time.

use crate::error::{Result, VcenterError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Management-endpoint coordinates for one instance.
#[derive(Debug, Clone)]
pub struct VcenterEndpoint {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

/// Narrow seam over the platform management API.
#[async_trait]
pub trait VcenterApi: Send + Sync {
    /// List subscribed content libraries.
    async fn list_libraries(&self) -> Result<Vec<ContentLibrary>>;

    /// Create (mount) a subscribed content library. Returns the library id.
    async fn create_library(&self, spec: &LibrarySpec) -> Result<String>;

    /// Delete (dismount) a subscribed content library.
    async fn delete_library(&self, library_id: &str) -> Result<()>;

    /// Find a deployable library item by name.
    async fn find_library_item(&self, name: &str) -> Result<Option<String>>;

    /// Deploy a library item. Returns the id of the created VM.
    async fn deploy_item(&self, item_id: &str, target: &DeployTarget) -> Result<String>;

    /// Apply guest network-identity customization to a VM.
    async fn customize_vm(&self, vm_id: &str, identity: &NetworkIdentity) -> Result<()>;

    /// Power a VM on.
    async fn power_on(&self, vm_id: &str) -> Result<()>;

    /// List inventory VMs.
    async fn list_vms(&self) -> Result<Vec<VirtualMachine>>;

    /// Resolve a datastore name to its id.
    async fn find_datastore(&self, name: &str) -> Result<Option<String>>;

    /// Resolve a resource pool name to its id.
    async fn find_resource_pool(&self, name: &str) -> Result<Option<String>>;

    /// Resolve a folder name to its id.
    async fn find_folder(&self, name: &str) -> Result<Option<String>>;
}

/// Connector producing a live [`VcenterApi`] session for an endpoint.
///
/// A fresh session per continuation keeps the step function free of
/// cross-invocation state.
#[async_trait]
pub trait VcenterConnect: Send + Sync {
    async fn connect(&self, endpoint: &VcenterEndpoint) -> Result<Arc<dyn VcenterApi>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLibrary {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub subscription_url: Option<String>,
}

/// Parameters for mounting a subscribed library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySpec {
    pub name: String,
    pub datastore_id: String,
    pub subscription_url: String,
    pub tls_thumbprint: String,

    /// Sync items on demand instead of eagerly mirroring the catalog.
    pub on_demand: bool,
}

/// Placement for a deployed library item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTarget {
    pub vm_name: String,
    pub datastore_id: String,
    pub resource_pool_id: String,
    pub folder_id: String,
}

/// Guest network identity applied after deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIdentity {
    pub hostname: String,
    pub ip_address: String,
    pub subnet_mask: String,
    pub gateway: String,
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub power_state: Option<String>,
}

/// Session-authenticated client for the platform REST API.
pub struct VcenterClient {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

const SESSION_HEADER: &str = "x-api-session-id";

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployResponse {
    succeeded: bool,

    #[serde(default)]
    resource_id: Option<String>,

    #[serde(default)]
    errors: Vec<String>,
}

impl VcenterClient {
    /// Log in with the endpoint's credentials and return a session client.
    pub async fn connect(endpoint: &VcenterEndpoint) -> Result<Self> {
        let client = reqwest::Client::new();

        let url = format!("{}/api/session", endpoint.base_url);
        let response = client
            .post(&url)
            .basic_auth(&endpoint.username, Some(&endpoint.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VcenterError::SessionFailed(format!(
                "login returned {}",
                response.status()
            )));
        }

        let session_id: String = response.json().await?;
        tracing::debug!("platform session established for {}", endpoint.base_url);

        Ok(Self {
            client,
            base_url: endpoint.base_url.clone(),
            session_id,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", path);

        let response = self
            .client
            .get(&url)
            .header(SESSION_HEADER, &self.session_id)
            .send()
            .await?;

        Self::checked(response).await?.json().await.map_err(Into::into)
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", path);

        let response = self
            .client
            .post(&url)
            .header(SESSION_HEADER, &self.session_id)
            .json(body)
            .send()
            .await?;

        Self::checked(response).await?.json().await.map_err(Into::into)
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(VcenterError::ApiError(format!("{}: {}", status, body)))
    }

    async fn find_named(&self, path: &str, name: &str) -> Result<Option<String>> {
        let entries: Vec<IdName> = self.get_json(path).await?;
        Ok(entries.into_iter().find(|e| e.name == name).map(|e| e.id))
    }
}

#[derive(Debug, Deserialize)]
struct IdName {
    id: String,
    name: String,
}

#[async_trait]
impl VcenterApi for VcenterClient {
    async fn list_libraries(&self) -> Result<Vec<ContentLibrary>> {
        self.get_json("/api/content/subscribed-libraries").await
    }

    async fn create_library(&self, spec: &LibrarySpec) -> Result<String> {
        let created: IdResponse = self
            .post_json("/api/content/subscribed-libraries", spec)
            .await?;
        Ok(created.id)
    }

    async fn delete_library(&self, library_id: &str) -> Result<()> {
        let url = format!(
            "{}/api/content/subscribed-libraries/{}",
            self.base_url, library_id
        );
        tracing::debug!("DELETE /api/content/subscribed-libraries/{}", library_id);

        let response = self
            .client
            .delete(&url)
            .header(SESSION_HEADER, &self.session_id)
            .send()
            .await?;

        Self::checked(response).await?;
        Ok(())
    }

    async fn find_library_item(&self, name: &str) -> Result<Option<String>> {
        let items: Vec<String> = self
            .get_json(&format!("/api/content/library-items?name={}", name))
            .await?;
        Ok(items.into_iter().next())
    }

    async fn deploy_item(&self, item_id: &str, target: &DeployTarget) -> Result<String> {
        let result: DeployResponse = self
            .post_json(&format!("/api/ovf/{}/deploy", item_id), target)
            .await?;

        if !result.succeeded {
            return Err(VcenterError::DeployFailed(result.errors.join("; ")));
        }

        result
            .resource_id
            .ok_or_else(|| VcenterError::DeployFailed("no resource id in result".to_string()))
    }

    async fn customize_vm(&self, vm_id: &str, identity: &NetworkIdentity) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(&format!("/api/vcenter/vm/{}/guest/customization", vm_id), identity)
            .await?;
        Ok(())
    }

    async fn power_on(&self, vm_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(&format!("/api/vcenter/vm/{}/power/start", vm_id), &())
            .await?;
        Ok(())
    }

    async fn list_vms(&self) -> Result<Vec<VirtualMachine>> {
        self.get_json("/api/vcenter/vm").await
    }

    async fn find_datastore(&self, name: &str) -> Result<Option<String>> {
        self.find_named("/api/vcenter/datastore", name).await
    }

    async fn find_resource_pool(&self, name: &str) -> Result<Option<String>> {
        self.find_named("/api/vcenter/resource-pool", name).await
    }

    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        self.find_named("/api/vcenter/folder", name).await
    }
}

/// Default connector: a fresh [`VcenterClient`] session per call.
pub struct HttpVcenterConnect;

#[async_trait]
impl VcenterConnect for HttpVcenterConnect {
    async fn connect(&self, endpoint: &VcenterEndpoint) -> Result<Arc<dyn VcenterApi>> {
        let client = VcenterClient::connect(endpoint).await?;
        Ok(Arc::new(client))
    }
}
