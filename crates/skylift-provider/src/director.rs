//! Cloud director API client
//!
//! The director is the provider-side control plane for organizations,
//! instances, long-running tasks, network edges and edge firewall rule
//! sets. [`DirectorApi`] is the narrow seam the rest of skylift consumes;
//! [`DirectorClient`] is the HTTP implementation against the director's
//! REST endpoints, authenticated by exchanging an OAuth refresh token for
//! a short-lived access token.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narrow remote-procedure seam over the cloud director.
#[async_trait]
pub trait DirectorApi: Send + Sync {
    /// List all instances in an organization.
    async fn list_instances(&self, org: &str) -> Result<Vec<Instance>>;

    /// Request creation of a new instance. Returns the provider task
    /// tracking the deployment.
    async fn create_instance(&self, org: &str, spec: &InstanceSpec) -> Result<Task>;

    /// Request deletion of an instance. Returns the provider task tracking
    /// the teardown.
    async fn delete_instance(&self, org: &str, instance_id: &str) -> Result<Task>;

    /// Query a long-running provider task.
    async fn get_task(&self, org: &str, task_id: &str) -> Result<Task>;

    /// List the gateway-services network edges of an instance.
    async fn list_edges(&self, org: &str, instance_id: &str) -> Result<Vec<NetworkEdge>>;

    /// Read the effective firewall rule set of an edge.
    async fn list_firewall_rules(
        &self,
        org: &str,
        instance_id: &str,
        edge_id: &str,
    ) -> Result<Vec<FirewallRule>>;

    /// Append a rule to an edge's firewall rule set.
    async fn add_firewall_rule(
        &self,
        org: &str,
        instance_id: &str,
        edge_id: &str,
        rule: &FirewallRuleSpec,
    ) -> Result<()>;

    /// Remove a rule from an edge's firewall rule set.
    async fn delete_firewall_rule(
        &self,
        org: &str,
        instance_id: &str,
        edge_id: &str,
        rule_id: u64,
    ) -> Result<()>;
}

/// A provisioned private-cloud instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,

    #[serde(rename = "instanceState")]
    pub state: InstanceState,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    /// Management-plane coordinates. Populated only once deployment has
    /// progressed far enough for the platform endpoint to exist.
    #[serde(default)]
    pub resource_config: Option<ManagementInfo>,
}

impl Instance {
    pub fn is_ready(&self) -> bool {
        self.state == InstanceState::Ready
    }
}

/// Lifecycle state reported by the director.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Deploying,
    Ready,
    Deleting,
    Deleted,
    Failed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Deploying => write!(f, "DEPLOYING"),
            InstanceState::Ready => write!(f, "READY"),
            InstanceState::Deleting => write!(f, "DELETING"),
            InstanceState::Deleted => write!(f, "DELETED"),
            InstanceState::Failed => write!(f, "FAILED"),
            InstanceState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Management-plane block of a deployed instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementInfo {
    /// Base URL of the platform management endpoint.
    pub vc_url: String,

    pub cloud_username: String,
    pub cloud_password: String,

    pub vc_public_ip: String,
    pub vc_management_ip: String,
}

/// Creation parameters for a new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub name: String,
    pub region: String,
    pub provider: String,
    pub num_hosts: u32,
    pub deployment_type: String,

    /// Set to the provider's one-node flavor when a single host is
    /// requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    pub sso_domain: String,

    /// CIDR the provider carves the management network from.
    pub management_cidr: String,
    pub vxlan_subnet: String,

    pub linked_account: String,
    pub linked_subnets: Vec<String>,
}

/// A long-running provider-side operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,

    #[serde(default)]
    pub progress_percent: Option<u8>,

    #[serde(default)]
    pub estimated_remaining_minutes: Option<u64>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Started,
    Finished,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

/// A gateway-services network edge of an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEdge {
    pub id: String,
    pub name: String,
}

/// A rule in an edge's effective firewall rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRule {
    pub rule_id: u64,
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(flatten)]
    pub spec: FirewallEndpoints,
}

/// Source/destination endpoints of a firewall rule as the director
/// reports them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallEndpoints {
    #[serde(default)]
    pub source_cidrs: Vec<String>,
    #[serde(default)]
    pub source_ports: Vec<String>,
    #[serde(default)]
    pub destination_cidrs: Vec<String>,
    #[serde(default)]
    pub destination_ports: Vec<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Parameters for a new firewall rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleSpec {
    pub name: String,
    pub source_cidrs: Vec<String>,
    pub source_ports: Vec<String>,
    pub destination_cidrs: Vec<String>,
    pub destination_ports: Vec<String>,
    pub protocol: String,
}

impl FirewallRuleSpec {
    /// Accept-rule helper: TCP unless the caller says otherwise.
    pub fn accept(
        name: impl Into<String>,
        source_cidrs: Vec<String>,
        source_ports: Vec<String>,
        destination_cidrs: Vec<String>,
        destination_ports: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_cidrs,
            source_ports,
            destination_cidrs,
            destination_ports,
            protocol: "TCP".to_string(),
        }
    }
}

/// HTTP client for the director REST API.
pub struct DirectorClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct EdgePage {
    #[serde(rename = "edgePage")]
    edge_page: EdgeData,
}

#[derive(Debug, Deserialize)]
struct EdgeData {
    data: Vec<NetworkEdge>,
}

#[derive(Debug, Deserialize)]
struct FirewallConfig {
    #[serde(rename = "firewallRules")]
    firewall_rules: Vec<FirewallRule>,
}

#[derive(Debug, Serialize)]
struct FirewallRulesBody<'a> {
    #[serde(rename = "firewallRules")]
    firewall_rules: Vec<&'a FirewallRuleSpec>,
}

impl DirectorClient {
    /// Exchange a refresh token for an access token and return a
    /// connected client.
    pub async fn connect(base_url: impl Into<String>, refresh_token: &str) -> Result<Self> {
        let base_url = base_url.into();
        let client = reqwest::Client::new();

        let url = format!("{}/auth/api-tokens/authorize", base_url);
        let response = client
            .post(&url)
            .query(&[("refresh_token", refresh_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::AuthenticationFailed(format!(
                "token exchange returned {}",
                response.status()
            )));
        }

        let auth: AuthResponse = response.json().await?;

        Ok(Self {
            client,
            base_url,
            access_token: auth.access_token,
        })
    }

    /// Connect using the refresh token named by `token_env`.
    pub async fn from_env(base_url: impl Into<String>, token_env: &str) -> Result<Self> {
        let refresh_token = std::env::var(token_env)
            .map_err(|_| ProviderError::MissingEnvVar(token_env.to_string()))?;
        Self::connect(base_url, &refresh_token).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
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
        Err(ProviderError::ApiError(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl DirectorApi for DirectorClient {
    async fn list_instances(&self, org: &str) -> Result<Vec<Instance>> {
        self.get_json(&format!("/orgs/{}/instances", org)).await
    }

    async fn create_instance(&self, org: &str, spec: &InstanceSpec) -> Result<Task> {
        let url = format!("{}/orgs/{}/instances", self.base_url, org);
        tracing::debug!("POST /orgs/{}/instances name={}", org, spec.name);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(spec)
            .send()
            .await?;

        Self::checked(response).await?.json().await.map_err(Into::into)
    }

    async fn delete_instance(&self, org: &str, instance_id: &str) -> Result<Task> {
        let url = format!("{}/orgs/{}/instances/{}", self.base_url, org, instance_id);
        tracing::debug!("DELETE /orgs/{}/instances/{}", org, instance_id);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::checked(response).await?.json().await.map_err(Into::into)
    }

    async fn get_task(&self, org: &str, task_id: &str) -> Result<Task> {
        self.get_json(&format!("/orgs/{}/tasks/{}", org, task_id)).await
    }

    async fn list_edges(&self, org: &str, instance_id: &str) -> Result<Vec<NetworkEdge>> {
        let page: EdgePage = self
            .get_json(&format!(
                "/orgs/{}/instances/{}/networks/edges?edgeType=gatewayServices",
                org, instance_id
            ))
            .await?;
        Ok(page.edge_page.data)
    }

    async fn list_firewall_rules(
        &self,
        org: &str,
        instance_id: &str,
        edge_id: &str,
    ) -> Result<Vec<FirewallRule>> {
        let config: FirewallConfig = self
            .get_json(&format!(
                "/orgs/{}/instances/{}/networks/edges/{}/firewall/config",
                org, instance_id, edge_id
            ))
            .await?;
        Ok(config.firewall_rules)
    }

    async fn add_firewall_rule(
        &self,
        org: &str,
        instance_id: &str,
        edge_id: &str,
        rule: &FirewallRuleSpec,
    ) -> Result<()> {
        let url = format!(
            "{}/orgs/{}/instances/{}/networks/edges/{}/firewall/config/rules",
            self.base_url, org, instance_id, edge_id
        );
        tracing::debug!("POST firewall rule \"{}\" on edge {}", rule.name, edge_id);

        let body = FirewallRulesBody {
            firewall_rules: vec![rule],
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        Self::checked(response).await?;
        Ok(())
    }

    async fn delete_firewall_rule(
        &self,
        org: &str,
        instance_id: &str,
        edge_id: &str,
        rule_id: u64,
    ) -> Result<()> {
        let url = format!(
            "{}/orgs/{}/instances/{}/networks/edges/{}/firewall/config/rules/{}",
            self.base_url, org, instance_id, edge_id, rule_id
        );
        tracing::debug!("DELETE firewall rule {} on edge {}", rule_id, edge_id);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::checked(response).await?;
        Ok(())
    }
}
