//! Typed provisioning configuration
//!
//! The trigger payload carries the full configuration for a provisioning run.
//! It is parsed into [`ProvisionConfig`] once, validated at workflow start,
//! and then treated as an immutable snapshot for the lifetime of the workflow
//! so that re-entered steps always see the values the run started with.

pub mod error;

pub use error::{ConfigError, Result};

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Immutable configuration snapshot for one provisioning workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionConfig {
    /// Organization that owns the instance.
    pub org_id: String,

    /// Provider region the instance is placed in.
    pub region: String,

    /// Number of hosts in the instance. A single host selects the
    /// provider's one-node deployment flavor.
    pub num_hosts: u32,

    pub deployment_type: String,

    /// Backing infrastructure provider identifier (e.g. "AWS").
    pub provider: String,

    pub sso_domain: String,

    /// CIDR of the customer VPC peered with the instance.
    pub vpc_cidr: String,

    /// CIDR of the instance management network.
    pub management_cidr: String,

    /// Overlay subnet for the compute network.
    pub vxlan_subnet: String,

    /// CIDR of the workload segment the deployed VM lands on.
    pub workload_cidr: String,

    /// Customer account linked to the instance.
    pub linked_account: String,

    /// Customer subnets the instance attaches to.
    pub linked_subnets: Vec<String>,

    pub content_repository_name: String,

    #[serde(rename = "contentRepositoryURL")]
    pub content_repository_url: String,

    /// Datastore backing the mounted content repository and deployed VMs.
    pub datastore: String,

    pub tls_thumbprint: String,

    pub dns_servers: Vec<String>,

    /// Template to deploy from the content repository.
    pub template_name: String,

    /// Name and network identity of the deployed VM.
    pub vm_name: String,
    pub vm_ip: String,
    pub vm_subnet_mask: String,
    pub vm_gateway: String,

    /// Environment variable holding the provider API refresh token. The
    /// secret itself never appears in the payload.
    pub refresh_token_env: String,
}

impl ProvisionConfig {
    /// Validate the snapshot before any provider call is made.
    ///
    /// Configuration problems are fatal at workflow start: a descriptive
    /// error here is the only point where the driver refuses a provisioning
    /// request outright.
    pub fn validate(&self) -> Result<()> {
        require(&self.org_id, "orgId")?;
        require(&self.region, "region")?;
        require(&self.deployment_type, "deploymentType")?;
        require(&self.provider, "provider")?;
        require(&self.sso_domain, "ssoDomain")?;
        require(&self.linked_account, "linkedAccount")?;
        require(&self.content_repository_name, "contentRepositoryName")?;
        require(&self.datastore, "datastore")?;
        require(&self.tls_thumbprint, "tlsThumbprint")?;
        require(&self.template_name, "templateName")?;
        require(&self.vm_name, "vmName")?;
        require(&self.refresh_token_env, "refreshTokenEnv")?;

        if self.num_hosts < 1 {
            return Err(ConfigError::InvalidHostCount(self.num_hosts));
        }

        cidr(&self.vpc_cidr, "vpcCidr")?;
        cidr(&self.management_cidr, "managementCidr")?;
        cidr(&self.vxlan_subnet, "vxlanSubnet")?;
        cidr(&self.workload_cidr, "workloadCidr")?;

        url::Url::parse(&self.content_repository_url).map_err(|_| ConfigError::InvalidUrl {
            field: "contentRepositoryURL",
            value: self.content_repository_url.clone(),
        })?;

        if self.dns_servers.is_empty() {
            return Err(ConfigError::EmptyDnsServers);
        }
        for server in &self.dns_servers {
            address(server, "dnsServers")?;
        }

        address(&self.vm_ip, "vmIp")?;
        address(&self.vm_subnet_mask, "vmSubnetMask")?;
        address(&self.vm_gateway, "vmGateway")?;

        Ok(())
    }

    /// True when the instance should be created as a one-node deployment.
    pub fn is_single_node(&self) -> bool {
        self.num_hosts == 1
    }
}

/// Caller context for the completion callback. Opaque to every step except
/// the final notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackContext {
    /// Pre-signed URL the completion response is PUT to.
    pub response_url: String,

    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,

    /// Log stream of the originating invocation, echoed back as the
    /// physical resource id.
    pub log_stream_name: String,
}

fn require(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(())
}

fn address(value: &str, field: &'static str) -> Result<Ipv4Addr> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn cidr(value: &str, field: &'static str) -> Result<()> {
    let invalid = || ConfigError::InvalidCidr {
        field,
        value: value.to_string(),
    };

    let (addr, prefix) = value.split_once('/').ok_or_else(invalid)?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok(())
}
