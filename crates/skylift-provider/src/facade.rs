//! Name-addressed provider facade
//!
//! Wraps the raw director API so callers address resources by name instead
//! of provider ids. Nothing is cached: every lookup re-queries the director,
//! so steps re-entered hours apart always act on current provider state.

use crate::director::{
    DirectorApi, FirewallRule, FirewallRuleSpec, Instance, InstanceSpec, NetworkEdge, Task,
};
use crate::error::{ProviderError, Result};
use regex::RegexBuilder;
use skylift_config::ProvisionConfig;
use std::sync::Arc;

pub struct Provider {
    api: Arc<dyn DirectorApi>,
    org_id: String,
}

impl Provider {
    pub fn new(api: Arc<dyn DirectorApi>, org_id: impl Into<String>) -> Self {
        Self {
            api,
            org_id: org_id.into(),
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Find an instance by exact name.
    pub async fn find_instance(&self, name: &str) -> Result<Option<Instance>> {
        let instances = self.api.list_instances(&self.org_id).await?;
        Ok(instances.into_iter().find(|i| i.name == name))
    }

    /// Find a network edge whose name matches `pattern`, case-insensitively.
    /// First match wins; no match is `None`, not an error.
    pub async fn find_edge(
        &self,
        instance: &Instance,
        pattern: &str,
    ) -> Result<Option<NetworkEdge>> {
        let matcher = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|_| ProviderError::InvalidPattern(pattern.to_string()))?;

        let edges = self.api.list_edges(&self.org_id, &instance.id).await?;
        Ok(edges.into_iter().find(|e| matcher.is_match(&e.name)))
    }

    /// Find a firewall rule by exact name on the given edge.
    pub async fn find_firewall_rule(
        &self,
        instance: &Instance,
        edge: &NetworkEdge,
        name: &str,
    ) -> Result<Option<FirewallRule>> {
        let rules = self
            .api
            .list_firewall_rules(&self.org_id, &instance.id, &edge.id)
            .await?;
        Ok(rules.into_iter().find(|r| r.name == name))
    }

    /// Append a rule to the edge's rule set. The caller is responsible for
    /// deleting any same-named rule first.
    pub async fn create_firewall_rule(
        &self,
        instance: &Instance,
        edge: &NetworkEdge,
        rule: &FirewallRuleSpec,
    ) -> Result<()> {
        self.api
            .add_firewall_rule(&self.org_id, &instance.id, &edge.id, rule)
            .await?;
        tracing::info!(
            "{} {}: firewall rule \"{}\" created",
            instance.id,
            instance.name,
            rule.name
        );
        Ok(())
    }

    /// Delete the named rule from the edge. Absence is an error the caller
    /// may tolerate.
    pub async fn delete_firewall_rule(
        &self,
        instance: &Instance,
        edge: &NetworkEdge,
        name: &str,
    ) -> Result<()> {
        let rule = self
            .find_firewall_rule(instance, edge, name)
            .await?
            .ok_or_else(|| ProviderError::RuleNotFound(name.to_string()))?;

        self.api
            .delete_firewall_rule(&self.org_id, &instance.id, &edge.id, rule.rule_id)
            .await?;
        tracing::info!(
            "{} {}: firewall rule \"{}\" deleted",
            instance.id,
            instance.name,
            name
        );
        Ok(())
    }

    /// Request creation of a named instance. Returns `None` when an instance
    /// with that name already exists; existence satisfies the request.
    pub async fn create_instance(
        &self,
        name: &str,
        config: &ProvisionConfig,
    ) -> Result<Option<Task>> {
        if self.find_instance(name).await?.is_some() {
            tracing::info!("instance {} already exists", name);
            return Ok(None);
        }

        let spec = InstanceSpec {
            name: name.to_string(),
            region: config.region.clone(),
            provider: config.provider.clone(),
            num_hosts: config.num_hosts,
            deployment_type: config.deployment_type.clone(),
            instance_type: config.is_single_node().then(|| "1NODE".to_string()),
            sso_domain: config.sso_domain.clone(),
            management_cidr: config.management_cidr.clone(),
            vxlan_subnet: config.vxlan_subnet.clone(),
            linked_account: config.linked_account.clone(),
            linked_subnets: config.linked_subnets.clone(),
        };

        let task = self.api.create_instance(&self.org_id, &spec).await?;
        tracing::info!("instance {} creation requested, task {}", name, task.id);
        Ok(Some(task))
    }

    /// Request deletion of a named instance. Interactive use only; the
    /// resumable workflow never tears down.
    pub async fn delete_instance(&self, name: &str) -> Result<Task> {
        let instance = self
            .find_instance(name)
            .await?
            .ok_or_else(|| ProviderError::InstanceNotFound(name.to_string()))?;

        let task = self.api.delete_instance(&self.org_id, &instance.id).await?;
        tracing::info!("instance {} deletion requested, task {}", name, task.id);
        Ok(task)
    }
}
