//! Shared fakes for engine scenario tests.

use async_trait::async_trait;
use chrono::Utc;
use skylift_config::{CallbackContext, ProvisionConfig};
use skylift_notify::{CompletionNotifier, CompletionStatus, NotifyError};
use skylift_provider::{
    DirectorApi, FirewallEndpoints, FirewallRule, FirewallRuleSpec, Instance, InstanceSpec,
    InstanceState, ManagementInfo, NetworkEdge, Provider, ProviderError, Task, TaskStatus,
    TaskTracker,
};
use skylift_vcenter::{
    ContentLibrary, DeployTarget, LibrarySpec, NetworkIdentity, VcenterApi, VcenterConnect,
    VcenterEndpoint, VcenterError, VirtualMachine,
};
use skylift_workflow::{Engine, EngineLimits, WorkflowState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn sample_config() -> ProvisionConfig {
    ProvisionConfig {
        org_id: "org-1".to_string(),
        region: "US_WEST_2".to_string(),
        num_hosts: 4,
        deployment_type: "SingleAZ".to_string(),
        provider: "AWS".to_string(),
        sso_domain: "vmc.local".to_string(),
        vpc_cidr: "172.31.0.0/16".to_string(),
        management_cidr: "10.2.0.0/16".to_string(),
        vxlan_subnet: "192.168.1.0/24".to_string(),
        workload_cidr: "192.168.2.0/24".to_string(),
        linked_account: "123456789012".to_string(),
        linked_subnets: vec!["subnet-0abc".to_string()],
        content_repository_name: "workshop-templates".to_string(),
        content_repository_url: "https://templates.example.com/lib.json".to_string(),
        datastore: "WorkloadDatastore".to_string(),
        tls_thumbprint: "AB:CD:EF".to_string(),
        dns_servers: vec!["8.8.8.8".to_string()],
        template_name: "centos_master".to_string(),
        vm_name: "centos".to_string(),
        vm_ip: "192.168.2.4".to_string(),
        vm_subnet_mask: "255.255.255.0".to_string(),
        vm_gateway: "192.168.2.1".to_string(),
        refresh_token_env: "SKYLIFT_REFRESH_TOKEN".to_string(),
    }
}

pub fn sample_callback() -> CallbackContext {
    CallbackContext {
        response_url: "https://callbacks.example.com/response".to_string(),
        stack_id: "stack-1".to_string(),
        request_id: "req-1".to_string(),
        logical_resource_id: "Workshop".to_string(),
        log_stream_name: "stream-abc".to_string(),
    }
}

pub fn initial_state() -> WorkflowState {
    WorkflowState::initial("pod-01", sample_config(), sample_callback())
}

pub fn ready_instance(name: &str) -> Instance {
    Instance {
        id: format!("id-{}", name),
        name: name.to_string(),
        state: InstanceState::Ready,
        created: Utc::now(),
        updated: Utc::now(),
        resource_config: Some(ManagementInfo {
            vc_url: "https://vc.pod-01.example.com/".to_string(),
            cloud_username: "cloudadmin@vmc.local".to_string(),
            cloud_password: "hunter2".to_string(),
            vc_public_ip: "52.0.0.10".to_string(),
            vc_management_ip: "10.2.0.10".to_string(),
        }),
    }
}

pub fn deploying_instance(name: &str) -> Instance {
    Instance {
        state: InstanceState::Deploying,
        resource_config: None,
        ..ready_instance(name)
    }
}

pub fn standard_edges() -> Vec<NetworkEdge> {
    vec![
        NetworkEdge {
            id: "edge-mgw".to_string(),
            name: "SDDC-MGW-1".to_string(),
        },
        NetworkEdge {
            id: "edge-cgw".to_string(),
            name: "SDDC-CGW-1-esg".to_string(),
        },
    ]
}

/// Scriptable in-memory director. Firewall rule mutations are applied to
/// the per-edge rule sets so idempotence is observable.
pub struct FakeDirector {
    pub fail_all: bool,
    pub instances: Mutex<Vec<Instance>>,
    pub edges: Vec<NetworkEdge>,
    pub rules: Mutex<HashMap<String, Vec<FirewallRule>>>,
    pub task: Mutex<Option<Task>>,
    pub next_rule_id: Mutex<u64>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeDirector {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::empty()
        }
    }

    pub fn empty() -> Self {
        Self {
            fail_all: false,
            instances: Mutex::new(Vec::new()),
            edges: Vec::new(),
            rules: Mutex::new(HashMap::new()),
            task: Mutex::new(None),
            next_rule_id: Mutex::new(1),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A director with a READY instance and both gateway edges.
    pub fn ready_world(name: &str) -> Self {
        let mut world = Self::empty();
        world.instances = Mutex::new(vec![ready_instance(name)]);
        world.edges = standard_edges();
        world
    }

    pub fn with_task(self, estimated_remaining_minutes: u64) -> Self {
        *self.task.lock().unwrap() = Some(Task {
            id: "task-create".to_string(),
            status: TaskStatus::Started,
            progress_percent: Some(10),
            estimated_remaining_minutes: Some(estimated_remaining_minutes),
        });
        self
    }

    pub fn rule_names(&self, edge_id: &str) -> Vec<String> {
        self.rules
            .lock()
            .unwrap()
            .get(edge_id)
            .map(|rules| rules.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn mutation_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.starts_with("list") && !c.starts_with("get"))
            .cloned()
            .collect()
    }

    fn check(&self, call: &str) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_all {
            return Err(ProviderError::ApiError("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectorApi for FakeDirector {
    async fn list_instances(&self, _org: &str) -> Result<Vec<Instance>, ProviderError> {
        self.check("list_instances")?;
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn create_instance(
        &self,
        _org: &str,
        spec: &InstanceSpec,
    ) -> Result<Task, ProviderError> {
        self.check(&format!("create_instance:{}", spec.name))?;
        self.instances
            .lock()
            .unwrap()
            .push(deploying_instance(&spec.name));

        let task = Task {
            id: "task-create".to_string(),
            status: TaskStatus::Started,
            progress_percent: Some(0),
            estimated_remaining_minutes: None,
        };
        *self.task.lock().unwrap() = Some(task.clone());
        Ok(task)
    }

    async fn delete_instance(
        &self,
        _org: &str,
        instance_id: &str,
    ) -> Result<Task, ProviderError> {
        self.check(&format!("delete_instance:{}", instance_id))?;
        Ok(Task {
            id: "task-delete".to_string(),
            status: TaskStatus::Started,
            progress_percent: None,
            estimated_remaining_minutes: None,
        })
    }

    async fn get_task(&self, _org: &str, task_id: &str) -> Result<Task, ProviderError> {
        self.check(&format!("get_task:{}", task_id))?;
        self.task
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::TaskNotFound(task_id.to_string()))
    }

    async fn list_edges(
        &self,
        _org: &str,
        _instance_id: &str,
    ) -> Result<Vec<NetworkEdge>, ProviderError> {
        self.check("list_edges")?;
        Ok(self.edges.clone())
    }

    async fn list_firewall_rules(
        &self,
        _org: &str,
        _instance_id: &str,
        edge_id: &str,
    ) -> Result<Vec<FirewallRule>, ProviderError> {
        self.check("list_firewall_rules")?;
        Ok(self
            .rules
            .lock()
            .unwrap()
            .get(edge_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_firewall_rule(
        &self,
        _org: &str,
        _instance_id: &str,
        edge_id: &str,
        rule: &FirewallRuleSpec,
    ) -> Result<(), ProviderError> {
        self.check(&format!("add_rule:{}:{}", edge_id, rule.name))?;

        let mut next_id = self.next_rule_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;

        self.rules
            .lock()
            .unwrap()
            .entry(edge_id.to_string())
            .or_default()
            .push(FirewallRule {
                rule_id: id,
                name: rule.name.clone(),
                enabled: true,
                spec: FirewallEndpoints {
                    source_cidrs: rule.source_cidrs.clone(),
                    source_ports: rule.source_ports.clone(),
                    destination_cidrs: rule.destination_cidrs.clone(),
                    destination_ports: rule.destination_ports.clone(),
                    protocol: Some(rule.protocol.clone()),
                },
            });
        Ok(())
    }

    async fn delete_firewall_rule(
        &self,
        _org: &str,
        _instance_id: &str,
        edge_id: &str,
        rule_id: u64,
    ) -> Result<(), ProviderError> {
        self.check(&format!("delete_rule:{}:{}", edge_id, rule_id))?;
        if let Some(rules) = self.rules.lock().unwrap().get_mut(edge_id) {
            rules.retain(|r| r.rule_id != rule_id);
        }
        Ok(())
    }
}

/// In-memory platform endpoint with mountable libraries and a deployable
/// template.
pub struct FakeVcenter {
    pub fail_all: bool,
    pub libraries: Mutex<Vec<ContentLibrary>>,
    pub templates: Vec<String>,
    pub vms: Mutex<Vec<VirtualMachine>>,
    pub calls: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl FakeVcenter {
    pub fn ready() -> Self {
        Self {
            fail_all: false,
            libraries: Mutex::new(Vec::new()),
            templates: vec!["centos_master".to_string()],
            vms: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::ready()
        }
    }

    pub fn with_library(self, name: &str) -> Self {
        self.libraries.lock().unwrap().push(ContentLibrary {
            id: "lib-0".to_string(),
            name: name.to_string(),
            subscription_url: None,
        });
        self
    }

    pub fn library_names(&self) -> Vec<String> {
        self.libraries
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.name.clone())
            .collect()
    }

    fn check(&self, call: &str) -> Result<(), VcenterError> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.fail_all {
            return Err(VcenterError::ApiError("injected failure".to_string()));
        }
        Ok(())
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        let id = format!("{}-{}", prefix, *next);
        *next += 1;
        id
    }
}

#[async_trait]
impl VcenterApi for FakeVcenter {
    async fn list_libraries(&self) -> Result<Vec<ContentLibrary>, VcenterError> {
        self.check("list_libraries")?;
        Ok(self.libraries.lock().unwrap().clone())
    }

    async fn create_library(&self, spec: &LibrarySpec) -> Result<String, VcenterError> {
        self.check(&format!("create_library:{}", spec.name))?;
        let id = self.fresh_id("lib");
        self.libraries.lock().unwrap().push(ContentLibrary {
            id: id.clone(),
            name: spec.name.clone(),
            subscription_url: Some(spec.subscription_url.clone()),
        });
        Ok(id)
    }

    async fn delete_library(&self, library_id: &str) -> Result<(), VcenterError> {
        self.check(&format!("delete_library:{}", library_id))?;
        self.libraries
            .lock()
            .unwrap()
            .retain(|l| l.id != library_id);
        Ok(())
    }

    async fn find_library_item(&self, name: &str) -> Result<Option<String>, VcenterError> {
        self.check(&format!("find_library_item:{}", name))?;
        Ok(self
            .templates
            .iter()
            .position(|t| t == name)
            .map(|i| format!("item-{}", i)))
    }

    async fn deploy_item(
        &self,
        item_id: &str,
        target: &DeployTarget,
    ) -> Result<String, VcenterError> {
        self.check(&format!("deploy_item:{}", item_id))?;
        let id = self.fresh_id("vm");
        self.vms.lock().unwrap().push(VirtualMachine {
            id: id.clone(),
            name: target.vm_name.clone(),
            power_state: Some("POWERED_OFF".to_string()),
        });
        Ok(id)
    }

    async fn customize_vm(
        &self,
        vm_id: &str,
        identity: &NetworkIdentity,
    ) -> Result<(), VcenterError> {
        self.check(&format!("customize_vm:{}:{}", vm_id, identity.ip_address))?;
        Ok(())
    }

    async fn power_on(&self, vm_id: &str) -> Result<(), VcenterError> {
        self.check(&format!("power_on:{}", vm_id))?;
        if let Some(vm) = self.vms.lock().unwrap().iter_mut().find(|v| v.id == vm_id) {
            vm.power_state = Some("POWERED_ON".to_string());
        }
        Ok(())
    }

    async fn list_vms(&self) -> Result<Vec<VirtualMachine>, VcenterError> {
        self.check("list_vms")?;
        Ok(self.vms.lock().unwrap().clone())
    }

    async fn find_datastore(&self, name: &str) -> Result<Option<String>, VcenterError> {
        self.check("find_datastore")?;
        Ok((name == "WorkloadDatastore").then(|| "datastore-1".to_string()))
    }

    async fn find_resource_pool(&self, name: &str) -> Result<Option<String>, VcenterError> {
        self.check("find_resource_pool")?;
        Ok((name == "Compute-ResourcePool").then(|| "pool-1".to_string()))
    }

    async fn find_folder(&self, name: &str) -> Result<Option<String>, VcenterError> {
        self.check("find_folder")?;
        Ok((name == "Workloads").then(|| "folder-1".to_string()))
    }
}

/// Connector handing out the shared fake platform session.
pub struct FakeConnector {
    pub api: Arc<FakeVcenter>,
}

#[async_trait]
impl VcenterConnect for FakeConnector {
    async fn connect(
        &self,
        _endpoint: &VcenterEndpoint,
    ) -> Result<Arc<dyn VcenterApi>, VcenterError> {
        Ok(self.api.clone())
    }
}

/// Notifier that records every attempt.
pub struct RecordingNotifier {
    pub fail: bool,
    pub sent: Mutex<Vec<(CompletionStatus, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn ok() -> Self {
        Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(
        &self,
        _callback: &CallbackContext,
        status: CompletionStatus,
        data: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((status, data));
        if self.fail {
            return Err(NotifyError::Rejected(reqwest::StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }
}

pub struct World {
    pub director: Arc<FakeDirector>,
    pub vcenter: Arc<FakeVcenter>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Engine,
}

pub fn build_engine(
    director: FakeDirector,
    vcenter: FakeVcenter,
    notifier: RecordingNotifier,
    limits: EngineLimits,
) -> World {
    let director = Arc::new(director);
    let vcenter = Arc::new(vcenter);
    let notifier = Arc::new(notifier);

    let api: Arc<dyn DirectorApi> = director.clone();
    let engine = Engine::new(
        Provider::new(api.clone(), "org-1"),
        TaskTracker::new(api, "org-1"),
        Arc::new(FakeConnector {
            api: vcenter.clone(),
        }),
        notifier.clone(),
        limits,
    );

    World {
        director,
        vcenter,
        notifier,
        engine,
    }
}
