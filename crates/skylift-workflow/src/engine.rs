//! Step execution engine
//!
//! [`Engine::advance`] runs exactly one step per call: perform the step's
//! idempotent action, decide the next step and wait hint, and hand back
//! the updated state. No error ever escapes to the caller; failures
//! become `Retry` outcomes (bounded by [`EngineLimits::max_step_retries`])
//! or, past the ceiling, a routed failure report through the notify step.
//!
//! The engine holds no state of its own between calls. Provider state is
//! re-read at every step rather than trusted from a prior invocation,
//! which may be hours old.

use crate::error::{Result, WorkflowError};
use crate::state::{Step, StepOutcome, WorkflowState};
use skylift_notify::{CompletionNotifier, CompletionStatus};
use skylift_provider::{FirewallRuleSpec, Instance, ManagementInfo, NetworkEdge, Provider, TaskTracker};
use skylift_vcenter::{
    DeployTarget, LibrarySpec, NetworkIdentity, VcenterApi, VcenterConnect, VcenterEndpoint,
};
use std::sync::Arc;

/// Name pattern of the management gateway edge.
const MGMT_EDGE: &str = "sddc-mgw";

/// Name pattern of the compute gateway edge.
const COMPUTE_EDGE: &str = "sddc-cgw";

/// Rules reset on the management edge; CheckFirewall counts these.
const MGMT_RULES: [&str; 3] = [
    "Allow Any to vCenter:443",
    "Allow Mgmt to VPC",
    "Allow VPC to Mgmt",
];

/// Rules reset on the compute edge.
const COMPUTE_RULES: [&str; 2] = ["Allow SDDC to Any", "Allow VPC to SDDC"];

/// Fixed inventory placement for the deployed VM.
const RESOURCE_POOL: &str = "Compute-ResourcePool";
const VM_FOLDER: &str = "Workloads";

/// Wait hint while the creation request itself is retried or no task
/// estimate exists yet.
const CREATE_WAIT: u64 = 300;

/// Fallback estimate for a brand-new creation task.
const CREATE_TASK_FALLBACK: u64 = 6600;

/// Fallback estimate while polling an in-flight creation task.
const CHECK_TASK_FALLBACK: u64 = 270;

/// Standard polling interval between continuations.
const POLL_WAIT: u64 = 10;

/// Wait hint when the next step should run promptly.
const ADVANCE_NOW: u64 = 1;

/// Retry and wait ceilings for one workflow.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Same-step retries allowed before the workflow gives up and reports
    /// failure.
    pub max_step_retries: u32,

    /// Upper bound on any wait hint derived from a provider estimate.
    pub max_wait_seconds: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_step_retries: 360,
            max_wait_seconds: 3600,
        }
    }
}

pub struct Engine {
    provider: Provider,
    tracker: TaskTracker,
    connector: Arc<dyn VcenterConnect>,
    notifier: Arc<dyn CompletionNotifier>,
    limits: EngineLimits,
}

impl Engine {
    pub fn new(
        provider: Provider,
        tracker: TaskTracker,
        connector: Arc<dyn VcenterConnect>,
        notifier: Arc<dyn CompletionNotifier>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            provider,
            tracker,
            connector,
            notifier,
            limits,
        }
    }

    /// Reject continuations for a workflow that already completed.
    pub fn ensure_resumable(state: &WorkflowState) -> Result<()> {
        if state.current_step.is_terminal() {
            return Err(WorkflowError::AlreadyComplete(state.target_name.clone()));
        }
        Ok(())
    }

    /// Execute one step and return the updated state.
    pub async fn advance(&self, mut state: WorkflowState) -> WorkflowState {
        if state.current_step.is_terminal() {
            tracing::warn!("{}: advance called on completed workflow", state.target_name);
            return state;
        }

        tracing::info!("{}: running step {}", state.target_name, state.current_step);
        let outcome = self.run_step(&mut state).await;

        match outcome {
            StepOutcome::Advance { next, wait } => {
                tracing::info!("{}: {} -> {}", state.target_name, state.current_step, next);
                state.previous_step = Some(state.current_step);
                state.current_step = next;
                state.wait_hint_seconds = wait;
                state.retries = 0;
            }
            StepOutcome::Retry { reason, wait } => {
                if state.retries >= self.limits.max_step_retries {
                    let reason = format!(
                        "step {} exhausted {} retries, last: {}",
                        state.current_step, state.retries, reason
                    );
                    self.fail(&mut state, reason);
                } else {
                    state.retries += 1;
                    state.wait_hint_seconds = wait;
                    tracing::warn!(
                        "{}: step {} will retry ({})",
                        state.target_name,
                        state.current_step,
                        reason
                    );
                }
            }
            StepOutcome::Fatal { reason } => self.fail(&mut state, reason),
        }

        state
    }

    /// Record a terminal failure and route the workflow to its failure
    /// report. A failure inside the notify step itself ends the workflow;
    /// there is nobody left to tell.
    fn fail(&self, state: &mut WorkflowState, reason: String) {
        tracing::error!("{}: {}", state.target_name, reason);
        if state.failure.is_none() {
            state.failure = Some(reason);
        }

        state.previous_step = Some(state.current_step);
        if state.current_step == Step::Notify {
            state.current_step = Step::Done;
            state.wait_hint_seconds = 0;
        } else {
            state.current_step = Step::Notify;
            state.wait_hint_seconds = ADVANCE_NOW;
        }
        state.retries = 0;
    }

    async fn run_step(&self, state: &mut WorkflowState) -> StepOutcome {
        match state.current_step {
            Step::CreateInstance => self.create_instance(state).await,
            Step::CheckInstance => self.check_instance(state).await,
            Step::ConfigureFirewall => self.configure_firewall(state).await,
            Step::CheckFirewall => self.check_firewall(state).await,
            Step::ConnectLibrary => self.connect_library(state).await,
            Step::CheckLibrary => self.check_library(state).await,
            Step::DeployVm => self.deploy_vm(state).await,
            Step::CheckVm => self.check_vm(state).await,
            Step::Notify => self.notify(state).await,
            Step::Done => StepOutcome::Fatal {
                reason: "attempted to run the terminal step".to_string(),
            },
        }
    }

    async fn create_instance(&self, state: &mut WorkflowState) -> StepOutcome {
        match self
            .provider
            .create_instance(&state.target_name, &state.config)
            .await
        {
            Ok(Some(task)) => {
                let wait = self
                    .tracker
                    .remaining_seconds(&task.id, CREATE_TASK_FALLBACK)
                    .await;
                state.task_handle = Some(task.id);
                StepOutcome::Advance {
                    next: Step::CheckInstance,
                    wait: self.clamp_wait(wait),
                }
            }
            // Already exists: the request is satisfied as-is.
            Ok(None) => StepOutcome::Advance {
                next: Step::CheckInstance,
                wait: CREATE_WAIT,
            },
            Err(e) => StepOutcome::Retry {
                reason: e.to_string(),
                wait: CREATE_WAIT,
            },
        }
    }

    async fn check_instance(&self, state: &mut WorkflowState) -> StepOutcome {
        // Size the retry wait from the creation task when one is in flight.
        let retry_wait = match &state.task_handle {
            Some(task_id) => {
                let estimate = self
                    .tracker
                    .remaining_seconds(task_id, CHECK_TASK_FALLBACK)
                    .await;
                self.clamp_wait(estimate)
            }
            None => POLL_WAIT,
        };

        match self.provider.find_instance(&state.target_name).await {
            Ok(Some(instance)) => {
                state.observed_instance_state = Some(instance.state.to_string());
                if instance.is_ready() {
                    // Creation reached its terminal condition.
                    state.task_handle = None;
                    StepOutcome::Advance {
                        next: Step::ConfigureFirewall,
                        wait: ADVANCE_NOW,
                    }
                } else {
                    StepOutcome::Retry {
                        reason: format!("instance state is {}", instance.state),
                        wait: retry_wait,
                    }
                }
            }
            Ok(None) => StepOutcome::Retry {
                reason: "instance not visible yet".to_string(),
                wait: retry_wait,
            },
            Err(e) => StepOutcome::Retry {
                reason: e.to_string(),
                wait: retry_wait,
            },
        }
    }

    async fn configure_firewall(&self, state: &mut WorkflowState) -> StepOutcome {
        match self.reset_firewall(state).await {
            Ok(()) => StepOutcome::Advance {
                next: Step::CheckFirewall,
                wait: POLL_WAIT,
            },
            Err(reason) => StepOutcome::Retry {
                reason,
                wait: POLL_WAIT,
            },
        }
    }

    /// Delete the named rules then recreate them. Resetting instead of
    /// diffing keeps re-entry idempotent at the cost of a brief coverage
    /// gap.
    async fn reset_firewall(&self, state: &WorkflowState) -> std::result::Result<(), String> {
        let instance = self.ready_instance(state).await?;
        let mgmt_info = instance
            .resource_config
            .clone()
            .ok_or_else(|| "management endpoint not published yet".to_string())?;

        let mgmt_edge = self.required_edge(&instance, MGMT_EDGE).await?;
        let compute_edge = self.required_edge(&instance, COMPUTE_EDGE).await?;

        self.drop_rules(&instance, &mgmt_edge, &MGMT_RULES).await?;
        self.drop_rules(&instance, &compute_edge, &COMPUTE_RULES).await?;

        let config = &state.config;
        let any = vec!["any".to_string()];
        let vcenter_ips = vec![
            mgmt_info.vc_public_ip.clone(),
            mgmt_info.vc_management_ip.clone(),
        ];

        let mgmt_rules = [
            FirewallRuleSpec::accept(
                MGMT_RULES[0],
                any.clone(),
                any.clone(),
                vcenter_ips,
                vec!["443".to_string()],
            ),
            FirewallRuleSpec::accept(
                MGMT_RULES[1],
                vec![config.management_cidr.clone()],
                any.clone(),
                vec![config.vpc_cidr.clone()],
                any.clone(),
            ),
            FirewallRuleSpec::accept(
                MGMT_RULES[2],
                vec![config.vpc_cidr.clone()],
                any.clone(),
                vec![config.management_cidr.clone()],
                any.clone(),
            ),
        ];
        for rule in &mgmt_rules {
            self.provider
                .create_firewall_rule(&instance, &mgmt_edge, rule)
                .await
                .map_err(|e| e.to_string())?;
        }

        let compute_rules = [
            FirewallRuleSpec::accept(
                COMPUTE_RULES[0],
                vec![config.workload_cidr.clone()],
                any.clone(),
                any.clone(),
                any.clone(),
            ),
            FirewallRuleSpec::accept(
                COMPUTE_RULES[1],
                vec![config.vpc_cidr.clone()],
                any.clone(),
                vec![config.workload_cidr.clone()],
                any.clone(),
            ),
        ];
        for rule in &compute_rules {
            self.provider
                .create_firewall_rule(&instance, &compute_edge, rule)
                .await
                .map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    async fn check_firewall(&self, state: &mut WorkflowState) -> StepOutcome {
        let counted: std::result::Result<usize, String> = async {
            let instance = self.ready_instance(state).await?;
            let mgmt_edge = self.required_edge(&instance, MGMT_EDGE).await?;

            let mut found = 0;
            for name in MGMT_RULES {
                if self
                    .provider
                    .find_firewall_rule(&instance, &mgmt_edge, name)
                    .await
                    .map_err(|e| e.to_string())?
                    .is_some()
                {
                    found += 1;
                }
            }
            Ok(found)
        }
        .await;

        match counted {
            Ok(found) => {
                tracing::info!(
                    "{}: {} of {} expected rules present",
                    state.target_name,
                    found,
                    MGMT_RULES.len()
                );
                if found >= MGMT_RULES.len() {
                    StepOutcome::Advance {
                        next: Step::ConnectLibrary,
                        wait: ADVANCE_NOW,
                    }
                } else {
                    StepOutcome::Retry {
                        reason: format!("{} of {} expected rules present", found, MGMT_RULES.len()),
                        wait: POLL_WAIT,
                    }
                }
            }
            Err(reason) => StepOutcome::Retry {
                reason,
                wait: POLL_WAIT,
            },
        }
    }

    async fn connect_library(&self, state: &mut WorkflowState) -> StepOutcome {
        match self.remount_library(state).await {
            Ok(()) => StepOutcome::Advance {
                next: Step::CheckLibrary,
                wait: POLL_WAIT,
            },
            Err(reason) => StepOutcome::Retry {
                reason,
                wait: POLL_WAIT,
            },
        }
    }

    /// Dismount any library carrying the configured name, then mount it
    /// fresh against the configured datastore and subscription URL.
    async fn remount_library(&self, state: &WorkflowState) -> std::result::Result<(), String> {
        let config = &state.config;
        let platform = self.connect_platform(state).await?;

        let libraries = platform.list_libraries().await.map_err(|e| e.to_string())?;
        for library in libraries
            .iter()
            .filter(|l| l.name == config.content_repository_name)
        {
            tracing::info!(
                "{}: dismounting content repository {} ({})",
                state.target_name,
                library.name,
                library.id
            );
            platform
                .delete_library(&library.id)
                .await
                .map_err(|e| e.to_string())?;
        }

        let datastore_id = platform
            .find_datastore(&config.datastore)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("datastore {} not found", config.datastore))?;

        tracing::info!(
            "{}: mounting content repository {} from {}",
            state.target_name,
            config.content_repository_name,
            config.content_repository_url
        );
        platform
            .create_library(&LibrarySpec {
                name: config.content_repository_name.clone(),
                datastore_id,
                subscription_url: config.content_repository_url.clone(),
                tls_thumbprint: config.tls_thumbprint.clone(),
                on_demand: true,
            })
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }

    async fn check_library(&self, state: &mut WorkflowState) -> StepOutcome {
        let counted: std::result::Result<usize, String> = async {
            let platform = self.connect_platform(state).await?;
            let libraries = platform.list_libraries().await.map_err(|e| e.to_string())?;
            Ok(libraries
                .iter()
                .filter(|l| l.name == state.config.content_repository_name)
                .count())
        }
        .await;

        match counted {
            Ok(found) if found >= 1 => StepOutcome::Advance {
                next: Step::DeployVm,
                wait: POLL_WAIT,
            },
            Ok(_) => StepOutcome::Retry {
                reason: "content repository not mounted yet".to_string(),
                wait: POLL_WAIT,
            },
            Err(reason) => StepOutcome::Retry {
                reason,
                wait: POLL_WAIT,
            },
        }
    }

    async fn deploy_vm(&self, state: &mut WorkflowState) -> StepOutcome {
        match self.deploy_from_template(state).await {
            Ok(()) => StepOutcome::Advance {
                next: Step::CheckVm,
                wait: POLL_WAIT,
            },
            Err(reason) => StepOutcome::Retry {
                reason,
                wait: POLL_WAIT,
            },
        }
    }

    /// Deploy the template, apply the VM's network identity and power it
    /// on.
    async fn deploy_from_template(&self, state: &WorkflowState) -> std::result::Result<(), String> {
        let config = &state.config;
        let platform = self.connect_platform(state).await?;

        let item_id = platform
            .find_library_item(&config.template_name)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("template {} not in repository", config.template_name))?;

        let datastore_id = platform
            .find_datastore(&config.datastore)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("datastore {} not found", config.datastore))?;
        let resource_pool_id = platform
            .find_resource_pool(RESOURCE_POOL)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("resource pool {} not found", RESOURCE_POOL))?;
        let folder_id = platform
            .find_folder(VM_FOLDER)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("folder {} not found", VM_FOLDER))?;

        let vm_id = platform
            .deploy_item(
                &item_id,
                &DeployTarget {
                    vm_name: config.vm_name.clone(),
                    datastore_id,
                    resource_pool_id,
                    folder_id,
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!("{}: deployed {} as VM {}", state.target_name, config.template_name, vm_id);

        platform
            .customize_vm(
                &vm_id,
                &NetworkIdentity {
                    hostname: config.vm_name.clone(),
                    ip_address: config.vm_ip.clone(),
                    subnet_mask: config.vm_subnet_mask.clone(),
                    gateway: config.vm_gateway.clone(),
                    dns_servers: config.dns_servers.clone(),
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        platform.power_on(&vm_id).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn check_vm(&self, state: &mut WorkflowState) -> StepOutcome {
        let found: std::result::Result<bool, String> = async {
            let platform = self.connect_platform(state).await?;
            let vms = platform.list_vms().await.map_err(|e| e.to_string())?;
            Ok(vms.iter().any(|vm| vm.name == state.config.vm_name))
        }
        .await;

        match found {
            Ok(true) => StepOutcome::Advance {
                next: Step::Notify,
                wait: ADVANCE_NOW,
            },
            Ok(false) => StepOutcome::Retry {
                reason: format!("VM {} not visible yet", state.config.vm_name),
                wait: POLL_WAIT,
            },
            Err(reason) => StepOutcome::Retry {
                reason,
                wait: POLL_WAIT,
            },
        }
    }

    async fn notify(&self, state: &mut WorkflowState) -> StepOutcome {
        let (status, data) = match &state.failure {
            Some(reason) => (
                CompletionStatus::Failed,
                serde_json::json!({ "failure": reason }),
            ),
            None => (CompletionStatus::Success, serde_json::json!({})),
        };

        match self
            .notifier
            .notify(&state.origin_callback, status, data)
            .await
        {
            Ok(()) => StepOutcome::Advance {
                next: Step::Done,
                wait: 0,
            },
            Err(e) => StepOutcome::Retry {
                reason: e.to_string(),
                wait: POLL_WAIT,
            },
        }
    }

    /// Current instance for the workflow target, re-read from the
    /// director.
    async fn ready_instance(&self, state: &WorkflowState) -> std::result::Result<Instance, String> {
        self.provider
            .find_instance(&state.target_name)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("instance {} not found", state.target_name))
    }

    async fn required_edge(
        &self,
        instance: &Instance,
        pattern: &str,
    ) -> std::result::Result<NetworkEdge, String> {
        self.provider
            .find_edge(instance, pattern)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no edge matching {}", pattern))
    }

    async fn drop_rules(
        &self,
        instance: &Instance,
        edge: &NetworkEdge,
        names: &[&str],
    ) -> std::result::Result<(), String> {
        for &name in names {
            if self
                .provider
                .find_firewall_rule(instance, edge, name)
                .await
                .map_err(|e| e.to_string())?
                .is_some()
            {
                self.provider
                    .delete_firewall_rule(instance, edge, name)
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    /// Fresh management-plane session for this continuation.
    async fn connect_platform(
        &self,
        state: &WorkflowState,
    ) -> std::result::Result<Arc<dyn VcenterApi>, String> {
        let instance = self.ready_instance(state).await?;
        let mgmt: ManagementInfo = instance
            .resource_config
            .ok_or_else(|| "management endpoint not published yet".to_string())?;

        let endpoint = VcenterEndpoint {
            base_url: mgmt.vc_url.trim_end_matches('/').to_string(),
            username: mgmt.cloud_username,
            password: mgmt.cloud_password,
        };
        self.connector
            .connect(&endpoint)
            .await
            .map_err(|e| e.to_string())
    }

    fn clamp_wait(&self, wait: u64) -> u64 {
        wait.min(self.limits.max_wait_seconds)
    }
}
