//! Workflow state
//!
//! The entire progress of a provisioning run lives in [`WorkflowState`],
//! which round-trips through the trigger payload on every invocation.
//! Nothing is persisted anywhere else: the external scheduler hands the
//! state back verbatim, so the struct must serialize losslessly.

use serde::{Deserialize, Serialize};
use skylift_config::{CallbackContext, ProvisionConfig};

/// Steps of the provisioning workflow, in execution order.
///
/// Transitions only ever move forward through this ordering (or stay put
/// for a retry); [`Step::Done`] is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    CreateInstance,
    CheckInstance,
    ConfigureFirewall,
    CheckFirewall,
    ConnectLibrary,
    CheckLibrary,
    DeployVm,
    CheckVm,
    Notify,
    Done,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        *self == Step::Done
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::CreateInstance => "createInstance",
            Step::CheckInstance => "checkInstance",
            Step::ConfigureFirewall => "configureFirewall",
            Step::CheckFirewall => "checkFirewall",
            Step::ConnectLibrary => "connectLibrary",
            Step::CheckLibrary => "checkLibrary",
            Step::DeployVm => "deployVm",
            Step::CheckVm => "checkVm",
            Step::Notify => "notify",
            Step::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Persisted progress of one provisioning workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub current_step: Step,

    /// Last completed step, kept as an audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_step: Option<Step>,

    /// Advisory delay before the next continuation.
    pub wait_hint_seconds: u64,

    /// Identifier of the in-flight creation task, present only while that
    /// task is outstanding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_handle: Option<String>,

    /// Same-step retries since the last advance.
    #[serde(default)]
    pub retries: u32,

    /// Instance lifecycle state seen at the most recent readiness check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_instance_state: Option<String>,

    /// First fatal failure, if any. Routes the workflow to a FAILED
    /// completion report instead of silently stalling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Name of the instance being provisioned. Never renamed.
    pub target_name: String,

    /// Configuration snapshot captured at workflow start.
    pub config: ProvisionConfig,

    /// Caller context for the completion callback.
    pub origin_callback: CallbackContext,
}

impl WorkflowState {
    /// Initial state for a fresh provisioning request.
    pub fn initial(
        target_name: impl Into<String>,
        config: ProvisionConfig,
        origin_callback: CallbackContext,
    ) -> Self {
        Self {
            current_step: Step::CreateInstance,
            previous_step: None,
            wait_hint_seconds: 5,
            task_handle: None,
            retries: 0,
            observed_instance_state: None,
            failure: None,
            target_name: target_name.into(),
            config,
            origin_callback,
        }
    }
}

/// Tagged result of executing one step.
///
/// Steps never raise: every failure mode is folded into `Retry` or
/// `Fatal`, so the driver only ever sees a state to hand back to the
/// scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step's success condition holds; move to `next`.
    Advance { next: Step, wait: u64 },

    /// Condition not yet met or the action failed transiently; stay on
    /// the current step and try again after `wait`.
    Retry { reason: String, wait: u64 },

    /// The step cannot ever succeed; route to a failure report.
    Fatal { reason: String },
}
