//! Trigger handling
//!
//! Three trigger shapes arrive here, discriminated by payload fields:
//! a teardown request (notify and return), a provisioning request (build
//! and emit the initial workflow state for the external scheduler), and
//! a workflow continuation (run exactly one step). The scheduler owns
//! all timing; this process never sleeps between steps.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use skylift_config::{CallbackContext, ProvisionConfig};
use skylift_notify::{CompletionNotifier, CompletionStatus};
use skylift_workflow::{Engine, WorkflowState};

/// Incoming trigger payload. Continuations carry a full workflow state;
/// everything else is a provisioning request.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TriggerEvent {
    Continuation(Box<WorkflowState>),
    Request(ProvisionRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// External provisioning/teardown request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub request_type: RequestType,

    /// Name of the instance to provision. Stable key for the whole run.
    pub target_name: String,

    pub config: ProvisionConfig,

    #[serde(flatten)]
    pub callback: CallbackContext,
}

/// Validate a provisioning request and build the initial workflow state.
///
/// Configuration errors are fatal here, before any provider call; this is
/// the fail-fast boundary.
pub fn start_provision(request: ProvisionRequest) -> Result<WorkflowState> {
    request
        .config
        .validate()
        .with_context(|| format!("invalid configuration for {}", request.target_name))?;

    tracing::info!("starting provisioning workflow for {}", request.target_name);
    Ok(WorkflowState::initial(
        request.target_name,
        request.config,
        request.callback,
    ))
}

/// Teardown: report success to the caller and stop. Provider-side
/// deletion is handled out of band; this path intentionally issues no
/// provider calls.
pub async fn handle_teardown(
    request: &ProvisionRequest,
    notifier: &dyn CompletionNotifier,
) -> Result<()> {
    tracing::info!("teardown requested for {}", request.target_name);
    notifier
        .notify(
            &request.callback,
            CompletionStatus::Success,
            serde_json::json!({}),
        )
        .await
        .context("teardown completion callback failed")?;
    Ok(())
}

/// Run exactly one step of a continuation.
pub async fn continue_workflow(state: WorkflowState, engine: &Engine) -> Result<WorkflowState> {
    Engine::ensure_resumable(&state)?;
    Ok(engine.advance(state).await)
}

/// Parse a raw trigger payload.
pub fn parse_event(raw: &str) -> Result<TriggerEvent> {
    let event: TriggerEvent =
        serde_json::from_str(raw).context("trigger payload matches no known shape")?;

    if let TriggerEvent::Request(request) = &event {
        if request.target_name.trim().is_empty() {
            bail!("provisioning request has an empty target name");
        }
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skylift_notify::NotifyError;
    use std::sync::Mutex;

    struct RecordingNotifier {
        sent: Mutex<Vec<CompletionStatus>>,
    }

    #[async_trait]
    impl CompletionNotifier for RecordingNotifier {
        async fn notify(
            &self,
            _callback: &CallbackContext,
            status: CompletionStatus,
            _data: serde_json::Value,
        ) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(status);
            Ok(())
        }
    }

    fn request_json(request_type: &str) -> String {
        serde_json::json!({
            "requestType": request_type,
            "targetName": "pod-01",
            "responseUrl": "https://callbacks.example.com/response",
            "stackId": "stack-1",
            "requestId": "req-1",
            "logicalResourceId": "Workshop",
            "logStreamName": "stream-abc",
            "config": {
                "orgId": "org-1",
                "region": "US_WEST_2",
                "numHosts": 4,
                "deploymentType": "SingleAZ",
                "provider": "AWS",
                "ssoDomain": "vmc.local",
                "vpcCidr": "172.31.0.0/16",
                "managementCidr": "10.2.0.0/16",
                "vxlanSubnet": "192.168.1.0/24",
                "workloadCidr": "192.168.2.0/24",
                "linkedAccount": "123456789012",
                "linkedSubnets": ["subnet-0abc"],
                "contentRepositoryName": "workshop-templates",
                "contentRepositoryURL": "https://templates.example.com/lib.json",
                "datastore": "WorkloadDatastore",
                "tlsThumbprint": "AB:CD:EF",
                "dnsServers": ["8.8.8.8"],
                "templateName": "centos_master",
                "vmName": "centos",
                "vmIp": "192.168.2.4",
                "vmSubnetMask": "255.255.255.0",
                "vmGateway": "192.168.2.1",
                "refreshTokenEnv": "SKYLIFT_REFRESH_TOKEN"
            }
        })
        .to_string()
    }

    #[test]
    fn create_request_parses_and_starts() {
        let event = parse_event(&request_json("Create")).unwrap();
        let TriggerEvent::Request(request) = event else {
            panic!("expected a provisioning request");
        };
        assert_eq!(request.request_type, RequestType::Create);

        let state = start_provision(request).unwrap();
        assert_eq!(state.target_name, "pod-01");
        assert_eq!(state.wait_hint_seconds, 5);
    }

    #[test]
    fn invalid_config_fails_before_any_provider_call() {
        let raw = request_json("Create").replace("172.31.0.0/16", "not-a-cidr");
        let event = parse_event(&raw).unwrap();
        let TriggerEvent::Request(request) = event else {
            panic!("expected a provisioning request");
        };

        assert!(start_provision(request).is_err());
    }

    #[test]
    fn continuation_is_recognized_by_step_fields() {
        let event = parse_event(&request_json("Create")).unwrap();
        let TriggerEvent::Request(request) = event else {
            panic!("expected a provisioning request");
        };
        let state = start_provision(request).unwrap();

        let raw = serde_json::to_string(&state).unwrap();
        let event = parse_event(&raw).unwrap();
        let TriggerEvent::Continuation(parsed) = event else {
            panic!("expected a continuation");
        };
        assert_eq!(*parsed, state);
    }

    #[tokio::test]
    async fn teardown_notifies_once_and_touches_nothing() {
        let event = parse_event(&request_json("Delete")).unwrap();
        let TriggerEvent::Request(request) = event else {
            panic!("expected a provisioning request");
        };
        assert_eq!(request.request_type, RequestType::Delete);

        let notifier = RecordingNotifier {
            sent: Mutex::new(Vec::new()),
        };
        handle_teardown(&request, &notifier).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[CompletionStatus::Success]);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(parse_event("{\"hello\": 1}").is_err());
        assert!(parse_event("not json").is_err());
    }
}
