//! The probe engine: one sandboxed verifier run per request.

use super::classifier::{ProbeOutcome, ResultClassifier};
use super::credential::{self, CredentialDocument};
use super::env::ProbeEnvironment;
use super::error::{ProbeError, ProbeResult};
use super::sandbox::SandboxFactory;
use super::version::VersionProbe;
use crate::config::ProbeConfig;
use crate::metrics;
use crate::tools::{
    CommandSpec, CommandValidator, ExecutionError, ExecutionTimeout, ProbePolicy, ProcessLauncher,
    ToolExecutor,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Input to a verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// The credential document under test; must be a JSON object
    pub auth_json: Value,

    /// Endpoint override for the verifier
    #[serde(default)]
    pub base_url: Option<String>,

    /// Subcommand (allow-list policy only)
    #[serde(default)]
    pub probe: Option<String>,

    /// Subcommand arguments (allow-list policy only)
    #[serde(default)]
    pub probe_args: Option<Vec<String>>,

    /// Probe budget override in seconds
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

impl ProbeRequest {
    pub fn new(auth_json: Value) -> Self {
        Self {
            auth_json,
            base_url: None,
            probe: None,
            probe_args: None,
            timeout_seconds: None,
        }
    }
}

/// Runs verifier probes
///
/// The engine holds no per-request state; concurrent calls to
/// [`ProbeEngine::verify`] share nothing but the launcher.
pub struct ProbeEngine {
    launcher: Arc<dyn ProcessLauncher>,
    sandboxes: SandboxFactory,
    validator: CommandValidator,
    classifier: ResultClassifier,
    version_probe: VersionProbe,
    binary: PathBuf,
    default_base_url: String,
    default_timeout_secs: f64,
    max_timeout_secs: f64,
    debug_dump: Option<PathBuf>,
}

impl ProbeEngine {
    /// Build an engine that spawns real processes
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::with_launcher(config, Arc::new(ToolExecutor::new()))
    }

    /// Build an engine around a custom launcher
    pub fn with_launcher(config: &ProbeConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let validator = match config.policy {
            ProbePolicy::Fixed => CommandValidator::fixed(config.fixed_args.clone()),
            ProbePolicy::AllowList => CommandValidator::allow_list(
                config.default_subcommand.clone(),
                config.default_args.clone(),
            )
            .with_allowed_subcommands(config.allowed_subcommands.clone()),
        };

        let sandboxes = match &config.sandbox_root {
            Some(root) => SandboxFactory::with_root(root),
            None => SandboxFactory::new(),
        };

        let debug_dump = config
            .debug_dump
            .enabled
            .then(|| PathBuf::from(&config.debug_dump.path));
        if let Some(path) = &debug_dump {
            warn!(
                "Credential debug dump is ENABLED; raw auth documents will be written to {:?}",
                path
            );
        }

        Self {
            launcher,
            sandboxes,
            validator,
            classifier: ResultClassifier::new(
                config.policy,
                Some(config.marker.clone()),
                config.reason_limit,
            ),
            version_probe: VersionProbe::new(&config.binary, config.liveness_flag.clone()),
            binary: PathBuf::from(&config.binary),
            default_base_url: config.default_base_url.clone(),
            default_timeout_secs: config.default_timeout_secs,
            max_timeout_secs: config.max_timeout_secs,
            debug_dump,
        }
    }

    pub fn policy(&self) -> ProbePolicy {
        self.validator.policy()
    }

    /// Verify one credential document
    ///
    /// Returns an outcome for every probe that ran to completion, including
    /// probes that reported failure. Errors are reserved for requests that
    /// could not be probed at all.
    pub async fn verify(&self, request: ProbeRequest) -> ProbeResult<ProbeOutcome> {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("probe", %request_id);

        let result = self.run(request).instrument(span.clone()).await;

        let _entered = span.enter();
        match &result {
            Ok(outcome) => {
                metrics::PROBES_TOTAL
                    .with_label_values(&[outcome.status.as_str()])
                    .inc();
                metrics::PROBE_DURATION_SECONDS.observe(outcome.latency_ms as f64 / 1000.0);
                if outcome.updated_auth.is_some() {
                    metrics::CREDENTIAL_ROTATIONS_TOTAL.inc();
                }
                info!(
                    status = outcome.status.as_str(),
                    latency_ms = outcome.latency_ms,
                    version = %outcome.wrapper_version,
                    rotated = outcome.updated_auth.is_some(),
                    "Probe finished"
                );
            }
            Err(e) => {
                metrics::PROBE_ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
                warn!(kind = e.kind(), "Probe aborted: {}", e);
            }
        }
        result
    }

    async fn run(&self, request: ProbeRequest) -> ProbeResult<ProbeOutcome> {
        // Everything that can be rejected is rejected before touching disk
        let doc =
            CredentialDocument::from_value(request.auth_json).ok_or(ProbeError::InvalidCredential)?;
        if credential::extract_token(&doc).is_none() {
            return Err(ProbeError::InvalidCredential);
        }
        let command = self
            .validator
            .validate(request.probe.as_deref(), request.probe_args.as_deref())?;
        let timeout = ExecutionTimeout::resolve(
            request.timeout_seconds,
            self.default_timeout_secs,
            self.max_timeout_secs,
        )?;

        let sandboxes = self.sandboxes.clone();
        let debug_dump = self.debug_dump.clone();
        let injected = doc.clone();
        let (sandbox, auth_path) = run_blocking(move || {
            if let Some(path) = &debug_dump {
                credential::dump_for_debug(&injected, path);
            }
            // Dropping the sandbox on an inject failure removes it
            let sandbox = sandboxes.create()?;
            let auth_path = credential::inject(&sandbox, &injected)?;
            Ok((sandbox, auth_path))
        })
        .await?;

        let env = ProbeEnvironment::from_current(
            sandbox.home(),
            request.base_url.as_deref(),
            &self.default_base_url,
        );
        let result = self
            .run_in_sandbox(command.args, env, timeout, doc, auth_path)
            .await;

        run_blocking(move || {
            sandbox.destroy();
            Ok(())
        })
        .await?;
        result
    }

    /// Liveness, the verifier run itself, then mutation and version
    async fn run_in_sandbox(
        &self,
        args: Vec<String>,
        env: ProbeEnvironment,
        timeout: ExecutionTimeout,
        doc: CredentialDocument,
        auth_path: PathBuf,
    ) -> ProbeResult<ProbeOutcome> {
        let version_probe = self.version_probe.clone().bounded_by(timeout);
        version_probe
            .check_liveness(self.launcher.as_ref(), &env)
            .await?;

        let spec = CommandSpec::new(self.binary.clone(), args, env.vars().clone());
        debug!("Running probe with budget {:?}", timeout.duration());
        let raw = self
            .launcher
            .run(&spec, timeout)
            .await
            .map_err(|e| match e {
                ExecutionError::TimedOut(after) => ProbeError::ProbeTimeout(after),
                ExecutionError::Spawn { .. } => ProbeError::ToolUnavailable(e.to_string()),
                ExecutionError::Io(_) => ProbeError::Internal(e.to_string()),
            })?;

        let mutation =
            run_blocking(move || Ok(credential::detect_mutation(&doc, &auth_path))).await?;
        let version = version_probe.version(self.launcher.as_ref(), &env).await;
        Ok(self.classifier.classify(&raw, mutation, version))
    }
}

/// Run filesystem work on the blocking pool
async fn run_blocking<T, F>(task: F) -> ProbeResult<T>
where
    F: FnOnce() -> ProbeResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ProbeError::Internal(format!("blocking task failed: {}", e)))?
}
