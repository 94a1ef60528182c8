//! Liveness check and best-effort version reporting for the verifier binary.

use super::env::ProbeEnvironment;
use super::error::{ProbeError, ProbeResult};
use crate::tools::{CommandSpec, ExecutionError, ExecutionTimeout, ProcessLauncher};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Reported when the version cannot be determined
pub const UNKNOWN_VERSION: &str = "unknown";

/// Upper bound for a single version/liveness invocation
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `<binary> <flag>` for liveness and version reporting
#[derive(Debug, Clone)]
pub struct VersionProbe {
    binary: PathBuf,
    flag: String,
    timeout: ExecutionTimeout,
}

impl VersionProbe {
    pub fn new(binary: impl Into<PathBuf>, flag: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            flag: flag.into(),
            timeout: ExecutionTimeout::new(VERSION_TIMEOUT),
        }
    }

    /// Cap each invocation at `timeout` when it is shorter than the default
    pub fn bounded_by(mut self, timeout: ExecutionTimeout) -> Self {
        if timeout.duration() < self.timeout.duration() {
            self.timeout = timeout;
        }
        self
    }

    fn spec(&self, env: &ProbeEnvironment) -> CommandSpec {
        CommandSpec::new(self.binary.clone(), vec![self.flag.clone()], env.vars().clone())
    }

    /// Fail with `ToolUnavailable` unless the binary runs and exits zero
    pub async fn check_liveness(
        &self,
        launcher: &dyn ProcessLauncher,
        env: &ProbeEnvironment,
    ) -> ProbeResult<()> {
        match launcher.run(&self.spec(env), self.timeout).await {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => {
                warn!("Verifier liveness check failed: {}", result.summary());
                Err(ProbeError::ToolUnavailable(format!(
                    "{} {} exited with {:?}",
                    self.binary.display(),
                    self.flag,
                    result.exit_code
                )))
            }
            Err(ExecutionError::TimedOut(after)) => Err(ProbeError::ToolUnavailable(format!(
                "{} {} did not answer within {:?}",
                self.binary.display(),
                self.flag,
                after
            ))),
            Err(e) => {
                warn!("Verifier liveness check could not run: {}", e);
                Err(ProbeError::ToolUnavailable(e.to_string()))
            }
        }
    }

    /// The verifier's reported version, or `unknown`. Never fails.
    pub async fn version(&self, launcher: &dyn ProcessLauncher, env: &ProbeEnvironment) -> String {
        match launcher.run(&self.spec(env), self.timeout).await {
            Ok(result) if result.success() => parse_version(&result.stdout),
            Ok(result) => {
                debug!("Version probe exited with {:?}", result.exit_code);
                UNKNOWN_VERSION.to_string()
            }
            Err(e) => {
                debug!("Version probe failed: {}", e);
                UNKNOWN_VERSION.to_string()
            }
        }
    }
}

/// Last whitespace-separated word of the output, e.g. `cdx wrapper 1.4.2` -> `1.4.2`
pub fn parse_version(stdout: &str) -> String {
    stdout
        .split_whitespace()
        .last()
        .unwrap_or(UNKNOWN_VERSION)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::RawProbeResult;
    use async_trait::async_trait;
    use std::path::Path;

    struct Scripted(Result<RawProbeResult, fn() -> ExecutionError>);

    #[async_trait]
    impl ProcessLauncher for Scripted {
        async fn run(
            &self,
            spec: &CommandSpec,
            _timeout: ExecutionTimeout,
        ) -> Result<RawProbeResult, ExecutionError> {
            assert_eq!(spec.args, vec!["--wrapper-version".to_string()]);
            match &self.0 {
                Ok(result) => Ok(result.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn exited(code: i32, stdout: &str) -> Scripted {
        Scripted(Ok(RawProbeResult {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed_ms: 1,
        }))
    }

    fn env() -> ProbeEnvironment {
        ProbeEnvironment::from_vars(Vec::new(), Path::new("/h"), None, "http://api")
    }

    fn probe() -> VersionProbe {
        VersionProbe::new("/app/cdx", "--wrapper-version")
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("cdx wrapper 1.4.2\n"), "1.4.2");
        assert_eq!(parse_version("0.9.0"), "0.9.0");
        assert_eq!(parse_version("   \n"), UNKNOWN_VERSION);
        assert_eq!(parse_version(""), UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_version_success() {
        let v = probe().version(&exited(0, "cdx 2.0.1\n"), &env()).await;
        assert_eq!(v, "2.0.1");
    }

    #[tokio::test]
    async fn test_version_nonzero_is_unknown() {
        let v = probe().version(&exited(2, "cdx 2.0.1\n"), &env()).await;
        assert_eq!(v, UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_version_spawn_failure_is_unknown() {
        let launcher = Scripted(Err(|| {
            ExecutionError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        }));
        assert_eq!(probe().version(&launcher, &env()).await, UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_liveness_ok() {
        assert!(probe().check_liveness(&exited(0, "1.0"), &env()).await.is_ok());
    }

    #[tokio::test]
    async fn test_liveness_nonzero_is_tool_unavailable() {
        let err = probe()
            .check_liveness(&exited(127, ""), &env())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_liveness_timeout_is_tool_unavailable() {
        let launcher = Scripted(Err(|| ExecutionError::TimedOut(VERSION_TIMEOUT)));
        let err = probe().check_liveness(&launcher, &env()).await.unwrap_err();
        assert!(matches!(err, ProbeError::ToolUnavailable(_)));
    }

    #[test]
    fn test_bounded_by() {
        let p = probe().bounded_by(ExecutionTimeout::new(Duration::from_secs(1)));
        assert_eq!(p.timeout.duration(), Duration::from_secs(1));

        let p = probe().bounded_by(ExecutionTimeout::new(Duration::from_secs(30)));
        assert_eq!(p.timeout.duration(), VERSION_TIMEOUT);
    }
}
