//! Probe Command Validation Module
//!
//! This module decides which verifier command line a probe may run.
//! Commands are never interpreted by a shell, and every caller-influenced
//! token must match a strict character allow-list.

use serde::{Deserialize, Serialize};

/// Error types for command validation
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandValidationError {
    #[error("invalid probe token")]
    InvalidProbeToken,

    #[error("invalid probe arg")]
    InvalidProbeArg,

    #[error("probe subcommand '{0}' is not in the allowed list")]
    NotAllowed(String),

    #[error("probe selection is disabled; this runner uses a fixed probe command")]
    SelectorNotPermitted,

    #[error("probe command is empty")]
    EmptyCommand,
}

/// How the probe command line is chosen
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbePolicy {
    /// Always run the configured diagnostic command and require the marker
    #[default]
    Fixed,
    /// Run a caller-selected subcommand whose tokens pass the allow-list
    AllowList,
}

impl ProbePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbePolicy::Fixed => "fixed",
            ProbePolicy::AllowList => "allow_list",
        }
    }
}

impl std::str::FromStr for ProbePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(ProbePolicy::Fixed),
            "allow_list" | "allow-list" | "allowlist" => Ok(ProbePolicy::AllowList),
            other => Err(format!(
                "Invalid probe policy: {}. Must be 'fixed' or 'allow_list'",
                other
            )),
        }
    }
}

/// Verifier arguments that have passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct SafeCommand {
    /// Arguments passed to the verifier binary, in order
    pub args: Vec<String>,
}

impl SafeCommand {
    /// Create a new safe command
    ///
    /// This should only be called after validation via CommandValidator.
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

/// Check a single token against `^[A-Za-z0-9._:-]+$`
pub fn is_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '_' | '-'))
}

/// Command validator that enforces the probe policy
///
/// # Security Principles
///
/// 1. **Fixed by default**: callers cannot choose what the verifier runs
/// 2. **No Shell Injection**: tokens are passed as a list, never through a shell
/// 3. **Token Allow-list**: caller tokens may only contain `A-Z a-z 0-9 . : _ -`
/// 4. **Optional subcommand whitelist**: narrows the allow-list policy further
#[derive(Debug, Clone)]
pub struct CommandValidator {
    policy: ProbePolicy,

    /// Arguments used under the fixed policy
    fixed_args: Vec<String>,

    /// Subcommand used when the caller names none
    default_subcommand: String,

    /// Arguments used when the caller passes none
    default_args: Vec<String>,

    /// Permitted subcommands; empty means any token-safe subcommand
    allowed_subcommands: Vec<String>,
}

impl CommandValidator {
    /// Validator for the fixed policy
    pub fn fixed(fixed_args: Vec<String>) -> Self {
        Self {
            policy: ProbePolicy::Fixed,
            fixed_args,
            default_subcommand: "login".to_string(),
            default_args: vec!["status".to_string()],
            allowed_subcommands: Vec::new(),
        }
    }

    /// Validator for the allow-list policy
    pub fn allow_list(default_subcommand: impl Into<String>, default_args: Vec<String>) -> Self {
        Self {
            policy: ProbePolicy::AllowList,
            fixed_args: Vec::new(),
            default_subcommand: default_subcommand.into(),
            default_args,
            allowed_subcommands: Vec::new(),
        }
    }

    /// Restrict the allow-list policy to the given subcommands
    pub fn with_allowed_subcommands(mut self, allowed: Vec<String>) -> Self {
        self.allowed_subcommands = allowed;
        self
    }

    pub fn policy(&self) -> ProbePolicy {
        self.policy
    }

    /// Resolve the verifier arguments for one request
    ///
    /// An empty subcommand or an empty argument list counts as not given.
    ///
    /// # Example
    ///
    /// ```
    /// use authprobe::tools::CommandValidator;
    ///
    /// let validator = CommandValidator::allow_list("login", vec!["status".to_string()]);
    /// let safe = validator.validate(None, None).unwrap();
    /// assert_eq!(safe.args, vec!["login", "status"]);
    ///
    /// assert!(validator.validate(Some("login;rm"), None).is_err());
    /// ```
    pub fn validate(
        &self,
        probe: Option<&str>,
        probe_args: Option<&[String]>,
    ) -> Result<SafeCommand, CommandValidationError> {
        let probe = probe.filter(|p| !p.is_empty());
        let probe_args = probe_args.filter(|a| !a.is_empty());

        match self.policy {
            ProbePolicy::Fixed => {
                if probe.is_some() || probe_args.is_some() {
                    return Err(CommandValidationError::SelectorNotPermitted);
                }
                if self.fixed_args.is_empty() {
                    return Err(CommandValidationError::EmptyCommand);
                }
                Ok(SafeCommand::new(self.fixed_args.clone()))
            }
            ProbePolicy::AllowList => {
                let subcommand = probe.unwrap_or(&self.default_subcommand);
                if !is_safe_token(subcommand) {
                    return Err(CommandValidationError::InvalidProbeToken);
                }
                self.check_whitelist(subcommand)?;

                let args = match probe_args {
                    Some(args) => args,
                    None => self.default_args.as_slice(),
                };

                let mut tokens = Vec::with_capacity(args.len() + 1);
                tokens.push(subcommand.to_string());
                for arg in args {
                    if !is_safe_token(arg) {
                        return Err(CommandValidationError::InvalidProbeArg);
                    }
                    tokens.push(arg.clone());
                }
                Ok(SafeCommand::new(tokens))
            }
        }
    }

    fn check_whitelist(&self, subcommand: &str) -> Result<(), CommandValidationError> {
        if self.allowed_subcommands.is_empty() || self.is_allowed(subcommand) {
            Ok(())
        } else {
            Err(CommandValidationError::NotAllowed(subcommand.to_string()))
        }
    }

    /// Check if a subcommand is in the whitelist
    pub fn is_allowed(&self, subcommand: &str) -> bool {
        self.allowed_subcommands.iter().any(|s| s == subcommand)
    }
}
