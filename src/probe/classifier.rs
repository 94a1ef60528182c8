//! Maps a finished probe into the outcome returned to callers.

use super::credential::{CredentialDocument, MutationStatus};
use crate::tools::{ProbePolicy, RawProbeResult};
use serde::{Deserialize, Serialize};

/// Default bound on `reason`, in characters
pub const DEFAULT_REASON_LIMIT: usize = 400;

const PROBE_FAILED: &str = "probe failed";
const MARKER_MISSING: &str = "expected marker not found in probe output";
const CREDENTIAL_CHANGED: &str = "credential changed during probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Fail,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Ok => "ok",
            ProbeStatus::Fail => "fail",
        }
    }
}

/// Result of one verification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,

    /// True exactly when the verifier accepted the credential
    pub reachable: bool,

    /// Wall-clock time of the probe invocation alone
    pub latency_ms: u64,

    /// Verifier version, or `unknown`
    pub wrapper_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Present when the verifier rewrote the credential file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_auth: Option<CredentialDocument>,
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// Decision table for probe results
#[derive(Debug, Clone)]
pub struct ResultClassifier {
    policy: ProbePolicy,
    marker: Option<String>,
    reason_limit: usize,
}

impl ResultClassifier {
    /// `marker` is only consulted under the fixed policy
    pub fn new(policy: ProbePolicy, marker: Option<String>, reason_limit: usize) -> Self {
        Self {
            policy,
            marker: marker.filter(|m| !m.is_empty()),
            reason_limit: reason_limit.max(1),
        }
    }

    fn required_marker(&self) -> Option<&str> {
        match self.policy {
            ProbePolicy::Fixed => self.marker.as_deref(),
            ProbePolicy::AllowList => None,
        }
    }

    pub fn classify(
        &self,
        raw: &RawProbeResult,
        mutation: MutationStatus,
        wrapper_version: String,
    ) -> ProbeOutcome {
        let changed = mutation.is_changed();
        let annotate_rotation = changed && self.policy == ProbePolicy::Fixed;

        let (status, mut reason) = if !raw.success() {
            let fallback = if annotate_rotation {
                CREDENTIAL_CHANGED
            } else {
                PROBE_FAILED
            };
            (ProbeStatus::Fail, Some(self.reason(raw, fallback)))
        } else if let Some(marker) = self.required_marker() {
            if raw.stdout.contains(marker) {
                (ProbeStatus::Ok, None)
            } else {
                (ProbeStatus::Fail, Some(self.reason(raw, MARKER_MISSING)))
            }
        } else {
            (ProbeStatus::Ok, None)
        };

        if annotate_rotation && reason.is_none() {
            reason = Some(CREDENTIAL_CHANGED.to_string());
        }

        ProbeOutcome {
            status,
            reachable: status == ProbeStatus::Ok,
            latency_ms: raw.elapsed_ms,
            wrapper_version,
            reason,
            updated_auth: mutation.updated(),
        }
    }

    /// Trimmed stderr then stdout, newline-joined and bounded
    fn reason(&self, raw: &RawProbeResult, fallback: &str) -> String {
        let message = [raw.stderr.trim(), raw.stdout.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if message.is_empty() {
            fallback.to_string()
        } else {
            truncate_chars(&message, self.reason_limit)
        }
    }
}

/// First `limit` characters of `s`
pub fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
