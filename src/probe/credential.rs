//! Credential documents: injection into a sandbox, token precheck, and
//! detection of rotation performed by the verifier.

use super::error::{ProbeError, ProbeResult};
use super::sandbox::Sandbox;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name the verifier reads inside its credential home
pub const CREDENTIAL_FILE: &str = "auth.json";

/// An opaque JSON object holding the secret bundle under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialDocument(Map<String, Value>);

impl CredentialDocument {
    /// Accept any JSON value that is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// A pure lookup of a usable token in an untyped document
pub type TokenStrategy = fn(&Map<String, Value>) -> Option<String>;

/// Token lookups, in priority order
pub const TOKEN_STRATEGIES: &[(&str, TokenStrategy)] = &[
    ("auths.<target>.token", per_target_token),
    ("tokens.access_token / api key", flat_token),
];

fn non_empty(value: Option<&Value>) -> Option<String> {
    let token = value?.as_str()?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// `{"auths": {"api.example.com": {"token": "..."}}}`
fn per_target_token(doc: &Map<String, Value>) -> Option<String> {
    doc.get("auths")?
        .as_object()?
        .values()
        .find_map(|entry| non_empty(entry.as_object()?.get("token")))
}

/// `{"tokens": {"access_token": "..."}}`, `{"tokens": {"api_key": "..."}}`
/// or `{"OPENAI_API_KEY": "..."}`
fn flat_token(doc: &Map<String, Value>) -> Option<String> {
    let tokens = doc.get("tokens").and_then(Value::as_object);
    tokens
        .and_then(|t| non_empty(t.get("access_token")))
        .or_else(|| tokens.and_then(|t| non_empty(t.get("api_key"))))
        .or_else(|| non_empty(doc.get("OPENAI_API_KEY")))
}

/// First non-empty token found by the strategies, in order
pub fn extract_token(doc: &CredentialDocument) -> Option<String> {
    TOKEN_STRATEGIES.iter().find_map(|(name, strategy)| {
        let token = strategy(doc.as_map());
        if token.is_some() {
            debug!("Credential token found via {}", name);
        }
        token
    })
}

/// Write the document to the sandbox's credential file with owner-only
/// permissions, returning the file path.
pub fn inject(sandbox: &Sandbox, doc: &CredentialDocument) -> ProbeResult<PathBuf> {
    let path = sandbox.credential_home().join(CREDENTIAL_FILE);
    let body = serde_json::to_vec(doc)
        .map_err(|e| ProbeError::Internal(format!("failed to encode auth_json: {}", e)))?;

    write_private(&path, &body).map_err(|source| ProbeError::WriteError {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    // `mode` only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(body)?;
    file.sync_all()
}

/// What the credential file looks like after the probe
#[derive(Debug, Clone, PartialEq)]
pub enum MutationStatus {
    /// Structurally identical to what was injected
    Unchanged,
    /// The verifier rewrote the file with a different object
    Changed(CredentialDocument),
    /// Missing, unreadable, not JSON, or not an object
    Undetermined,
}

impl MutationStatus {
    /// The rotated document, if any. `Undetermined` counts as unchanged.
    pub fn updated(self) -> Option<CredentialDocument> {
        match self {
            MutationStatus::Changed(doc) => Some(doc),
            MutationStatus::Unchanged | MutationStatus::Undetermined => None,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, MutationStatus::Changed(_))
    }
}

/// Re-read the credential file and compare it to what was injected
pub fn detect_mutation(original: &CredentialDocument, path: &Path) -> MutationStatus {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Credential re-read failed for {:?}: {}", path, e);
            return MutationStatus::Undetermined;
        }
    };
    let current = match serde_json::from_slice::<Value>(&raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("Credential re-read is not JSON: {}", e);
            return MutationStatus::Undetermined;
        }
    };
    match CredentialDocument::from_value(current) {
        Some(doc) if doc == *original => MutationStatus::Unchanged,
        Some(doc) => {
            info!("Credential file was rewritten during probe");
            MutationStatus::Changed(doc)
        }
        None => MutationStatus::Undetermined,
    }
}

/// Persist the raw document to an operator-chosen path outside the sandbox.
///
/// Best-effort: failures are logged and ignored.
pub fn dump_for_debug(doc: &CredentialDocument, path: &Path) {
    let body = match serde_json::to_vec_pretty(doc) {
        Ok(body) => body,
        Err(e) => {
            warn!("Debug credential dump skipped: {}", e);
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Debug credential dump skipped: {}", e);
            return;
        }
    }
    match write_private(path, &body) {
        Ok(()) => warn!("Debug credential dump written to {:?}", path),
        Err(e) => warn!("Debug credential dump to {:?} failed: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::sandbox::SandboxFactory;
    use serde_json::json;

    fn doc(value: Value) -> CredentialDocument {
        CredentialDocument::from_value(value).unwrap()
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(CredentialDocument::from_value(json!({})).is_some());
        assert!(CredentialDocument::from_value(json!([])).is_none());
        assert!(CredentialDocument::from_value(json!("token")).is_none());
        assert!(CredentialDocument::from_value(Value::Null).is_none());
    }

    #[test]
    fn test_extract_per_target_token() {
        let d = doc(json!({"auths": {"api.openai.com": {"token": " tok-1 "}}}));
        assert_eq!(extract_token(&d), Some("tok-1".to_string()));
    }

    #[test]
    fn test_extract_skips_empty_target_entries() {
        let d = doc(json!({"auths": {
            "a.example": {"token": ""},
            "b.example": {"token": "tok-b"}
        }}));
        assert_eq!(extract_token(&d), Some("tok-b".to_string()));
    }

    #[test]
    fn test_extract_flat_tokens() {
        let d = doc(json!({"tokens": {"access_token": "abc"}}));
        assert_eq!(extract_token(&d), Some("abc".to_string()));

        let d = doc(json!({"tokens": {"api_key": "key"}}));
        assert_eq!(extract_token(&d), Some("key".to_string()));

        let d = doc(json!({"OPENAI_API_KEY": "sk-1"}));
        assert_eq!(extract_token(&d), Some("sk-1".to_string()));
    }

    #[test]
    fn test_extract_prefers_per_target() {
        let d = doc(json!({
            "tokens": {"access_token": "flat"},
            "auths": {"api.openai.com": {"token": "nested"}}
        }));
        assert_eq!(extract_token(&d), Some("nested".to_string()));
    }

    #[test]
    fn test_extract_falls_back_when_per_target_empty() {
        let d = doc(json!({
            "auths": {"api.openai.com": {"token": "   "}},
            "tokens": {"access_token": "flat"}
        }));
        assert_eq!(extract_token(&d), Some("flat".to_string()));
    }

    #[test]
    fn test_extract_none() {
        for value in [
            json!({}),
            json!({"auths": {}}),
            json!({"auths": {"x": "not-an-object"}}),
            json!({"auths": {"x": {"token": 42}}}),
            json!({"tokens": {"access_token": null}}),
            json!({"tokens": "abc"}),
            json!({"OPENAI_API_KEY": ""}),
            json!({"refresh_token": "only-refresh"}),
        ] {
            assert_eq!(extract_token(&doc(value.clone())), None, "{}", value);
        }
    }

    #[test]
    fn test_inject_writes_private_file() {
        let sandbox = SandboxFactory::new().create().unwrap();
        let d = doc(json!({"tokens": {"access_token": "abc"}}));

        let path = inject(&sandbox, &d).unwrap();
        assert_eq!(path, sandbox.credential_home().join(CREDENTIAL_FILE));

        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"tokens": {"access_token": "abc"}}));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_inject_fails_when_home_missing() {
        let sandbox = SandboxFactory::new().create().unwrap();
        fs::remove_dir_all(sandbox.credential_home()).unwrap();

        let result = inject(&sandbox, &doc(json!({})));
        assert!(matches!(result, Err(ProbeError::WriteError { .. })));
    }

    #[test]
    fn test_detect_mutation_unchanged() {
        let sandbox = SandboxFactory::new().create().unwrap();
        let d = doc(json!({"tokens": {"access_token": "abc"}, "last_refresh": "2025-01-01"}));
        let path = inject(&sandbox, &d).unwrap();

        assert_eq!(detect_mutation(&d, &path), MutationStatus::Unchanged);
    }

    #[test]
    fn test_detect_mutation_ignores_key_order_and_whitespace() {
        let sandbox = SandboxFactory::new().create().unwrap();
        let d = doc(json!({"a": 1, "b": {"c": 2}}));
        let path = inject(&sandbox, &d).unwrap();
        fs::write(&path, "{\n  \"b\": {\"c\": 2},\n  \"a\": 1\n}\n").unwrap();

        assert_eq!(detect_mutation(&d, &path), MutationStatus::Unchanged);
    }

    #[test]
    fn test_detect_mutation_changed() {
        let sandbox = SandboxFactory::new().create().unwrap();
        let d1 = doc(json!({"tokens": {"access_token": "old"}}));
        let d2 = json!({"tokens": {"access_token": "new"}, "last_refresh": "2025-02-01"});
        let path = inject(&sandbox, &d1).unwrap();
        fs::write(&path, d2.to_string()).unwrap();

        let status = detect_mutation(&d1, &path);
        assert!(status.is_changed());
        assert_eq!(status.updated().unwrap().into_value(), d2);
    }

    #[test]
    fn test_detect_mutation_undetermined() {
        let sandbox = SandboxFactory::new().create().unwrap();
        let d = doc(json!({"tokens": {"access_token": "abc"}}));
        let path = inject(&sandbox, &d).unwrap();

        fs::write(&path, "not json").unwrap();
        assert_eq!(detect_mutation(&d, &path), MutationStatus::Undetermined);

        fs::write(&path, "[1, 2]").unwrap();
        assert_eq!(detect_mutation(&d, &path), MutationStatus::Undetermined);

        fs::remove_file(&path).unwrap();
        let status = detect_mutation(&d, &path);
        assert_eq!(status, MutationStatus::Undetermined);
        assert!(status.updated().is_none());
    }

    #[test]
    fn test_dump_for_debug() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug").join("auth.json");
        let d = doc(json!({"tokens": {"access_token": "abc"}}));

        dump_for_debug(&d, &path);

        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, d.clone().into_value());
    }
}
