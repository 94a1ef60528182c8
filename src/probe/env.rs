//! Request-scoped environment for verifier processes.
//!
//! The environment is built once per request from a snapshot of the
//! service's own variables and handed to the spawn call. The process-wide
//! environment is never modified.

use std::collections::BTreeMap;
use std::path::Path;

/// Verifier endpoint override
pub const BASE_URL_VAR: &str = "CODEX_SYNC_BASE_URL";
/// Lets the verifier talk to plain-HTTP endpoints inside the sandbox
pub const ALLOW_INSECURE_VAR: &str = "CODEX_SYNC_ALLOW_INSECURE";
/// Makes the verifier's own sync step non-fatal
pub const OPTIONAL_SYNC_VAR: &str = "CODEX_SYNC_OPTIONAL";

/// Environment handed to every process of one probe request
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeEnvironment {
    vars: BTreeMap<String, String>,
}

impl ProbeEnvironment {
    /// Build from the current process environment
    ///
    /// Variables whose name or value is not valid UTF-8 are not inherited.
    pub fn from_current(home: &Path, base_url: Option<&str>, default_base_url: &str) -> Self {
        let inherited = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Self::from_vars(inherited, home, base_url, default_base_url)
    }

    /// Build from an explicit set of inherited variables
    ///
    /// - `HOME` always points at the sandbox
    /// - the endpoint is the request override, else the inherited value,
    ///   else `default_base_url`
    /// - the advisory flags are set to `1` unless already inherited
    pub fn from_vars<I>(inherited: I, home: &Path, base_url: Option<&str>, default_base_url: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: BTreeMap<String, String> = inherited.into_iter().collect();

        vars.insert("HOME".to_string(), home.to_string_lossy().into_owned());

        let base_url = base_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .or_else(|| vars.get(BASE_URL_VAR).filter(|v| !v.is_empty()).cloned())
            .unwrap_or_else(|| default_base_url.to_string());
        vars.insert(BASE_URL_VAR.to_string(), base_url);

        vars.entry(ALLOW_INSECURE_VAR.to_string())
            .or_insert_with(|| "1".to_string());
        vars.entry(OPTIONAL_SYNC_VAR.to_string())
            .or_insert_with(|| "1".to_string());

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}
