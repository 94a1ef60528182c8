// Credential probe
//
// A probe takes a caller-supplied credential document, places it inside a
// throwaway home directory, runs the verifier binary once against it under a
// scrubbed environment and a wall-clock budget, and reports:
// - whether the verifier accepted the credential
// - how long the invocation took
// - the verifier's version
// - any rewritten credential document left behind by the verifier
//
// Nothing outlives the request: the sandbox and every process spawned for
// it are gone by the time `ProbeEngine::verify` returns.

pub mod classifier;
pub mod credential;
pub mod engine;
pub mod env;
pub mod error;
pub mod sandbox;
pub mod version;

pub use classifier::{ProbeOutcome, ProbeStatus, ResultClassifier, DEFAULT_REASON_LIMIT};
pub use credential::{extract_token, CredentialDocument, MutationStatus, CREDENTIAL_FILE};
pub use engine::{ProbeEngine, ProbeRequest};
pub use env::ProbeEnvironment;
pub use error::{ProbeError, ProbeResult};
pub use sandbox::{Sandbox, SandboxFactory, CREDENTIAL_HOME_DIR};
pub use version::{parse_version, VersionProbe, UNKNOWN_VERSION};
