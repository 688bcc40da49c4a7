//! Network-level policy: authentication scheme, management credential,
//! capacity, and discoverability.

use agentmesh_types::config::{AuthScheme, CredentialSource, NetworkProfile};
use agentmesh_types::error::{MeshError, MeshResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use subtle::ConstantTimeEq;
use tracing::info;

/// Validates credentials and holds the hot-reloadable policy knobs.
///
/// Capacity is enforced at a single choke point, inside
/// `AgentRegistry::register`; no other component re-checks it.
pub struct PolicyEnforcer {
    scheme: AuthScheme,
    /// Resolved management credential.
    credential: String,
    /// Maximum concurrent agents; hot-reloadable.
    capacity: AtomicUsize,
    /// Whether the network answers discovery queries; hot-reloadable.
    discoverable: AtomicBool,
}

impl PolicyEnforcer {
    /// Build from a profile, resolving credential indirection against the
    /// process environment.
    ///
    /// An `env:` reference to an unset variable is a configuration error:
    /// the network must not start with a silently empty credential.
    pub fn from_profile(profile: &NetworkProfile) -> MeshResult<Self> {
        let credential = match &profile.management_token {
            CredentialSource::Literal(value) => value.clone(),
            CredentialSource::Env(var) => std::env::var(var).map_err(|_| {
                MeshError::Config(format!(
                    "management token references unset environment variable '{var}'"
                ))
            })?,
        };
        if profile.authentication == AuthScheme::Token && credential.is_empty() {
            return Err(MeshError::Config(
                "token authentication requires a non-empty management token".to_string(),
            ));
        }
        Ok(Self {
            scheme: profile.authentication,
            credential,
            capacity: AtomicUsize::new(profile.capacity),
            discoverable: AtomicBool::new(profile.discoverable),
        })
    }

    /// The authentication scheme in effect.
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// Check a presented credential against the authentication scheme.
    ///
    /// Rejection has no side effects, so failed attempts are retry-safe.
    pub fn authorize(&self, presented: Option<&str>) -> MeshResult<()> {
        match self.scheme {
            AuthScheme::None => Ok(()),
            AuthScheme::Token => {
                let presented =
                    presented.ok_or_else(|| MeshError::Auth("credential required".to_string()))?;
                let matches: bool = presented
                    .as_bytes()
                    .ct_eq(self.credential.as_bytes())
                    .into();
                if matches {
                    Ok(())
                } else {
                    Err(MeshError::Auth("invalid credential".to_string()))
                }
            }
        }
    }

    /// Current capacity limit.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Hot-reload the capacity limit. Existing agents are never evicted.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        info!(capacity, "Capacity updated");
    }

    /// Whether the network currently advertises itself.
    pub fn discoverable(&self) -> bool {
        self.discoverable.load(Ordering::Relaxed)
    }

    /// Hot-reload the discoverable flag.
    pub fn set_discoverable(&self, discoverable: bool) {
        self.discoverable.store(discoverable, Ordering::Relaxed);
        info!(discoverable, "Discoverability updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(scheme: AuthScheme, token: CredentialSource) -> NetworkProfile {
        NetworkProfile {
            authentication: scheme,
            management_token: token,
            capacity: 4,
            discoverable: true,
            ..NetworkProfile::default()
        }
    }

    #[test]
    fn test_none_scheme_admits_everyone() {
        let policy =
            PolicyEnforcer::from_profile(&profile(AuthScheme::None, CredentialSource::default()))
                .unwrap();
        assert!(policy.authorize(None).is_ok());
        assert!(policy.authorize(Some("anything")).is_ok());
    }

    #[test]
    fn test_token_scheme_requires_exact_match() {
        let policy = PolicyEnforcer::from_profile(&profile(
            AuthScheme::Token,
            CredentialSource::Literal("s3cret".to_string()),
        ))
        .unwrap();
        assert_eq!(policy.scheme(), AuthScheme::Token);
        assert!(policy.authorize(Some("s3cret")).is_ok());
        assert!(matches!(
            policy.authorize(Some("wrong")),
            Err(MeshError::Auth(_))
        ));
        assert!(matches!(policy.authorize(None), Err(MeshError::Auth(_))));
        // Rejection leaves the enforcer unchanged; a correct retry succeeds.
        assert!(policy.authorize(Some("s3cret")).is_ok());
    }

    #[test]
    fn test_empty_token_with_token_scheme_is_config_error() {
        let result = PolicyEnforcer::from_profile(&profile(
            AuthScheme::Token,
            CredentialSource::Literal(String::new()),
        ));
        assert!(matches!(result, Err(MeshError::Config(_))));
    }

    #[test]
    fn test_env_credential_resolution() {
        std::env::set_var("MESH_TEST_TOKEN_SET", "from-env");
        let policy = PolicyEnforcer::from_profile(&profile(
            AuthScheme::Token,
            CredentialSource::Env("MESH_TEST_TOKEN_SET".to_string()),
        ))
        .unwrap();
        assert!(policy.authorize(Some("from-env")).is_ok());
    }

    #[test]
    fn test_unset_env_credential_is_config_error() {
        std::env::remove_var("MESH_TEST_TOKEN_UNSET");
        let result = PolicyEnforcer::from_profile(&profile(
            AuthScheme::Token,
            CredentialSource::Env("MESH_TEST_TOKEN_UNSET".to_string()),
        ));
        assert!(matches!(result, Err(MeshError::Config(_))));
    }

    #[test]
    fn test_hot_reload_knobs() {
        let policy =
            PolicyEnforcer::from_profile(&profile(AuthScheme::None, CredentialSource::default()))
                .unwrap();
        assert_eq!(policy.capacity(), 4);
        policy.set_capacity(16);
        assert_eq!(policy.capacity(), 16);

        assert!(policy.discoverable());
        policy.set_discoverable(false);
        assert!(!policy.discoverable());
    }
}
