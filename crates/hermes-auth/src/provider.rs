//! Identity providers: token verification and group resolution.
//!
//! A handler loads every configured provider once, at initialization, into an
//! [`IssuerMap`]. The bearer-token grant then picks a provider by the `iss`
//! claim of the incoming token.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use hermes_config::IdentityProviderConfig;
use hermes_core::CredentialRecord;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GrantError, GrantResult, ProviderError};

/// Leeway applied to `exp`/`nbf` checks, in seconds.
pub const TOKEN_LEEWAY_SECS: u64 = 300;

/// Category under which token issuers are registered.
pub const ID_PROVIDER_CATEGORY: &str = "Id";

/// Strips trailing slashes so `https://idp/` and `https://idp` match.
#[must_use]
pub fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

/// A token issuer the bearer grant can delegate to.
pub trait IdentityProvider: Send + Sync {
    /// Provider name as configured.
    fn name(&self) -> &str;

    /// Issuer URL, normalized.
    fn issuer(&self) -> &str;

    /// Verifies signature and standard claims; returns the claims.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Verification`] if the token is rejected.
    fn verify_token(&self, token: &str) -> GrantResult<Value>;

    /// Maps verified claims to a credential record with a group.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::GroupResolution`] if no group can be determined.
    fn resolve_group(&self, claims: &Value, token: &str) -> GrantResult<CredentialRecord>;
}

/// Where identity providers come from.
pub trait IdentityProviderRegistry: Send + Sync {
    /// Names of the providers registered under `category`.
    fn provider_names(&self, category: &str) -> Vec<String>;

    /// Builds the named provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider is unknown or misconfigured.
    fn load_provider(&self, name: &str) -> Result<Arc<dyn IdentityProvider>, ProviderError>;
}

/// Issuer to provider mapping held by a handler class.
#[derive(Clone, Default)]
pub struct IssuerMap {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl IssuerMap {
    /// Loads every provider of `category`, skipping the ones that fail.
    ///
    /// Partial availability is fine: a failed provider is logged and the
    /// remaining ones are still usable.
    pub fn load(registry: &dyn IdentityProviderRegistry, category: &str) -> Self {
        let mut map = Self::default();
        for name in registry.provider_names(category) {
            match registry.load_provider(&name) {
                Ok(provider) => {
                    debug!(
                        provider = %name,
                        issuer = %provider.issuer(),
                        "Identity provider loaded"
                    );
                    map.insert(provider);
                }
                Err(e) => warn!(provider = %name, error = %e, "Identity provider skipped"),
            }
        }
        map
    }

    /// Adds a provider under its normalized issuer.
    pub fn insert(&mut self, provider: Arc<dyn IdentityProvider>) {
        let issuer = normalize_issuer(provider.issuer()).to_string();
        self.providers.insert(issuer, provider);
    }

    /// Provider for `issuer`, trailing slashes ignored.
    #[must_use]
    pub fn get(&self, issuer: &str) -> Option<&Arc<dyn IdentityProvider>> {
        self.providers.get(normalize_issuer(issuer))
    }

    /// Number of loaded providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` if no provider is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for IssuerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}

/// JWT issuer verified with a shared secret or a public key.
pub struct JwtIdentityProvider {
    name: String,
    issuer: String,
    key: DecodingKey,
    validation: Validation,
    group_claim: String,
    default_group: Option<String>,
}

impl JwtIdentityProvider {
    /// Builds a provider from its configuration entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the algorithm is unknown or the key
    /// material is missing or unreadable.
    pub fn from_config(name: &str, config: &IdentityProviderConfig) -> Result<Self, ProviderError> {
        let algorithm: Algorithm =
            config
                .algorithm
                .parse()
                .map_err(|_| ProviderError::UnsupportedAlgorithm {
                    name: name.to_string(),
                    algorithm: config.algorithm.clone(),
                })?;

        let key = decoding_key(name, algorithm, config)?;
        let issuer = normalize_issuer(&config.issuer).to_string();

        let mut validation = Validation::new(algorithm);
        validation.leeway = TOKEN_LEEWAY_SECS;
        validation.set_issuer(&[issuer.clone(), format!("{issuer}/")]);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            name: name.to_string(),
            issuer,
            key,
            validation,
            group_claim: config.group_claim.clone(),
            default_group: config.default_group.clone(),
        })
    }
}

fn decoding_key(
    name: &str,
    algorithm: Algorithm,
    config: &IdentityProviderConfig,
) -> Result<DecodingKey, ProviderError> {
    if matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    ) {
        let secret = config
            .secret
            .as_deref()
            .ok_or_else(|| ProviderError::invalid_key(name, "secret is required"))?;
        return Ok(DecodingKey::from_secret(secret.as_bytes()));
    }

    let pem = config
        .public_key_pem
        .as_deref()
        .ok_or_else(|| ProviderError::invalid_key(name, "public_key_pem is required"))?
        .as_bytes();

    let key = match algorithm {
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        _ => DecodingKey::from_rsa_pem(pem),
    };
    key.map_err(|e| ProviderError::invalid_key(name, e.to_string()))
}

impl fmt::Debug for JwtIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtIdentityProvider")
            .field("name", &self.name)
            .field("issuer", &self.issuer)
            .field("group_claim", &self.group_claim)
            .field("default_group", &self.default_group)
            .finish_non_exhaustive()
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn verify_token(&self, token: &str) -> GrantResult<Value> {
        decode::<Value>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| GrantError::verification(e.to_string()))
    }

    fn resolve_group(&self, claims: &Value, _token: &str) -> GrantResult<CredentialRecord> {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| GrantError::group_resolution("Token has no subject."))?;

        let group = match claims.get(&self.group_claim) {
            Some(Value::String(group)) if !group.is_empty() => Some(group.clone()),
            Some(Value::Array(groups)) => {
                groups.first().and_then(Value::as_str).map(str::to_string)
            }
            _ => None,
        }
        .or_else(|| self.default_group.clone())
        .ok_or_else(|| GrantError::group_resolution(format!("No group found for {subject}.")))?;

        let username = claims
            .get("preferred_username")
            .and_then(Value::as_str)
            .unwrap_or(subject);

        let properties: Vec<String> = match claims.get("scope") {
            Some(Value::String(scope)) => scope.split_whitespace().map(str::to_string).collect(),
            Some(Value::Array(scopes)) => scopes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Ok(CredentialRecord::new()
            .with_id(subject)
            .with_username(username)
            .with_group(group)
            .with_properties(properties))
    }
}

/// Registry over the `identity_providers` configuration table.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredProviderRegistry {
    providers: BTreeMap<String, IdentityProviderConfig>,
}

impl ConfiguredProviderRegistry {
    /// Creates a registry from configured entries.
    #[must_use]
    pub fn new(providers: BTreeMap<String, IdentityProviderConfig>) -> Self {
        Self { providers }
    }
}

impl IdentityProviderRegistry for ConfiguredProviderRegistry {
    fn provider_names(&self, category: &str) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, config)| config.category == category)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn load_provider(&self, name: &str) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
        let config = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        Ok(Arc::new(JwtIdentityProvider::from_config(name, config)?))
    }
}
