//! Bearer token grant.

use hermes_core::CredentialRecord;
use http::header::AUTHORIZATION;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::context::GrantContext;
use crate::error::{GrantError, GrantResult};
use crate::grant::Grant;
use crate::provider::normalize_issuer;

/// Reads the `iss` claim of a JWT without checking its signature.
///
/// Only used to pick the provider that will do the real verification.
///
/// # Errors
///
/// Returns [`GrantError::MalformedToken`] if the token is not a JWT or has no
/// issuer.
pub fn unverified_issuer(token: &str) -> GrantResult<String> {
    let header = decode_header(token).map_err(|e| GrantError::malformed_token(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let claims = decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| GrantError::malformed_token(e.to_string()))?
        .claims;

    claims
        .get("iss")
        .and_then(Value::as_str)
        .map(|iss| normalize_issuer(iss).to_string())
        .ok_or_else(|| GrantError::malformed_token("no issuer claim"))
}

/// `Authorization: Bearer <token>` grant, verified by the issuer's provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerTokenGrant;

impl BearerTokenGrant {
    fn access_token<'a>(ctx: &GrantContext<'a>) -> GrantResult<&'a str> {
        let header = ctx
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(GrantError::TokenNotFound)?;

        let mut parts = header.split_whitespace();
        let (Some(scheme), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GrantError::TokenNotFound);
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(GrantError::WrongTokenType);
        }
        Ok(token)
    }
}

impl Grant for BearerTokenGrant {
    fn authenticate(&self, ctx: &GrantContext<'_>) -> GrantResult<CredentialRecord> {
        let token = Self::access_token(ctx)?;

        let issuer = unverified_issuer(token)?;
        debug!(issuer = %issuer, "Read issuer from access token");

        let provider = ctx
            .issuers()
            .get(&issuer)
            .ok_or_else(|| GrantError::UnknownIssuer(issuer.clone()))?;

        let claims = provider.verify_token(token)?;
        debug!(provider = %provider.name(), "Access token verified");
        provider.resolve_group(&claims, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{IssuerMap, JwtIdentityProvider};
    use hermes_config::IdentityProviderConfig;
    use http::{HeaderMap, HeaderValue};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Map};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "bearer-test-secret";
    const ISSUER: &str = "https://idp.example.org";

    fn issuers() -> IssuerMap {
        let config = IdentityProviderConfig {
            category: "Id".to_string(),
            issuer: format!("{ISSUER}/"),
            algorithm: "HS256".to_string(),
            secret: Some(SECRET.to_string()),
            public_key_pem: None,
            audience: None,
            group_claim: "groups".to_string(),
            default_group: None,
        };
        let mut map = IssuerMap::default();
        map.insert(Arc::new(
            JwtIdentityProvider::from_config("CheckIn", &config).unwrap(),
        ));
        map
    }

    fn jwt(claims: &Value, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn exp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 600
    }

    fn authenticate(authorization: Option<&str>) -> GrantResult<CredentialRecord> {
        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        let args = Map::new();
        let issuers = issuers();
        let ctx = GrantContext::new(&headers, &args, &issuers);
        BearerTokenGrant.authenticate(&ctx)
    }

    #[test]
    fn test_unverified_issuer() {
        let token = jwt(&json!({"iss": "https://idp.example.org/", "exp": exp()}), "any");
        assert_eq!(unverified_issuer(&token).unwrap(), ISSUER);
        assert!(unverified_issuer("abc").is_err());
        assert!(unverified_issuer("a.b.c.d").is_err());
    }

    #[test]
    fn test_unverified_issuer_ignores_expiry_and_audience() {
        let token = jwt(
            &json!({"iss": "https://idp.example.org", "aud": "elsewhere", "exp": 1}),
            "unrelated-key",
        );
        assert_eq!(unverified_issuer(&token).unwrap(), ISSUER);

        let anonymous = jwt(&json!({"sub": "jane"}), "any");
        assert!(matches!(
            unverified_issuer(&anonymous),
            Err(GrantError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_missing_and_malformed_header() {
        assert_eq!(authenticate(None), Err(GrantError::TokenNotFound));
        assert_eq!(authenticate(Some("Bearer")), Err(GrantError::TokenNotFound));
        assert_eq!(
            authenticate(Some("Bearer a b")),
            Err(GrantError::TokenNotFound)
        );
    }

    #[test]
    fn test_wrong_scheme() {
        assert_eq!(
            authenticate(Some("Basic dXNlcjpwYXNz")),
            Err(GrantError::WrongTokenType)
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let token = jwt(
            &json!({"iss": ISSUER, "sub": "0001", "groups": "lhcb_user", "exp": exp()}),
            SECRET,
        );
        let record = authenticate(Some(&format!("bEaReR {token}"))).unwrap();
        assert_eq!(record.group(), Some("lhcb_user"));
        assert_eq!(record.username(), Some("0001"));
    }

    #[test]
    fn test_unknown_issuer() {
        let token = jwt(&json!({"iss": "https://other.example.org", "sub": "x", "exp": exp()}), SECRET);
        assert_eq!(
            authenticate(Some(&format!("Bearer {token}"))),
            Err(GrantError::UnknownIssuer("https://other.example.org".into()))
        );
    }

    #[test]
    fn test_bad_signature() {
        let token = jwt(&json!({"iss": ISSUER, "sub": "x", "exp": exp()}), "wrong-secret");
        assert!(matches!(
            authenticate(Some(&format!("Bearer {token}"))),
            Err(GrantError::Verification(_))
        ));
    }
}
