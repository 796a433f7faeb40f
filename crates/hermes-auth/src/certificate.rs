//! Client certificate grant.
//!
//! The certificate chain comes from the TLS layer ([`PeerCertificates`]) or,
//! behind a terminating proxy, from the `X-Ssl_client_verify` and
//! `X-SSL-CERT` headers. The chain is turned into a credential record by a
//! [`CertificateParser`].
//!
//! [`DerSubjectParser`] only walks the DER far enough to read the subject and
//! issuer names. It does not check signatures or validity dates;
//! chain verification is left to the TLS layer or the proxy. Deployments that
//! need full X.509 handling plug a real parser in through
//! [`CertificateGrant::new`].
//!
//! [`PeerCertificates`]: crate::PeerCertificates

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hermes_core::CredentialRecord;
use serde_json::Value;

use crate::context::GrantContext;
use crate::error::{GrantError, GrantResult};
use crate::grant::Grant;

/// Header set by the proxy to the client verification outcome.
pub const VERIFY_HEADER: &str = "X-Ssl_client_verify";

/// Header carrying the URL-encoded client certificate.
pub const CERT_HEADER: &str = "X-SSL-CERT";

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Turns a PEM certificate chain into a credential record.
pub trait CertificateParser: Send + Sync {
    /// Parses the chain, leaf first.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::CertificateInvalid`] if the chain cannot be read.
    fn parse_chain(&self, pem: &str) -> GrantResult<CredentialRecord>;
}

/// Reads the subject and issuer names out of the leaf certificate.
///
/// Names are rendered slash-separated (`/O=Grid/CN=Jane Doe`). Proxy
/// certificates (a trailing numeric or `proxy` CN) report the DN of the
/// identity they were issued for.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerSubjectParser;

impl CertificateParser for DerSubjectParser {
    fn parse_chain(&self, pem: &str) -> GrantResult<CredentialRecord> {
        let certificates = pem_blocks(pem)?;
        let leaf = certificates
            .first()
            .ok_or_else(|| GrantError::certificate_invalid("no certificate in chain"))?;

        let names = der::subject_and_issuer(leaf).map_err(GrantError::certificate_invalid)?;
        let (dn, is_proxy) = strip_proxy_suffix(&names.subject);

        let mut record = CredentialRecord::new().with_dn(dn);
        record
            .attributes
            .insert("issuer".to_string(), Value::String(names.issuer));
        record
            .attributes
            .insert("isProxy".to_string(), Value::Bool(is_proxy));
        Ok(record)
    }
}

fn pem_blocks(pem: &str) -> GrantResult<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(PEM_BEGIN) {
        let body_start = start + PEM_BEGIN.len();
        let end = rest[body_start..]
            .find(PEM_END)
            .ok_or_else(|| GrantError::certificate_invalid("unterminated PEM block"))?;
        let body: String = rest[body_start..body_start + end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = STANDARD
            .decode(body)
            .map_err(|e| GrantError::certificate_invalid(format!("bad PEM body: {e}")))?;
        blocks.push(der);
        rest = &rest[body_start + end + PEM_END.len()..];
    }
    Ok(blocks)
}

fn strip_proxy_suffix(dn: &str) -> (String, bool) {
    let mut current = dn;
    let mut is_proxy = false;
    while let Some(idx) = current.rfind("/CN=") {
        let cn = &current[idx + 4..];
        let proxy_cn = cn == "proxy"
            || cn == "limited proxy"
            || (!cn.is_empty() && cn.chars().all(|c| c.is_ascii_digit()));
        if !proxy_cn {
            break;
        }
        is_proxy = true;
        current = &current[..idx];
    }
    (current.to_string(), is_proxy)
}

/// Certificate-based grant.
#[derive(Clone)]
pub struct CertificateGrant {
    parser: Arc<dyn CertificateParser>,
}

impl CertificateGrant {
    /// Creates the grant with a custom parser.
    pub fn new(parser: Arc<dyn CertificateParser>) -> Self {
        Self { parser }
    }

    fn chain_text(ctx: &GrantContext<'_>) -> GrantResult<String> {
        if let Some(chain) = ctx.peer_certificates() {
            return Ok(chain.as_pem());
        }

        let verified = ctx.header(VERIFY_HEADER) == Some("SUCCESS");
        match ctx.header(CERT_HEADER) {
            Some(cert) if verified && !cert.is_empty() => urlencoding::decode(cert)
                .map(std::borrow::Cow::into_owned)
                .map_err(|e| GrantError::certificate_invalid(e.to_string())),
            _ => Err(GrantError::CertificateNotFound),
        }
    }
}

impl Default for CertificateGrant {
    fn default() -> Self {
        Self::new(Arc::new(DerSubjectParser))
    }
}

impl std::fmt::Debug for CertificateGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateGrant").finish_non_exhaustive()
    }
}

impl Grant for CertificateGrant {
    fn authenticate(&self, ctx: &GrantContext<'_>) -> GrantResult<CredentialRecord> {
        let chain = Self::chain_text(ctx)?;
        let mut record = self.parser.parse_chain(&chain)?;
        if let Some(extra) = ctx.extra_credentials() {
            record.merge_extra(extra);
        }
        Ok(record)
    }
}

/// Just enough DER to pull the two names out of a certificate.
mod der {
    use std::fmt::Write as _;

    const SEQUENCE: u8 = 0x30;
    const SET: u8 = 0x31;
    const OID: u8 = 0x06;
    const EXPLICIT_VERSION: u8 = 0xA0;

    pub(super) struct Names {
        pub(super) subject: String,
        pub(super) issuer: String,
    }

    type Tlv<'a> = (u8, &'a [u8], &'a [u8]);

    fn read(input: &[u8]) -> Result<Tlv<'_>, String> {
        let (&tag, rest) = input.split_first().ok_or("truncated tag")?;
        let (&first, rest) = rest.split_first().ok_or("truncated length")?;
        let (len, rest) = if first < 0x80 {
            (usize::from(first), rest)
        } else {
            let count = usize::from(first & 0x7f);
            if count == 0 || count > 4 || rest.len() < count {
                return Err("unsupported length encoding".to_string());
            }
            let len = rest[..count]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            (len, &rest[count..])
        };
        if rest.len() < len {
            return Err("truncated value".to_string());
        }
        Ok((tag, &rest[..len], &rest[len..]))
    }

    fn expect(input: &[u8], tag: u8) -> Result<(&[u8], &[u8]), String> {
        let (found, content, rest) = read(input)?;
        if found != tag {
            return Err(format!("expected tag {tag:#04x}, found {found:#04x}"));
        }
        Ok((content, rest))
    }

    pub(super) fn subject_and_issuer(certificate: &[u8]) -> Result<Names, String> {
        let (cert, _) = expect(certificate, SEQUENCE)?;
        let (tbs, _) = expect(cert, SEQUENCE)?;

        let mut fields = tbs;
        let (tag, _, after_version) = read(fields)?;
        if tag == EXPLICIT_VERSION {
            fields = after_version;
        }

        let (_, _, fields) = read(fields)?; // serial
        let (_, fields) = expect(fields, SEQUENCE)?; // signature algorithm
        let (issuer, fields) = expect(fields, SEQUENCE)?;
        let (_, fields) = expect(fields, SEQUENCE)?; // validity
        let (subject, _) = expect(fields, SEQUENCE)?;

        Ok(Names {
            subject: render_name(subject)?,
            issuer: render_name(issuer)?,
        })
    }

    fn render_name(mut rdns: &[u8]) -> Result<String, String> {
        let mut out = String::new();
        while !rdns.is_empty() {
            let (set, rest) = expect(rdns, SET)?;
            let mut attributes = set;
            while !attributes.is_empty() {
                let (attribute, next) = expect(attributes, SEQUENCE)?;
                let (oid, value) = expect(attribute, OID)?;
                let (_, text, _) = read(value)?;
                let _ = write!(
                    out,
                    "/{}={}",
                    attribute_name(oid),
                    String::from_utf8_lossy(text)
                );
                attributes = next;
            }
            rdns = rest;
        }
        Ok(out)
    }

    fn attribute_name(oid: &[u8]) -> String {
        match oid {
            [0x55, 0x04, 0x03] => "CN".to_string(),
            [0x55, 0x04, 0x06] => "C".to_string(),
            [0x55, 0x04, 0x07] => "L".to_string(),
            [0x55, 0x04, 0x08] => "ST".to_string(),
            [0x55, 0x04, 0x0A] => "O".to_string(),
            [0x55, 0x04, 0x0B] => "OU".to_string(),
            [0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x01] => "emailAddress".to_string(),
            [0x09, 0x92, 0x26, 0x89, 0x93, 0xF2, 0x2C, 0x64, 0x01, 0x19] => "DC".to_string(),
            other => dotted(other),
        }
    }

    fn dotted(oid: &[u8]) -> String {
        let Some((&first, rest)) = oid.split_first() else {
            return String::new();
        };
        let mut parts = vec![u64::from(first / 40), u64::from(first % 40)];
        let mut acc = 0u64;
        for byte in rest {
            acc = (acc << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                parts.push(acc);
                acc = 0;
            }
        }
        parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}
