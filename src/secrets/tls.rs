//! Validity checks for resolved TLS material
//!
//! Certificates and keys arrive as PEM text, with escaped newlines when they
//! were pasted into a literal. A client certificate must parse, belong to its
//! private key and be unexpired. A CA bundle may only hold CA certificates.
//! Expiry within [`EXPIRY_WARNING_DAYS`] is reported but does not reject the
//! pipeline.

use chrono::{DateTime, Duration, Utc};
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use rustls::sign::CertifiedKey;
use rustls::InconsistentKeys;
use thiserror::Error;
use x509_parser::prelude::*;

use super::{ids, ResolvedCredentials};
use crate::conditions::{
    REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE, REASON_TLS_CERTIFICATE_EXPIRED,
    REASON_TLS_CONFIGURATION_INVALID, REASON_TLS_KEY_PAIR_MISMATCH,
};

/// Certificates expiring within this many days are flagged
pub const EXPIRY_WARNING_DAYS: i64 = 14;

const CERTIFICATE: &str = "certificate";
const CA_CERTIFICATE: &str = "CA certificate";
const PRIVATE_KEY: &str = "private key";

/// Why the TLS material of an output is unusable, or about to become so
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TlsCertError {
    /// No PEM block could be decoded
    #[error("{field}: failed to decode PEM block containing {what}")]
    Decode {
        /// Path of the TLS block
        field: String,
        /// Which member
        what: &'static str,
    },

    /// The PEM block holds something else
    #[error("{field}: failed to parse {what}")]
    Parse {
        /// Path of the TLS block
        field: String,
        /// Which member
        what: &'static str,
    },

    /// The CA bundle contains a leaf certificate
    #[error("{field}: not a CA certificate")]
    NotCa {
        /// Path of the TLS block
        field: String,
    },

    /// The client certificate was not issued for the private key
    #[error("{field}: certificate and private key do not match")]
    KeyPairMismatch {
        /// Path of the TLS block
        field: String,
    },

    /// Past `notAfter`
    #[error("{field}: TLS {what} expired on {expiry}")]
    Expired {
        /// Path of the TLS block
        field: String,
        /// Which member
        what: &'static str,
        /// Expiry date
        expiry: String,
    },

    /// Within the warning window of `notAfter`
    #[error("{field}: TLS {what} is about to expire, configured certificate is valid until {expiry}")]
    AboutToExpire {
        /// Path of the TLS block
        field: String,
        /// Which member
        what: &'static str,
        /// Expiry date
        expiry: String,
    },
}

impl TlsCertError {
    /// Condition reason for the `ConfigurationGenerated` condition
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decode { .. } | Self::Parse { .. } | Self::NotCa { .. } => {
                REASON_TLS_CONFIGURATION_INVALID
            }
            Self::KeyPairMismatch { .. } => REASON_TLS_KEY_PAIR_MISMATCH,
            Self::Expired { .. } => REASON_TLS_CERTIFICATE_EXPIRED,
            Self::AboutToExpire { .. } => REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE,
        }
    }

    /// Whether the pipeline keeps running despite the finding
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::AboutToExpire { .. })
    }
}

/// Check the TLS material of every output block of a pipeline.
///
/// Returns `Err` for material that must not be deployed and `Ok(Some(_))`
/// with an [`TlsCertError::AboutToExpire`] warning for material that still
/// works.
pub fn check_credentials(
    credentials: &ResolvedCredentials,
    now: DateTime<Utc>,
) -> Result<Option<TlsCertError>, TlsCertError> {
    let mut warning = None;
    for field in [ids::HTTP_TLS, ids::OTLP_TLS] {
        let block_warning = check_block(field, credentials, now)?;
        warning = warning.or(block_warning);
    }
    Ok(warning)
}

fn check_block(
    field: &str,
    credentials: &ResolvedCredentials,
    now: DateTime<Utc>,
) -> Result<Option<TlsCertError>, TlsCertError> {
    let member = |name: &str| {
        credentials
            .value(&ids::tls_member(field, name))
            .filter(|v| !v.trim().is_empty())
    };
    let mut warning = None;

    // A cert without key is a validation error reported elsewhere
    if let (Some(cert), Some(key)) = (member("cert"), member("key")) {
        let cert_block = decode(field, cert, CERTIFICATE)?
            .into_iter()
            .next()
            .ok_or_else(|| decode_error(field, CERTIFICATE))?;
        let leaf = parse_certificate(field, cert_block.contents(), CERTIFICATE)?;
        let key_block = decode(field, key, PRIVATE_KEY)?
            .into_iter()
            .next()
            .ok_or_else(|| decode_error(field, PRIVATE_KEY))?;
        check_key_pair(field, cert_block.contents(), private_key(field, &key_block)?)?;
        warning = check_expiry(field, &leaf, CERTIFICATE, now)?;
    }

    if let Some(ca) = member("ca") {
        for block in decode(field, ca, CA_CERTIFICATE)? {
            let ca = parse_certificate(field, block.contents(), CA_CERTIFICATE)?;
            if !ca.is_ca() {
                return Err(TlsCertError::NotCa {
                    field: field.to_string(),
                });
            }
            let ca_warning = check_expiry(field, &ca, CA_CERTIFICATE, now)?;
            warning = warning.or(ca_warning);
        }
    }

    Ok(warning)
}

fn decode_error(field: &str, what: &'static str) -> TlsCertError {
    TlsCertError::Decode {
        field: field.to_string(),
        what,
    }
}

/// All PEM blocks of a value, never empty
fn decode(field: &str, value: &str, what: &'static str) -> Result<Vec<::pem::Pem>, TlsCertError> {
    let sanitized = value.replace("\\n", "\n");
    match ::pem::parse_many(sanitized.as_bytes()) {
        Ok(blocks) if !blocks.is_empty() => Ok(blocks),
        _ => Err(decode_error(field, what)),
    }
}

fn parse_certificate<'a>(
    field: &str,
    der: &'a [u8],
    what: &'static str,
) -> Result<X509Certificate<'a>, TlsCertError> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|_| TlsCertError::Parse {
            field: field.to_string(),
            what,
        })
}

fn private_key(field: &str, block: &::pem::Pem) -> Result<PrivateKeyDer<'static>, TlsCertError> {
    let der = block.contents().to_vec();
    match block.tag() {
        "PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der))),
        "RSA PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der))),
        "EC PRIVATE KEY" => Ok(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der))),
        _ => Err(decode_error(field, PRIVATE_KEY)),
    }
}

fn check_key_pair(field: &str, cert_der: &[u8], key: PrivateKeyDer<'static>) -> Result<(), TlsCertError> {
    let signing_key = any_supported_type(&key).map_err(|_| TlsCertError::Parse {
        field: field.to_string(),
        what: PRIVATE_KEY,
    })?;
    let certified = CertifiedKey::new(vec![CertificateDer::from(cert_der.to_vec())], signing_key);
    match certified.keys_match() {
        // Keys that cannot report their public half are accepted
        Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(_) => Err(TlsCertError::KeyPairMismatch {
            field: field.to_string(),
        }),
    }
}

fn check_expiry(
    field: &str,
    cert: &X509Certificate<'_>,
    what: &'static str,
    now: DateTime<Utc>,
) -> Result<Option<TlsCertError>, TlsCertError> {
    let not_after = cert.validity().not_after.timestamp();
    let expiry = DateTime::from_timestamp(not_after, 0)
        .map(|t| t.date_naive().to_string())
        .unwrap_or_else(|| not_after.to_string());

    if now.timestamp() > not_after {
        return Err(TlsCertError::Expired {
            field: field.to_string(),
            what,
            expiry,
        });
    }
    if not_after - now.timestamp() <= Duration::days(EXPIRY_WARNING_DAYS).num_seconds() {
        return Ok(Some(TlsCertError::AboutToExpire {
            field: field.to_string(),
            what,
            expiry,
        }));
    }
    Ok(None)
}
