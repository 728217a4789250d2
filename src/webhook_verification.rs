//! # Webhook Signature Verification
//!
//! Instagram signs every webhook delivery with an HMAC of the raw request body,
//! keyed by the app secret. The digest arrives as `X-Hub-Signature-256:
//! sha256=<hex>`, or as `X-Hub-Signature: sha1=<hex>` from legacy senders.
//!
//! Verification must run over the exact bytes received on the wire. The
//! [`webhook_signature_middleware`] buffers the body before any JSON parsing
//! happens and hands the same bytes on to the handler.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use metrics::counter;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorType, unauthorized};
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Header carrying the sha256 signature.
pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
/// Legacy header carrying the sha1 signature.
pub const SIGNATURE_LEGACY_HEADER: &str = "x-hub-signature";

/// Hex characters of each digest included in failure logs.
const DIGEST_PREVIEW_LEN: usize = 8;

/// HMAC algorithm named by the signature prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    /// Prefix preceding the hex digest in the header value.
    pub fn prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1=",
            SignatureAlgorithm::Sha256 => "sha256=",
        }
    }

    /// Length of the lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            SignatureAlgorithm::Sha1 => 40,
            SignatureAlgorithm::Sha256 => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
        }
    }
}

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("Webhook signing secret is not configured")]
    MissingSecret,

    #[error("Webhook body is empty")]
    EmptyBody,

    #[error("Signature verification failed")]
    VerificationFailed,
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn reason(&self) -> &'static str {
        match self {
            VerificationError::MissingSignature { .. } => "missing_signature",
            VerificationError::InvalidSignatureFormat { .. } => "invalid_format",
            VerificationError::MissingSecret => "missing_secret",
            VerificationError::EmptyBody => "empty_body",
            VerificationError::VerificationFailed => "mismatch",
        }
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// A signature checked against one delivery. Never persisted.
#[derive(Debug, Clone)]
pub struct SignatureRecord<'a> {
    pub header_value: &'a str,
    pub algorithm: SignatureAlgorithm,
    pub computed_digest: Vec<u8>,
}

impl SignatureRecord<'_> {
    /// The received hex digest with its prefix stripped.
    pub fn received_hex(&self) -> &str {
        &self.header_value[self.algorithm.prefix().len()..]
    }

    /// Short previews of the computed and received digests, safe to log.
    pub fn digest_previews(&self) -> (String, String) {
        let computed = hex::encode(&self.computed_digest);
        (
            preview(&computed),
            preview(&self.received_hex().to_ascii_lowercase()),
        )
    }
}

fn preview(hex_digest: &str) -> String {
    hex_digest.chars().take(DIGEST_PREVIEW_LEN).collect()
}

/// Splits a header value into its algorithm and hex digest.
///
/// # Examples
///
/// ```
/// use social_selling::webhook_verification::{parse_signature_header, SignatureAlgorithm};
///
/// let (algorithm, hex) = parse_signature_header("sha256=abcd").unwrap();
/// assert_eq!(algorithm, SignatureAlgorithm::Sha256);
/// assert_eq!(hex, "abcd");
///
/// assert!(parse_signature_header("md5=abcd").is_err());
/// ```
pub fn parse_signature_header(header: &str) -> VerificationResult<(SignatureAlgorithm, &str)> {
    let header = header.trim();
    if header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: "X-Hub-Signature-256".to_string(),
        });
    }

    let (algorithm, hex_digest) = if let Some(rest) = header.strip_prefix("sha256=") {
        (SignatureAlgorithm::Sha256, rest)
    } else if let Some(rest) = header.strip_prefix("sha1=") {
        (SignatureAlgorithm::Sha1, rest)
    } else {
        return Err(VerificationError::InvalidSignatureFormat {
            reason: "signature must start with 'sha256=' or 'sha1='".to_string(),
        });
    };

    if hex_digest.is_empty() || !hex_digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(VerificationError::InvalidSignatureFormat {
            reason: "signature digest must be hex".to_string(),
        });
    }

    Ok((algorithm, hex_digest))
}

/// Computes the HMAC of `body` keyed by `secret`.
pub fn compute_signature(algorithm: SignatureAlgorithm, body: &[u8], secret: &[u8]) -> Vec<u8> {
    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
                .expect("HMAC can take key of any size");
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::Sha1 => {
            let mut mac = <HmacSha1 as Mac>::new_from_slice(secret)
                .expect("HMAC can take key of any size");
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Produces a header value (`sha256=<hex>` or `sha1=<hex>`) for `body`.
pub fn sign(algorithm: SignatureAlgorithm, body: &[u8], secret: &str) -> String {
    format!(
        "{}{}",
        algorithm.prefix(),
        hex::encode(compute_signature(algorithm, body, secret.as_bytes()))
    )
}

/// Verifies `header_signature` against the raw body bytes and secret.
///
/// Missing header, missing secret and empty body are all failures.
pub fn verify_signature(
    raw_body: &[u8],
    header_signature: &str,
    secret: &str,
) -> VerificationResult<()> {
    if secret.is_empty() {
        return Err(VerificationError::MissingSecret);
    }
    if raw_body.is_empty() {
        return Err(VerificationError::EmptyBody);
    }

    let (algorithm, received_hex) = parse_signature_header(header_signature)?;

    let record = SignatureRecord {
        header_value: header_signature.trim(),
        algorithm,
        computed_digest: compute_signature(algorithm, raw_body, secret.as_bytes()),
    };
    let computed_hex = hex::encode(&record.computed_digest);
    let received_hex = received_hex.to_ascii_lowercase();

    // Digest length is public; only the bytes need a constant-time compare.
    let matches = computed_hex.len() == received_hex.len()
        && bool::from(computed_hex.as_bytes().ct_eq(received_hex.as_bytes()));

    if matches {
        debug!(
            algorithm = algorithm.as_str(),
            body_size = raw_body.len(),
            "Webhook signature verified"
        );
        Ok(())
    } else {
        let (computed_preview, received_preview) = record.digest_previews();
        warn!(
            algorithm = algorithm.as_str(),
            body_size = raw_body.len(),
            expected_len = algorithm.hex_len(),
            received_len = received_hex.len(),
            computed_preview = %computed_preview,
            received_preview = %received_preview,
            "Webhook signature mismatch"
        );
        Err(VerificationError::VerificationFailed)
    }
}

/// Boolean form of [`verify_signature`].
pub fn verify(raw_body: &[u8], header_signature: &str, secret: &str) -> bool {
    verify_signature(raw_body, header_signature, secret).is_ok()
}

/// Picks the signature header to check, preferring sha256 over the legacy sha1 header.
pub fn select_signature_header(headers: &HeaderMap, allow_legacy_sha1: bool) -> Option<&str> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header_value(SIGNATURE_256_HEADER).or_else(|| {
        if allow_legacy_sha1 {
            header_value(SIGNATURE_LEGACY_HEADER)
        } else {
            None
        }
    })
}

/// Verifies a delivery using the signature headers present in `headers`.
pub fn verify_webhook_request(
    body: &[u8],
    headers: &HeaderMap,
    secret: Option<&str>,
    allow_legacy_sha1: bool,
) -> VerificationResult<()> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(VerificationError::MissingSecret)?;

    let signature = select_signature_header(headers, allow_legacy_sha1).ok_or_else(|| {
        VerificationError::MissingSignature {
            header: "X-Hub-Signature-256".to_string(),
        }
    })?;

    verify_signature(body, signature, secret)
}

/// Middleware guarding the webhook POST routes.
///
/// Buffers the body (bounded by the configured limit), verifies it, and
/// rebuilds the request around the untouched bytes. Rejected deliveries never
/// reach the handler.
pub async fn webhook_signature_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = state.config.webhook_max_body_bytes();

    let declared_len = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > limit) {
        warn!(limit, "Webhook body exceeds configured limit");
        return Err(ErrorType::PayloadTooLarge.into());
    }

    let (parts, body) = request.into_parts();
    let body_bytes: Bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        warn!(error = %e, limit, "Failed to read webhook body");
        ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "Webhook body could not be read within the size limit",
        )
    })?;

    match verify_webhook_request(
        &body_bytes,
        &parts.headers,
        state.config.instagram_app_secret.as_deref(),
        state.config.webhook_allow_legacy_sha1,
    ) {
        Ok(()) => {
            let request = Request::from_parts(parts, Body::from(body_bytes));
            Ok(next.run(request).await)
        }
        Err(e) => {
            counter!("webhook_signature_failures_total", "reason" => e.reason()).increment(1);
            warn!(error = %e, "Rejecting webhook delivery");
            Err(unauthorized(Some("Invalid webhook signature")))
        }
    }
}
