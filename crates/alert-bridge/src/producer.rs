//! Webhook producer: authenticates provider webhooks and enqueues them.

use std::sync::Arc;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::ProducerError;
use crate::events::Source;
use crate::metrics::{Component, MetricsSink};
use crate::queue::EventQueue;
use crate::secrets::ProducerSecrets;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of a Sentry webhook body.
pub const SENTRY_SIGNATURE_HEADER: &str = "sentry-hook-signature";

/// Header carrying Datadog's shared secret token.
pub const DATADOG_TOKEN_HEADER: &str = "datadog-secret-token";

/// Verify a Sentry webhook signature.
///
/// # Arguments
/// * `body` - Raw request body bytes
/// * `signature` - Value of the `sentry-hook-signature` header (hex)
/// * `secret` - Sentry integration client secret
///
/// # Returns
/// `true` if the signature is valid
#[must_use]
pub fn verify_sentry_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(signature_bytes) = hex::decode(signature.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Compare a Datadog token in constant time.
#[must_use]
pub fn verify_datadog_token(token: &str, expected: &str) -> bool {
    token.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Determine the source from exactly one signature header.
pub fn classify(headers: &HeaderMap) -> Result<(Source, String), ProducerError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    match (header(SENTRY_SIGNATURE_HEADER), header(DATADOG_TOKEN_HEADER)) {
        (Some(signature), None) => Ok((Source::Sentry, signature)),
        (None, Some(token)) => Ok((Source::Datadog, token)),
        (Some(_), Some(_)) => Err(ProducerError::AmbiguousSignature),
        (None, None) => Err(ProducerError::MissingSignature),
    }
}

/// Authenticates webhooks and hands them to the queue.
#[derive(Clone)]
pub struct Producer {
    secrets: ProducerSecrets,
    queue: Arc<dyn EventQueue>,
    metrics: Arc<dyn MetricsSink>,
    development: bool,
}

impl Producer {
    pub fn new(
        secrets: ProducerSecrets,
        queue: Arc<dyn EventQueue>,
        metrics: Arc<dyn MetricsSink>,
        development: bool,
    ) -> Self {
        if development {
            warn!("Development mode: webhook signatures are not verified");
        }
        Self {
            secrets,
            queue,
            metrics,
            development,
        }
    }

    /// Validate and enqueue a webhook. Returns the message id.
    pub async fn accept(&self, headers: &HeaderMap, body: &[u8]) -> Result<String, ProducerError> {
        let (source, credential) = match classify(headers) {
            Ok(classified) => classified,
            Err(e) => {
                warn!(error = %e, "Rejected webhook");
                self.metrics
                    .increment_event_count(None, Component::Producer, false);
                return Err(e);
            }
        };

        let valid = self.development
            || match source {
                Source::Sentry => {
                    verify_sentry_signature(body, &credential, &self.secrets.sentry_client_secret)
                }
                Source::Datadog => {
                    verify_datadog_token(&credential, &self.secrets.datadog_secret_token)
                }
            };
        self.metrics
            .increment_event_count(Some(source), Component::Producer, valid);

        if !valid {
            warn!(source = %source, "Invalid webhook signature");
            return Err(ProducerError::InvalidSignature(source));
        }

        let body = match std::str::from_utf8(body) {
            Ok(body) => body.to_string(),
            Err(e) => {
                warn!(source = %source, error = %e, "Rejected non-UTF-8 webhook body");
                return Err(e.into());
            }
        };
        let message_id = self.queue.enqueue(body, source).await?;
        info!(message_id = %message_id, source = %source, "Webhook accepted");
        Ok(message_id)
    }
}
