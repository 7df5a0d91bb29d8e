//! Webhook signature schemes used by the provider backends.
//!
//! Three families cover all six backends: Meta's HMAC-SHA256 hex digest
//! over the raw body (WhatsApp Cloud, Messenger), Twilio's HMAC-SHA1
//! base64 over the URL plus sorted form parameters, and plain shared-secret
//! header comparison (Telegram, Infobip, Africa's Talking). All
//! comparisons are constant-time.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::adapter::WebhookError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Verifies a Meta-style `X-Hub-Signature-256` header.
///
/// The header carries `sha256=<hex>` where the digest is HMAC-SHA256 of
/// the raw request body keyed with the app secret.
pub fn verify_hub_signature(
    body: &[u8],
    header_value: Option<&str>,
    app_secret: &str,
) -> Result<(), WebhookError> {
    let header = header_value
        .ok_or_else(|| WebhookError::SignatureInvalid("x-hub-signature-256 missing".into()))?;
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or_else(|| WebhookError::SignatureInvalid("expected sha256= prefix".into()))?;
    let provided = hex::decode(hex_digest)
        .map_err(|_| WebhookError::SignatureInvalid("digest is not valid hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|_| WebhookError::SignatureInvalid("invalid app secret".into()))?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(WebhookError::SignatureInvalid("digest mismatch".into()))
    }
}

/// Verifies a Twilio `X-Twilio-Signature` header.
///
/// Twilio signs base64(HMAC-SHA1(auth_token, url + k1v1k2v2...)) where the
/// form parameters are concatenated in sorted key order.
pub fn verify_twilio_signature(
    url: &str,
    form_params: &[(String, String)],
    header_value: Option<&str>,
    auth_token: &str,
) -> Result<(), WebhookError> {
    let header = header_value
        .ok_or_else(|| WebhookError::SignatureInvalid("x-twilio-signature missing".into()))?;
    let provided = BASE64
        .decode(header)
        .map_err(|_| WebhookError::SignatureInvalid("signature is not valid base64".into()))?;

    let mut sorted: Vec<&(String, String)> = form_params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut signed = String::from(url);
    for (key, value) in sorted {
        signed.push_str(key);
        signed.push_str(value);
    }

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .map_err(|_| WebhookError::SignatureInvalid("invalid auth token".into()))?;
    mac.update(signed.as_bytes());
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(&provided).into() {
        Ok(())
    } else {
        Err(WebhookError::SignatureInvalid("signature mismatch".into()))
    }
}

/// Compares a shared-secret header value against the configured secret.
pub fn verify_shared_secret(
    header_name: &str,
    header_value: Option<&str>,
    secret: &str,
) -> Result<(), WebhookError> {
    let provided = header_value
        .ok_or_else(|| WebhookError::SignatureInvalid(format!("{header_name} missing")))?;
    if provided.as_bytes().ct_eq(secret.as_bytes()).into() {
        Ok(())
    } else {
        Err(WebhookError::SignatureInvalid(format!("{header_name} mismatch")))
    }
}

/// Computes the Meta-style signature for a body. Test helper, also used by
/// outbound verification examples.
pub fn hub_signature(body: &[u8], app_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Computes the Twilio signature for a URL + form. Test helper.
pub fn twilio_signature(url: &str, form_params: &[(String, String)], auth_token: &str) -> String {
    let mut sorted: Vec<&(String, String)> = form_params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut signed = String::from(url);
    for (key, value) in sorted {
        signed.push_str(key);
        signed.push_str(value);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(signed.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
