//! Webhook signature verification.
//!
//! Slack signs each request with HMAC-SHA256 over `v0:{timestamp}:{body}`;
//! verification uses a constant-time comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_VERSION: &str = "v0";

/// Compute the expected Slack signature for a request.
pub fn slack_signature(signing_secret: &str, timestamp: &str, body: &str) -> String {
    let basestring = format!("{SIGNATURE_VERSION}:{timestamp}:{body}");
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(basestring.as_bytes());
    format!(
        "{SIGNATURE_VERSION}={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Verify a Slack request signature in constant time.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &str,
    provided: &str,
) -> bool {
    let Some(provided_hex) = provided.strip_prefix("v0=") else {
        return false;
    };
    let Ok(provided_bytes) = hex::decode(provided_hex) else {
        return false;
    };

    let basestring = format!("{SIGNATURE_VERSION}:{timestamp}:{body}");
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(basestring.as_bytes());
    mac.verify_slice(&provided_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let secret = "8f742231b10e8888abcd99yyyzzz85a5";
        let timestamp = "1531420618";
        let body = "token=xyz&team_id=T1DC2JH3J";

        let signature = slack_signature(secret, timestamp, body);
        assert!(signature.starts_with("v0="));
        assert!(verify_slack_signature(secret, timestamp, body, &signature));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "secret";
        let signature = slack_signature(secret, "1700000000", "payload");
        assert!(!verify_slack_signature(secret, "1700000000", "payload2", &signature));
        assert!(!verify_slack_signature(secret, "1700000001", "payload", &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signature = slack_signature("secret-a", "1700000000", "payload");
        assert!(!verify_slack_signature("secret-b", "1700000000", "payload", &signature));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        assert!(!verify_slack_signature("s", "t", "b", "sha256=deadbeef"));
        assert!(!verify_slack_signature("s", "t", "b", "v0=not-hex"));
        assert!(!verify_slack_signature("s", "t", "b", ""));
    }
}
