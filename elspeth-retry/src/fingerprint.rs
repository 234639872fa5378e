// elspeth-retry/src/fingerprint.rs
// ============================================================================
// Module: Secret Fingerprinting
// Description: One-way HMAC-SHA256 fingerprint of a secret used in an
//              external call (§4.8, GLOSSARY "Fingerprint").
// Purpose: Let the audit trail record that a particular credential was used
//          without ever writing the credential itself anywhere durable.
// Dependencies: hmac, sha2
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes a stable, one-way fingerprint of `secret`, keyed by `context`
/// (typically the endpoint or provider name) so the same secret used
/// against two different endpoints fingerprints differently.
///
/// The fingerprint is deterministic but not invertible: it identifies which
/// secret was used across calls in the audit trail without ever storing or
/// reconstructing the secret's value.
#[must_use]
pub fn fingerprint(secret: &[u8], context: &str) -> String {
    #[allow(clippy::expect_used, reason = "HMAC-SHA256 accepts a key of any length; construction cannot fail")]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(context.as_bytes());
    let bytes = mac.finalize().into_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::fingerprint;

    #[test]
    fn same_secret_and_context_fingerprints_identically() {
        let a = fingerprint(b"super-secret-key", "openai");
        let b = fingerprint(b"super-secret-key", "openai");
        assert_eq!(a, b);
    }

    #[test]
    fn same_secret_different_context_fingerprints_differently() {
        let a = fingerprint(b"super-secret-key", "openai");
        let b = fingerprint(b"super-secret-key", "anthropic");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_never_contains_the_secret() {
        let secret = "my-api-key-12345";
        let print = fingerprint(secret.as_bytes(), "provider");
        assert!(!print.contains(secret));
    }
}
