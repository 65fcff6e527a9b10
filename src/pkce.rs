use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// RFC 7636 bounds on `code_verifier` length.
pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

pub fn verifier_length_ok(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
}

/// Computes the S256 challenge for a verifier: base64url-no-padding of the
/// SHA-256 digest of the verifier's ASCII bytes.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verifies a code challenge against the presented verifier.
///
/// - `plain`: the verifier must equal the challenge byte for byte.
/// - `S256`: the computed challenge of the verifier must equal the stored one.
/// - any other method is rejected.
///
/// Comparisons go through `subtle` so that challenge matching does not leak
/// prefix length through timing.
pub fn verify(challenge: &str, method: &str, verifier: &str) -> bool {
    match method {
        "plain" => bool::from(verifier.as_bytes().ct_eq(challenge.as_bytes())),
        "S256" => {
            let computed = s256_challenge(verifier);
            bool::from(computed.as_bytes().ct_eq(challenge.as_bytes()))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verifier/challenge pair from RFC 7636 appendix B.
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn plain_matches_identical_verifier() {
        let verifier = "a".repeat(43);
        assert!(verify(&verifier, "plain", &verifier));
    }

    #[test]
    fn plain_rejects_different_verifier() {
        let verifier = "a".repeat(43);
        let other = format!("{}b", "a".repeat(42));
        assert!(!verify(&verifier, "plain", &other));
    }

    #[test]
    fn s256_matches_rfc_vector() {
        assert_eq!(s256_challenge(RFC_VERIFIER), RFC_CHALLENGE);
        assert!(verify(RFC_CHALLENGE, "S256", RFC_VERIFIER));
    }

    #[test]
    fn s256_rejects_mutated_verifier() {
        let mutated = format!("{}A", &RFC_VERIFIER[..RFC_VERIFIER.len() - 1]);
        assert!(!verify(RFC_CHALLENGE, "S256", &mutated));
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(!verify(RFC_CHALLENGE, "S512", RFC_VERIFIER));
        assert!(!verify(RFC_VERIFIER, "", RFC_VERIFIER));
    }

    #[test]
    fn verifier_length_bounds() {
        assert!(!verifier_length_ok(&"a".repeat(42)));
        assert!(verifier_length_ok(&"a".repeat(43)));
        assert!(verifier_length_ok(&"a".repeat(128)));
        assert!(!verifier_length_ok(&"a".repeat(129)));
    }
}
