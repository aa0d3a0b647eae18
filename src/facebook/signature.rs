use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature on webhook deliveries.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify `X-Hub-Signature-256` over the exact raw request bytes.
///
/// The MAC comparison is constant-time; a missing header, a missing
/// `sha256=` prefix, malformed hex, or a length mismatch all reject.
pub fn verify_signature(app_secret: &str, raw_body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Some(hex_signature) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_signature) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    mac.verify_slice(&signature).is_ok()
}

/// `appsecret_proof` required by Graph API calls: hex
/// HMAC-SHA256(app_secret, access_token).
pub fn app_secret_proof(app_secret: &str, access_token: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(app_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(access_token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Decision for the subscription verification handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Echo the challenge back as `text/plain`.
    Accepted(String),
    /// Wrong mode or verify token.
    Forbidden,
    /// Mode and token were fine but no challenge was supplied.
    MissingChallenge,
}

pub fn evaluate_handshake(
    expected_token: &str,
    mode: Option<&str>,
    verify_token: Option<&str>,
    challenge: Option<&str>,
) -> HandshakeOutcome {
    if mode != Some("subscribe") || verify_token != Some(expected_token) {
        return HandshakeOutcome::Forbidden;
    }
    match challenge {
        Some(challenge) if !challenge.is_empty() => {
            HandshakeOutcome::Accepted(challenge.to_string())
        }
        _ => HandshakeOutcome::MissingChallenge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2.
    const RFC4231_KEY: &str = "Jefe";
    const RFC4231_DATA: &[u8] = b"what do ya want for nothing?";
    const RFC4231_MAC: &str = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";

    #[test]
    fn accepts_the_correct_signature() {
        let header = format!("sha256={RFC4231_MAC}");
        assert!(verify_signature(RFC4231_KEY, RFC4231_DATA, Some(&header)));
    }

    #[test]
    fn rejects_a_forged_signature() {
        let header = format!("sha256={}", "0".repeat(64));
        assert!(!verify_signature(RFC4231_KEY, RFC4231_DATA, Some(&header)));
    }

    #[test]
    fn rejects_missing_header_and_missing_prefix() {
        assert!(!verify_signature(RFC4231_KEY, RFC4231_DATA, None));
        assert!(!verify_signature(RFC4231_KEY, RFC4231_DATA, Some(RFC4231_MAC)));
        assert!(!verify_signature(
            RFC4231_KEY,
            RFC4231_DATA,
            Some(&format!("sha1={RFC4231_MAC}"))
        ));
    }

    #[test]
    fn rejects_signatures_of_the_wrong_length() {
        let short = format!("sha256={}", &RFC4231_MAC[..32]);
        assert!(!verify_signature(RFC4231_KEY, RFC4231_DATA, Some(&short)));

        let long = format!("sha256={RFC4231_MAC}ff");
        assert!(!verify_signature(RFC4231_KEY, RFC4231_DATA, Some(&long)));
    }

    #[test]
    fn rejects_non_hex_signatures() {
        let header = format!("sha256={}", "z".repeat(64));
        assert!(!verify_signature(RFC4231_KEY, RFC4231_DATA, Some(&header)));
    }

    #[test]
    fn signature_is_over_the_exact_bytes() {
        let header = format!("sha256={RFC4231_MAC}");
        assert!(!verify_signature(
            RFC4231_KEY,
            b"what do ya want for nothing? ",
            Some(&header)
        ));
    }

    #[test]
    fn app_secret_proof_matches_the_known_vector() {
        let proof = app_secret_proof(RFC4231_KEY, "what do ya want for nothing?");
        assert_eq!(proof, RFC4231_MAC);
    }

    #[test]
    fn handshake_accepts_matching_subscribe_requests() {
        let outcome = evaluate_handshake("token", Some("subscribe"), Some("token"), Some("1158201"));
        assert_eq!(outcome, HandshakeOutcome::Accepted("1158201".to_string()));
    }

    #[test]
    fn handshake_rejects_bad_mode_or_token() {
        assert_eq!(
            evaluate_handshake("token", Some("unsubscribe"), Some("token"), Some("c")),
            HandshakeOutcome::Forbidden
        );
        assert_eq!(
            evaluate_handshake("token", Some("subscribe"), Some("wrong"), Some("c")),
            HandshakeOutcome::Forbidden
        );
        assert_eq!(
            evaluate_handshake("token", None, None, Some("c")),
            HandshakeOutcome::Forbidden
        );
    }

    #[test]
    fn handshake_requires_a_challenge() {
        assert_eq!(
            evaluate_handshake("token", Some("subscribe"), Some("token"), None),
            HandshakeOutcome::MissingChallenge
        );
        assert_eq!(
            evaluate_handshake("token", Some("subscribe"), Some("token"), Some("")),
            HandshakeOutcome::MissingChallenge
        );
    }
}
