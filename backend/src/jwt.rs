use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Claims this system cares about in the satellite transport's signed
/// token; unknown claims are ignored. Grounded on the original
/// implementation's `verify_groundcontrol_jwt`, which only checks the
/// signature and does not enforce `exp`/`aud`.
#[derive(Debug, Deserialize)]
struct GroundControlClaims {
    #[allow(dead_code)]
    #[serde(default)]
    sub: Option<String>,
}

/// Verifies the `JWT` field from a satellite ingress post against a
/// pinned RS256 public key (§4.1, §6). Failure is always a 401,
/// matching §7's taxonomy ("invalid token" is bad input, not transient).
pub fn verify_ground_control_jwt(token: &str, public_key_pem: &str) -> Result<(), String> {
    let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
        .map_err(|e| format!("invalid public key: {e}"))?;
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;

    decode::<GroundControlClaims>(token, &key, &validation)
        .map(|_| ())
        .map_err(|e| format!("could not validate JWT signature: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
    }

    // A throwaway keypair generated for this test only; not used
    // anywhere at runtime.
    const TEST_PRIVATE_KEY: &str = include_str!("../keys/test_only_priv.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../keys/test_only_pub.pem");

    #[test]
    fn valid_signature_is_accepted() {
        let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        let token = encode(
            &Header::new(Algorithm::RS256),
            &Claims { sub: "gc".into() },
            &key,
        )
        .unwrap();
        assert!(verify_ground_control_jwt(&token, TEST_PUBLIC_KEY).is_ok());
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(verify_ground_control_jwt("not-a-jwt", TEST_PUBLIC_KEY).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
        let token = encode(
            &Header::new(Algorithm::RS256),
            &Claims { sub: "gc".into() },
            &key,
        )
        .unwrap();
        let other_public_key = include_str!("../keys/ground_control_demo_pub.pem");
        assert!(verify_ground_control_jwt(&token, other_public_key).is_err());
    }
}
