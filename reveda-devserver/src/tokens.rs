//! Token and id minting for the dev server.
//!
//! Tokens are JWT-shaped so clients can read `sub` and `exp`, but they are not signed: the server
//! only accepts tokens it has in its own tables.
use rand::Rng;
use serde_json::json;

fn b64(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

pub fn mint_token(user_id: &str, kind: &str, now: i64, ttl_secs: i64) -> String {
    let mut rng = rand::thread_rng();
    let header = json!({"alg": "none", "typ": "JWT"});
    let payload = json!({
        "sub": user_id,
        "typ": kind,
        "iat": now,
        "exp": now + ttl_secs,
        "jti": format!("{:016x}", rng.gen::<u64>()),
    });
    let sig: [u8; 16] = rng.gen();
    format!(
        "{}.{}.{}",
        b64(header.to_string().as_bytes()),
        b64(payload.to_string().as_bytes()),
        b64(&sig)
    )
}

/// Mongo-style 24 hex character object id
pub fn new_object_id() -> String {
    let bytes: [u8; 12] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[test]
fn test_mint_token() {
    let token = mint_token("64f0c2a1b2c3d4e5f6a7b8c9", "access", 1700000000, 900);
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3);
    let payload: serde_json::Value = serde_json::from_slice(
        &base64::decode_config(parts[1], base64::URL_SAFE_NO_PAD).unwrap(),
    )
    .unwrap();
    assert_eq!(payload["sub"], "64f0c2a1b2c3d4e5f6a7b8c9");
    assert_eq!(payload["typ"], "access");
    assert_eq!(payload["exp"], 1700000900);

    // same inputs, different tokens
    assert_ne!(
        token,
        mint_token("64f0c2a1b2c3d4e5f6a7b8c9", "access", 1700000000, 900)
    );
}

#[test]
fn test_object_id() {
    let id = new_object_id();
    assert_eq!(id.len(), 24);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}
