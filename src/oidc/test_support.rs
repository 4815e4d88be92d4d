//! Token minting helpers shared by the oidc unit tests.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

pub const KID: &str = "test-key-1";
pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "authproxy-client";

const SIGNING_KEY: &str = include_str!("../../tests/fixtures/idp_signing_key.pem");
const FOREIGN_KEY: &str = include_str!("../../tests/fixtures/foreign_signing_key.pem");
const JWKS: &str = include_str!("../../tests/fixtures/jwks.json");

pub fn jwks_json() -> Value {
    serde_json::from_str(JWKS).unwrap()
}

pub fn jwks() -> JwkSet {
    serde_json::from_str(JWKS).unwrap()
}

pub fn jwks_modulus() -> String {
    jwks_json()["keys"][0]["n"].as_str().unwrap().to_string()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims of a token that passes every check, for the given nonce.
pub fn claims(nonce: &str) -> Value {
    let now = now();
    json!({
        "iss": ISSUER,
        "sub": "user-42",
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 3600,
        "nonce": nonce,
        "email": "alice@example.com",
        "preferred_username": "alice",
    })
}

/// RS256 token signed by the key published in the JWKS fixture.
pub fn mint(claims: &Value) -> String {
    mint_with(claims, Some(KID), SIGNING_KEY)
}

/// RS256 token signed by a key the JWKS does not contain, under the known `kid`.
pub fn mint_foreign(claims: &Value) -> String {
    mint_with(claims, Some(KID), FOREIGN_KEY)
}

pub fn mint_with(claims: &Value, kid: Option<&str>, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// HS256 token keyed with an arbitrary secret, under the known `kid`.
pub fn mint_hs256(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KID.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(b"shared")).unwrap()
}

/// Unsigned `alg: none` token.
pub fn mint_unsigned(claims: &Value) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let header = json!({"alg": "none", "typ": "JWT", "kid": KID});
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}
