//! HMAC-bound confirmation tokens.
//!
//! A token has the form `tc_<nonce>_<issuedAt>_<mac>`:
//!
//! - `nonce`: 32 hex chars, unique per held call
//! - `issuedAt`: unix seconds
//! - `mac`: hex HMAC-SHA256 over nonce, issuedAt, tool name, the
//!   canonical arguments and the attested references
//!
//! The server keeps no record of issued tokens. Everything needed to check a
//! resubmission travels with it, and the MAC makes any edit detectable.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use relais_contracts::{
    error::{RelaisError, RelaisResult},
    known::KnownEntity,
};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "tc_";

/// Tolerated clock skew for tokens stamped slightly in the future.
const FUTURE_SKEW_SECS: i64 = 60;

/// What a token is bound to.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    pub name: &'a str,
    pub arguments: &'a Value,
    pub attested_refs: &'a [KnownEntity],
}

/// A token split into its parts. Says nothing about validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub nonce: String,
    pub issued_at: i64,
    pub mac: Vec<u8>,
}

impl ParsedToken {
    pub fn parse(token: &str) -> RelaisResult<Self> {
        let malformed = || RelaisError::ConfirmationMismatch {
            reason: "confirmation token is malformed".to_string(),
        };

        let body = token.strip_prefix(PREFIX).ok_or_else(malformed)?;
        let mut parts = body.split('_');
        let (nonce, issued_at, mac) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(nonce), Some(issued_at), Some(mac), None) => (nonce, issued_at, mac),
            _ => return Err(malformed()),
        };

        if nonce.is_empty() || !nonce.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        let issued_at: i64 = issued_at.parse().map_err(|_| malformed())?;
        let mac = hex::decode(mac).map_err(|_| malformed())?;

        Ok(Self { nonce: nonce.to_string(), issued_at, mac })
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.issued_at, 0).single()
    }
}

/// Issues and checks confirmation tokens with one secret key.
#[derive(Clone)]
pub struct TokenSigner {
    /// Keyed once; every token MAC starts from a clone of it.
    keyed: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Returns `ConfigError` for an empty key.
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> RelaisResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(RelaisError::ConfigError {
                reason: "confirmation secret must not be empty".to_string(),
            });
        }
        let keyed = HmacSha256::new_from_slice(&key).map_err(|e| RelaisError::ConfigError {
            reason: format!("confirmation secret rejected: {e}"),
        })?;
        Ok(Self { keyed, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, binding: Binding<'_>) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.issue_at(binding, &nonce, Utc::now().timestamp())
    }

    pub fn issue_at(&self, binding: Binding<'_>, nonce: &str, issued_at: i64) -> String {
        let mac = self.mac(nonce, issued_at, binding).finalize().into_bytes();
        format!("{PREFIX}{nonce}_{issued_at}_{}", hex::encode(mac))
    }

    /// Check `token` against `binding` at the current time.
    pub fn verify(&self, token: &str, binding: Binding<'_>) -> RelaisResult<ParsedToken> {
        self.verify_at(token, binding, Utc::now())
    }

    /// Errors: `ConfirmationMismatch` if the token is malformed, does not
    /// match the binding, or is outside its validity window.
    pub fn verify_at(
        &self,
        token: &str,
        binding: Binding<'_>,
        now: DateTime<Utc>,
    ) -> RelaisResult<ParsedToken> {
        let parsed = ParsedToken::parse(token)?;

        self.mac(&parsed.nonce, parsed.issued_at, binding)
            .verify_slice(&parsed.mac)
            .map_err(|_| RelaisError::ConfirmationMismatch {
                reason: "confirmation token does not match the pending action".to_string(),
            })?;

        let age = now.timestamp() - parsed.issued_at;
        if age < -FUTURE_SKEW_SECS {
            return Err(RelaisError::ConfirmationMismatch {
                reason: "confirmation token is not yet valid".to_string(),
            });
        }
        if age > self.ttl.num_seconds() {
            return Err(RelaisError::ConfirmationMismatch {
                reason: "confirmation token expired".to_string(),
            });
        }

        Ok(parsed)
    }

    /// When a token stops being accepted.
    pub fn expires_at(&self, parsed: &ParsedToken) -> DateTime<Utc> {
        parsed.issued_at().unwrap_or_else(Utc::now) + self.ttl
    }

    fn mac(&self, nonce: &str, issued_at: i64, binding: Binding<'_>) -> HmacSha256 {
        let mut mac = self.keyed.clone();

        let mut refs: Vec<String> = binding
            .attested_refs
            .iter()
            .map(|entity| format!("{}:{}", entity.kind, entity.id))
            .collect();
        refs.sort();
        refs.dedup();

        for field in [
            nonce.to_string(),
            issued_at.to_string(),
            binding.name.to_string(),
            canonical_json(binding.arguments),
            refs.join(","),
        ] {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        mac
    }
}

/// Serialize with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use relais_contracts::context::EntityKind;

    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret".to_vec(), Duration::minutes(10)).unwrap()
    }

    fn refs() -> Vec<KnownEntity> {
        vec![KnownEntity::new(EntityKind::Client, "abc")]
    }

    #[test]
    fn issued_token_verifies() {
        let args = json!({ "id": "abc", "nom": "X" });
        let refs = refs();
        let binding = Binding { name: "update_client", arguments: &args, attested_refs: &refs };

        let token = signer().issue(binding);

        assert!(token.starts_with("tc_"));
        assert!(signer().verify(&token, binding).is_ok());
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({ "id": "abc", "nom": "X" });
        let b: Value = serde_json::from_str(r#"{"nom":"X","id":"abc"}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&json!({ "b": [1, { "d": 1, "c": 2 }], "a": null })),
            r#"{"a":null,"b":[1,{"c":2,"d":1}]}"#);
    }

    #[test]
    fn changed_arguments_break_the_mac() {
        let args = json!({ "id": "abc", "nom": "X" });
        let tampered = json!({ "id": "abc", "nom": "Y" });
        let refs = refs();

        let token = signer().issue(Binding { name: "update_client", arguments: &args, attested_refs: &refs });
        let err = signer()
            .verify(&token, Binding { name: "update_client", arguments: &tampered, attested_refs: &refs })
            .unwrap_err();

        assert!(matches!(err, RelaisError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn injected_refs_break_the_mac() {
        let args = json!({ "id": "zzz" });
        let token = signer().issue(Binding { name: "update_client", arguments: &args, attested_refs: &[] });

        let injected = vec![KnownEntity::new(EntityKind::Client, "zzz")];
        assert!(signer()
            .verify(&token, Binding { name: "update_client", arguments: &args, attested_refs: &injected })
            .is_err());
    }

    #[test]
    fn other_secret_rejects() {
        let args = json!({});
        let binding = Binding { name: "delete_client", arguments: &args, attested_refs: &[] };
        let token = signer().issue(binding);

        let other = TokenSigner::new(b"other".to_vec(), Duration::minutes(10)).unwrap();
        assert!(other.verify(&token, binding).is_err());
    }

    #[test]
    fn expiry_window() {
        let args = json!({});
        let binding = Binding { name: "delete_client", arguments: &args, attested_refs: &[] };
        let issued = Utc::now() - Duration::minutes(11);
        let token = signer().issue_at(binding, "00ff", issued.timestamp());

        let err = signer().verify(&token, binding).unwrap_err();
        assert!(err.to_string().contains("expired"));

        assert!(signer().verify_at(&token, binding, issued + Duration::minutes(9)).is_ok());
    }

    #[test]
    fn malformed_tokens() {
        for token in ["", "abc", "tc_", "tc_zz_1_00", "tc_00_notanumber_00", "tc_00_1_nothex", "tc_00_1_00_extra"] {
            assert!(ParsedToken::parse(token).is_err(), "{token} should be rejected");
        }
        assert!(ParsedToken::parse("tc_00ff_1700000000_abcd").is_ok());
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        assert!(TokenSigner::new(Vec::new(), Duration::minutes(1)).is_err());
    }

    #[test]
    fn one_signer_issues_independent_macs() {
        let args = json!({ "id": "abc" });
        let other_args = json!({ "id": "def" });
        let refs = refs();
        let binding = Binding { name: "update_client", arguments: &args, attested_refs: &refs };
        let other = Binding { name: "update_client", arguments: &other_args, attested_refs: &refs };

        let issuer = signer();
        let first = issuer.issue_at(binding, "00ff", 1_700_000_000);
        issuer.issue_at(other, "00ff", 1_700_000_000);
        let again = issuer.issue_at(binding, "00ff", 1_700_000_000);

        assert_eq!(first, again);
        assert_eq!(first, signer().issue_at(binding, "00ff", 1_700_000_000));
    }
}
