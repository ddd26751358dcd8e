//! Payment token manager
//!
//! A token is a short-lived, single-use credential authorizing one settlement
//! into a specific account. The wire form (QR content) is a JSON payload plus
//! a blake3 keyed MAC over the payload's canonical bytes; any edit to the
//! embedded account, amount, or expiry fails authentication. Consumption is a
//! compare-and-set executed inside the store's atomic transfer batch, so a
//! committed transfer and the consumed marker can never diverge.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::refgen;
use crate::store::Store;
use crate::types::{AccountId, Amount, PrincipalId};
use crate::{Error, Result};

/// Claims embedded in a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token identifier (UUIDv4, unguessable)
    pub token_id: Uuid,

    /// Account the redemption credits
    pub receiving_account: AccountId,

    /// Fixed redemption amount, if bound
    pub fixed_amount: Option<Amount>,

    /// Issue time, unix millis
    pub issued_at_ms: i64,

    /// Expiry, unix millis
    pub expires_at_ms: i64,

    /// Issuing principal
    pub issuer: PrincipalId,
}

impl TokenPayload {
    /// Expiry as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.expires_at_ms).unwrap_or_else(Utc::now)
    }

    /// Whether the token is past expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() > self.expires_at_ms
    }

    /// Canonical bytes the MAC covers
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Wire form of a token: payload plus MAC, JSON-encoded for QR transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedToken {
    /// Authenticated claims
    pub payload: TokenPayload,

    /// blake3 keyed MAC over the payload's canonical bytes, hex
    pub mac_hex: String,
}

impl SignedToken {
    /// Encode for transport
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Other(format!("token encoding failed: {}", e)))
    }

    /// Decode from transport form. Authentication happens separately.
    pub fn decode(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::TokenMalformed(e.to_string()))
    }
}

/// Server-side token lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenState {
    /// Issued and redeemable
    Active,
    /// Redeemed; terminal
    Consumed {
        /// Transfer that consumed the token
        transfer_id: Uuid,
        /// When
        consumed_at: DateTime<Utc>,
    },
}

/// Persisted token record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Authenticated claims as issued
    pub payload: TokenPayload,

    /// Lifecycle state
    pub state: TokenState,
}

/// Issues and validates payment tokens
pub struct TokenManager {
    key: [u8; 32],
    default_validity: Duration,
    store: Arc<Store>,
}

impl TokenManager {
    /// Create from config. A missing key means tokens are bound to this
    /// process lifetime.
    pub fn new(store: Arc<Store>, config: &TokenConfig) -> Result<Self> {
        let key = match &config.mac_key_hex {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)
                    .map_err(|e| Error::Config(format!("bad token key hex: {}", e)))?;
                bytes
                    .try_into()
                    .map_err(|_| Error::Config("token key must be 32 bytes".to_string()))?
            }
            None => rand::random::<[u8; 32]>(),
        };

        let default_validity = Duration::seconds(config.default_validity_secs as i64);

        Ok(Self {
            key,
            default_validity,
            store,
        })
    }

    /// Issue a token bound to `receiving_account`.
    ///
    /// Persists an `Active` record and returns the signed wire token.
    pub fn issue(
        &self,
        receiving_account: &AccountId,
        fixed_amount: Option<Amount>,
        validity: Option<Duration>,
        issuer: &PrincipalId,
    ) -> Result<SignedToken> {
        // The account must resolve at issue time; redemption re-resolves it.
        self.store.get_account(receiving_account)?;

        if let Some(amount) = fixed_amount {
            if amount.is_zero() {
                return Err(Error::InvalidAmount(
                    "fixed token amount must be positive".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let validity = validity.unwrap_or(self.default_validity);
        let payload = TokenPayload {
            token_id: refgen::token_id(),
            receiving_account: receiving_account.clone(),
            fixed_amount,
            issued_at_ms: now.timestamp_millis(),
            expires_at_ms: (now + validity).timestamp_millis(),
            issuer: issuer.clone(),
        };

        let mac_hex = self.mac_for(&payload)?.to_hex().to_string();

        self.store.put_token_record(&TokenRecord {
            payload: payload.clone(),
            state: TokenState::Active,
        })?;

        tracing::info!(
            token_id = %payload.token_id,
            account = %receiving_account,
            expires_at = %payload.expires_at(),
            "issued payment token"
        );

        Ok(SignedToken { payload, mac_hex })
    }

    /// Validate a wire token. Read-only and idempotent.
    ///
    /// Ordering: authentication, then expiry, then consumption state, so a
    /// tampered token is never reported as merely expired.
    pub fn validate(&self, token_str: &str) -> Result<TokenPayload> {
        let token = SignedToken::decode(token_str)?;
        self.authenticate(&token)?;

        if token.payload.is_expired(Utc::now()) {
            return Err(Error::TokenExpired(token.payload.expires_at()));
        }

        let record = self
            .store
            .get_token_record(token.payload.token_id)?
            .ok_or_else(|| Error::TokenMalformed("unknown token".to_string()))?;

        if let TokenState::Consumed { transfer_id, .. } = record.state {
            return Err(Error::TokenAlreadyConsumed(transfer_id));
        }

        // The stored claims are authoritative over the wire copy.
        Ok(record.payload)
    }

    fn authenticate(&self, token: &SignedToken) -> Result<()> {
        let mac_bytes: [u8; 32] = hex::decode(&token.mac_hex)
            .map_err(|_| Error::TokenMalformed("bad MAC encoding".to_string()))?
            .try_into()
            .map_err(|_| Error::TokenMalformed("bad MAC length".to_string()))?;

        let expected = self.mac_for(&token.payload)?;

        // blake3::Hash equality is constant-time
        if expected != blake3::Hash::from(mac_bytes) {
            return Err(Error::TokenMalformed("MAC verification failed".to_string()));
        }

        Ok(())
    }

    fn mac_for(&self, payload: &TokenPayload) -> Result<blake3::Hash> {
        Ok(blake3::keyed_hash(&self.key, &payload.canonical_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn manager() -> (TokenManager, Arc<Store>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let store = Arc::new(Store::open(&config).unwrap());
        store
            .create_account(crate::store::tests_support::account("acc-r", "worker-1", 0))
            .unwrap();

        let manager = TokenManager::new(store.clone(), &config.token).unwrap();
        (manager, store, temp_dir)
    }

    fn issue_default(manager: &TokenManager) -> SignedToken {
        manager
            .issue(
                &AccountId::new("acc-r"),
                Some(Amount::from_minor(500_00)),
                None,
                &PrincipalId::new("employer-1"),
            )
            .unwrap()
    }

    #[test]
    fn issue_and_validate_roundtrip() {
        let (manager, _store, _dir) = manager();
        let token = issue_default(&manager);

        let wire = token.encode().unwrap();
        let payload = manager.validate(&wire).unwrap();
        assert_eq!(payload.token_id, token.payload.token_id);
        assert_eq!(payload.fixed_amount, Some(Amount::from_minor(500_00)));
        assert_eq!(payload.receiving_account, AccountId::new("acc-r"));
    }

    #[test]
    fn validation_is_idempotent() {
        let (manager, _store, _dir) = manager();
        let wire = issue_default(&manager).encode().unwrap();

        let first = manager.validate(&wire).unwrap();
        let second = manager.validate(&wire).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tampered_amount_fails_authentication() {
        let (manager, _store, _dir) = manager();
        let mut token = issue_default(&manager);
        token.payload.fixed_amount = Some(Amount::from_minor(999_999));

        let err = manager.validate(&token.encode().unwrap()).unwrap_err();
        assert!(matches!(err, Error::TokenMalformed(_)));
    }

    #[test]
    fn tampered_account_fails_authentication() {
        let (manager, _store, _dir) = manager();
        let mut token = issue_default(&manager);
        token.payload.receiving_account = AccountId::new("acc-attacker");

        let err = manager.validate(&token.encode().unwrap()).unwrap_err();
        assert!(matches!(err, Error::TokenMalformed(_)));
    }

    #[test]
    fn garbage_fails_as_malformed() {
        let (manager, _store, _dir) = manager();
        assert!(matches!(
            manager.validate("not json").unwrap_err(),
            Error::TokenMalformed(_)
        ));
    }

    #[test]
    fn expired_token_fails_expired() {
        let (manager, _store, _dir) = manager();
        let token = manager
            .issue(
                &AccountId::new("acc-r"),
                None,
                Some(Duration::milliseconds(-1)),
                &PrincipalId::new("employer-1"),
            )
            .unwrap();

        let err = manager.validate(&token.encode().unwrap()).unwrap_err();
        assert!(matches!(err, Error::TokenExpired(_)));
    }

    #[test]
    fn consumed_token_fails_already_consumed() {
        let (manager, store, _dir) = manager();
        let token = issue_default(&manager);
        let transfer_id = Uuid::now_v7();

        let mut record = store.get_token_record(token.payload.token_id).unwrap().unwrap();
        record.state = TokenState::Consumed {
            transfer_id,
            consumed_at: Utc::now(),
        };
        store.put_token_record(&record).unwrap();

        let err = manager.validate(&token.encode().unwrap()).unwrap_err();
        match err {
            Error::TokenAlreadyConsumed(id) => assert_eq!(id, transfer_id),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn unknown_account_rejected_at_issue() {
        let (manager, _store, _dir) = manager();
        let err = manager
            .issue(
                &AccountId::new("acc-missing"),
                None,
                None,
                &PrincipalId::new("employer-1"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
    }
}
