//! Bidirectional `originalId <-> pseudonymId` mapping registry (spec.md
//! §4.2). Mappings are durable — persisted via `sqlx`, unlike the source
//! system's in-memory map, which spec.md §9 calls out as a behavioral gap
//! this implementation must not repeat.

use crate::error::{Error, ErrorCode, Result};
use crate::model::{PseudonymMapping, PseudonymStrategy};
use crate::security::encryption::EncryptionService;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;

/// Process-wide secret used by the `hash` strategy. Read once at startup;
/// an unset or empty value is a hard startup error per spec.md §9's
/// resolved open question — there is no `'default-salt'` fallback.
pub fn load_salt_from_env() -> Result<String> {
    match std::env::var("PSEUDONYM_SALT") {
        Ok(salt) if !salt.is_empty() => Ok(salt),
        _ => Err(Error::new(
            ErrorCode::ConfigValidation,
            "PSEUDONYM_SALT must be set to a non-empty value; there is no default",
        )),
    }
}

pub struct PseudonymRegistry {
    pool: PgPool,
    salt: String,
    encryption: Option<Arc<EncryptionService>>,
}

impl PseudonymRegistry {
    pub fn new(pool: PgPool, salt: String, encryption: Option<Arc<EncryptionService>>) -> Self {
        Self { pool, salt, encryption }
    }

    fn hash_pseudonym(&self, original_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(original_id.as_bytes());
        hasher.update(self.salt.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("pseudo-{}", &hex[..16])
    }

    fn random_pseudonym(&self) -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!("pseudo-{hex}")
    }

    /// Creates (or returns the existing) pseudonym for `original_id`.
    ///
    /// `hash` is deterministic: the same `original_id` under the same salt
    /// always yields the same pseudonym, and an existing mapping wins on
    /// collision. `token` draws random hex until a unique value is found.
    /// `encryption` requires an `EncryptionService` to have been supplied.
    pub async fn create_pseudonym(
        &self,
        original_id: &str,
        strategy: PseudonymStrategy,
    ) -> Result<String> {
        if let Some(existing) = self.lookup(original_id).await? {
            return Ok(existing);
        }

        let pseudonym_id = match strategy {
            PseudonymStrategy::Hash => self.hash_pseudonym(original_id),
            PseudonymStrategy::Token => loop {
                let candidate = self.random_pseudonym();
                if self.reverse(&candidate).await?.is_none() {
                    break candidate;
                }
            },
            PseudonymStrategy::Encryption => {
                let enc = self.encryption.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorCode::ConfigValidation,
                        "encryption strategy requires an encryption key to be configured",
                    )
                })?;
                format!("pseudo-{}", enc.encrypt_string(original_id)?)
            }
        };

        let strategy_str = match strategy {
            PseudonymStrategy::Hash => "hash",
            PseudonymStrategy::Token => "token",
            PseudonymStrategy::Encryption => "encryption",
        };

        sqlx::query(
            "INSERT INTO pseudonym_mapping (original_id, pseudonym_id, strategy, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (original_id) DO NOTHING",
        )
        .bind(original_id)
        .bind(&pseudonym_id)
        .bind(strategy_str)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        // Another writer may have raced us; always return the row that
        // actually won so callers never see two pseudonyms for one id.
        self.lookup(original_id)
            .await?
            .ok_or_else(|| Error::internal("pseudonym insert did not produce a readable row"))
    }

    pub async fn lookup(&self, original_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT pseudonym_id FROM pseudonym_mapping WHERE original_id = $1")
                .bind(original_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn reverse(&self, pseudonym_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT original_id FROM pseudonym_mapping WHERE pseudonym_id = $1")
                .bind(pseudonym_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn exists(&self, original_id: &str) -> Result<bool> {
        Ok(self.lookup(original_id).await?.is_some())
    }

    pub async fn get_mapping(&self, original_id: &str) -> Result<Option<PseudonymMapping>> {
        let row: Option<(String, String, String, chrono::DateTime<Utc>, Option<String>)> =
            sqlx::query_as(
                "SELECT original_id, pseudonym_id, strategy, created_at, context
                 FROM pseudonym_mapping WHERE original_id = $1",
            )
            .bind(original_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(original_id, pseudonym_id, strategy, created_at, context)| {
            let strategy = match strategy.as_str() {
                "hash" => PseudonymStrategy::Hash,
                "token" => PseudonymStrategy::Token,
                _ => PseudonymStrategy::Encryption,
            };
            PseudonymMapping { original_id, pseudonym_id, strategy, created_at, context }
        }))
    }
}

pub const PSEUDONYM_MAPPING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pseudonym_mapping (
    original_id  VARCHAR(255) PRIMARY KEY,
    pseudonym_id VARCHAR(255) UNIQUE NOT NULL,
    strategy     VARCHAR(20) NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    context      TEXT
);
CREATE INDEX IF NOT EXISTS idx_pseudonym_mapping_pseudonym_id ON pseudonym_mapping (pseudonym_id);
"#;
