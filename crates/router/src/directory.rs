//! Principal directory: resolves tokens to registered producers and consumers.
//!
//! Backed by PostgreSQL when `DATABASE_URL` is set, otherwise by an in-memory
//! map seeded from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;
use uuid::Uuid;

use relay_common::config::SeedPrincipal;
use relay_common::error::AppError;
use relay_common::token::{generate_token, is_valid_format};
use relay_common::types::{Principal, PrincipalKind};

#[derive(Clone)]
pub enum Directory {
    Postgres(PgDirectory),
    Memory(MemoryDirectory),
}

impl Directory {
    pub async fn lookup_by_token(&self, token: &str) -> Result<Option<Principal>, AppError> {
        match self {
            Directory::Postgres(dir) => dir.lookup_by_token(token).await,
            Directory::Memory(dir) => Ok(dir.lookup_by_token(token).await),
        }
    }

    pub async fn touch_last_seen(&self, id: Uuid) -> Result<(), AppError> {
        match self {
            Directory::Postgres(dir) => dir.touch_last_seen(id).await,
            Directory::Memory(dir) => {
                dir.touch_last_seen(id).await;
                Ok(())
            }
        }
    }

    /// Register a principal. A token is generated when none is given.
    pub async fn register(
        &self,
        name: &str,
        kind: PrincipalKind,
        token: Option<&str>,
    ) -> Result<Principal, AppError> {
        let token = match token {
            Some(t) if is_valid_format(t) => t.to_string(),
            Some(t) => {
                return Err(AppError::Validation(format!(
                    "token '{}' must be 6 uppercase letters or digits",
                    t
                )));
            }
            None => generate_token(),
        };
        let principal = Principal::new(name, token, kind);

        match self {
            Directory::Postgres(dir) => dir.insert(principal).await,
            Directory::Memory(dir) => dir.insert(principal).await,
        }
    }

    /// Register configured principals, skipping tokens that already exist.
    pub async fn seed(&self, seeds: &[SeedPrincipal]) -> Result<(), AppError> {
        for seed in seeds {
            if self.lookup_by_token(&seed.token).await?.is_some() {
                continue;
            }
            let principal = self.register(&seed.name, seed.kind, Some(&seed.token)).await?;
            tracing::info!(
                principal_id = %principal.id,
                name = %principal.display_name,
                kind = %principal.kind,
                "Seeded principal"
            );
        }
        Ok(())
    }
}

/// PostgreSQL-backed directory over the `principals` table.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    /// Connect and apply pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");

        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn lookup_by_token(&self, token: &str) -> Result<Option<Principal>, AppError> {
        let principal: Option<Principal> = sqlx::query_as(
            "SELECT id, display_name, auth_token, kind, last_seen_at FROM principals WHERE auth_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(principal)
    }

    pub async fn touch_last_seen(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE principals SET last_seen_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert(&self, principal: Principal) -> Result<Principal, AppError> {
        let inserted: Principal = sqlx::query_as(
            r#"
            INSERT INTO principals (id, display_name, auth_token, kind)
            VALUES ($1, $2, $3, $4)
            RETURNING id, display_name, auth_token, kind, last_seen_at
            "#,
        )
        .bind(principal.id)
        .bind(&principal.display_name)
        .bind(&principal.auth_token)
        .bind(principal.kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }
}

/// In-memory directory keyed by token.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    principals: Arc<RwLock<HashMap<String, Principal>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup_by_token(&self, token: &str) -> Option<Principal> {
        self.principals.read().await.get(token).cloned()
    }

    pub async fn touch_last_seen(&self, id: Uuid) {
        let mut principals = self.principals.write().await;
        if let Some(principal) = principals.values_mut().find(|p| p.id == id) {
            principal.last_seen_at = Some(Utc::now());
        }
    }

    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }

    async fn insert(&self, principal: Principal) -> Result<Principal, AppError> {
        let mut principals = self.principals.write().await;
        if principals.contains_key(&principal.auth_token) {
            return Err(AppError::Validation("token is already registered".to_string()));
        }
        principals.insert(principal.auth_token.clone(), principal.clone());
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_lookup_and_touch() {
        let dir = Directory::Memory(MemoryDirectory::new());
        let principal = dir
            .register("build-agent", PrincipalKind::Producer, Some("ABC123"))
            .await
            .unwrap();

        let found = dir.lookup_by_token("ABC123").await.unwrap().unwrap();
        assert_eq!(found.id, principal.id);
        assert!(found.last_seen_at.is_none());

        dir.touch_last_seen(principal.id).await.unwrap();
        let found = dir.lookup_by_token("ABC123").await.unwrap().unwrap();
        assert!(found.last_seen_at.is_some());

        assert!(dir.lookup_by_token("ZZZ999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_generates_valid_token() {
        let dir = Directory::Memory(MemoryDirectory::new());
        let principal = dir.register("discord", PrincipalKind::Consumer, None).await.unwrap();
        assert!(is_valid_format(&principal.auth_token));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_or_duplicate_tokens() {
        let dir = Directory::Memory(MemoryDirectory::new());
        assert!(matches!(
            dir.register("x", PrincipalKind::Producer, Some("abc123")).await,
            Err(AppError::Validation(_))
        ));

        dir.register("x", PrincipalKind::Producer, Some("ABC123")).await.unwrap();
        assert!(dir.register("y", PrincipalKind::Consumer, Some("ABC123")).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let memory = MemoryDirectory::new();
        let dir = Directory::Memory(memory.clone());
        let seeds = SeedPrincipal::parse_list("producer:ABC123:cli,consumer:XYZ789:webhook").unwrap();

        dir.seed(&seeds).await.unwrap();
        dir.seed(&seeds).await.unwrap();

        assert_eq!(memory.len().await, 2);
        let consumer = dir.lookup_by_token("XYZ789").await.unwrap().unwrap();
        assert_eq!(consumer.kind, PrincipalKind::Consumer);
        assert_eq!(consumer.display_name, "webhook");
    }
}
