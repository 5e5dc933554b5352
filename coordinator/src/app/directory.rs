//! Read-only view of the tenant-management database.
//!
//! Tenant records and their encrypted secrets are owned by another service.
//! This module only reads them.

use core::{fmt, str::FromStr};

use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::{PgPool, postgres::PgPoolOptions};
use thiserror::Error as ThisError;

/// Lifecycle status of a tenant as recorded by the tenant-management service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantStatus {
    Provisioning,
    Active,
    Suspended,
    Deleted,
}

impl FromStr for TenantStatus {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            other => Err(DirectoryError::UnknownStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub id: String,
    pub db_name: String,
    pub status: TenantStatus,
}

/// Secret envelopes as stored, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub jwt_secret: String,
    pub db_password: String,
}

/// Plaintext credentials for the duration of a single operation.
#[derive(Debug)]
pub struct DecryptedSecret {
    pub jwt_secret: SecretString,
    pub db_password: SecretString,
}

#[derive(Debug, ThisError)]
pub enum DirectoryError {
    #[error("project directory query failed")]
    Query(#[from] sqlx::Error),
    #[error("unknown project status '{0}'")]
    UnknownStatus(String),
}

/// Source of tenant records and their encrypted secrets.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, DirectoryError>;

    async fn encrypted_secret(
        &self,
        tenant_id: &str,
    ) -> Result<Option<EncryptedSecret>, DirectoryError>;
}

/// [`ProjectDirectory`] backed by the tenant-management Postgres database.
#[derive(Debug, Clone)]
pub struct PgProjectDirectory {
    pool: PgPool,
}

impl PgProjectDirectory {
    /// Builds a lazily connecting pool, so startup does not depend on the database being up.
    ///
    /// # Errors
    ///
    /// Returns an error if the database URL cannot be parsed.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, DirectoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ProjectDirectory for PgProjectDirectory {
    async fn tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, DirectoryError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, db_name, status FROM projects WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(id, db_name, status)| {
            Ok(TenantRecord {
                id,
                db_name,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    async fn encrypted_secret(
        &self,
        tenant_id: &str,
    ) -> Result<Option<EncryptedSecret>, DirectoryError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT jwt_secret, db_password FROM project_secrets WHERE project_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(jwt_secret, db_password)| EncryptedSecret {
            jwt_secret,
            db_password,
        }))
    }
}
