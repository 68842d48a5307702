use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite, SqliteConnection, Transaction};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AgriError, AgriResult};

pub type DbPool = Pool<Sqlite>;

/// Connection handed to every operation; a `Transaction` derefs to it.
pub type DbConn = SqliteConnection;

pub async fn init_pool_with_options(
    opts: SqliteConnectOptions,
    max_connections: u32,
    in_memory: bool,
) -> AgriResult<DbPool> {
    let pool_opts = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30));

    // An in-memory database lives only as long as its connection.
    let pool_opts = if in_memory {
        pool_opts.idle_timeout(None).max_lifetime(None)
    } else {
        pool_opts
            .idle_timeout(Duration::from_secs(120))
            .max_lifetime(Duration::from_secs(300))
    };

    Ok(pool_opts.connect_with(opts).await?)
}

pub async fn init_pool(database_url: &str, max_connections: u32) -> AgriResult<DbPool> {
    let in_memory = database_url.contains(":memory:");
    let mut opts = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AgriError::Internal(format!("Invalid DB URL: {}", e)))?
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    init_pool_with_options(opts, max_connections, in_memory).await
}

/// Opens a transaction that takes the write lock up front.
///
/// A deferred transaction that reads before it writes cannot upgrade its snapshot once
/// another writer has committed (SQLITE_BUSY_SNAPSHOT). Taking the lock at BEGIN makes
/// concurrent writers queue on `busy_timeout` and then see the committed state.
pub async fn begin_write(pool: &DbPool) -> AgriResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

pub async fn init_database(pool: &DbPool, config: &Config) -> AgriResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    ensure_seeds(pool, config).await?;
    tracing::info!("Database ready");
    Ok(())
}

async fn ensure_seeds(pool: &DbPool, config: &Config) -> AgriResult<()> {
    let admin_email = config.admin_email.trim().to_lowercase();

    let admin_exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&admin_email)
        .fetch_one(pool)
        .await?;
    if admin_exists.0 == 0 {
        let hash = bcrypt::hash(&config.admin_password, config.bcrypt_cost)?;
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (email, password_hash, first_name, last_name, role, created_at, updated_at)
             VALUES (?, ?, 'Admin', 'User', 'admin', ?, ?)
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(&admin_email)
        .bind(hash)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        tracing::info!("Seeded administrator account {}", admin_email);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Farmer,
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AgriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "farmer" => Ok(Role::Farmer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            other => Err(AgriError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Lifecycle of a service request. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 4] = [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Transitions reachable through the non-admin paths.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Cancelled)
                | (RequestStatus::Accepted, RequestStatus::Completed)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AgriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| AgriError::Validation(format!("Unknown status: {}", wanted)))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub is_premium: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_available: bool,
    pub service_radius: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub service_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Field {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub area: Option<f64>,
    pub coordinates: String,
    pub crop_type: Option<String>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceRequest {
    pub id: i64,
    pub field_id: i64,
    pub farmer_id: i64,
    pub operator_id: Option<i64>,
    pub service_type: String,
    pub status: RequestStatus,
    pub scheduled_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let config = Config::for_tests();
    let pool = init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to create pool");
    init_database(&pool, &config)
        .await
        .expect("Failed to migrate test database");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Accepted.can_transition_to(Completed));

        assert!(!Accepted.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        for next in RequestStatus::ALL {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
            assert!(!next.can_transition_to(Pending));
        }
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("Farmer".parse::<Role>().unwrap(), Role::Farmer);
        assert_eq!(" operator ".parse::<Role>().unwrap(), Role::Operator);
        assert!("pilot".parse::<Role>().is_err());
        assert_eq!(
            "cancelled".parse::<RequestStatus>().unwrap(),
            RequestStatus::Cancelled
        );
        assert!("done".parse::<RequestStatus>().is_err());
    }

    #[tokio::test]
    async fn test_admin_is_seeded_once() {
        let pool = test_pool().await;
        init_database(&pool, &Config::for_tests()).await.unwrap();

        let admins: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(admins.0, 1);
    }
}
