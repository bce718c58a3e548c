use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use serde::Deserialize;
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Sale temperature recorded for a lead when the model never reported one
pub const DEFAULT_SALE_TEMPERATURE: u8 = 10;

/// Represents a persisted lead
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Lead {
    pub id: i64,
    pub telegram_id: i64,
    pub name: Option<String>,
    pub service: Option<String>,
    pub preferred_time: Option<String>,
    pub phone: Option<String>,
    pub sale_temperature: i64,
    pub transcript: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Values written when an intake conversation completes
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub telegram_id: i64,
    pub name: String,
    pub service: String,
    pub preferred_time: String,
    pub phone: String,
    pub sale_temperature: u8,
    pub transcript: String,
}

/// Represents a bookable service
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

/// Weekly opening hours for one day (1 = Monday ... 7 = Sunday)
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OpenTime {
    pub day_of_week: i64,
    pub open_time: String,
    pub close_time: String,
}

/// Open a SQLite pool, creating the database file if needed
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    info!("Connecting to database at: {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {database_url}"))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("Failed to connect to database")
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &SqlitePool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            telegram_id INTEGER NOT NULL UNIQUE,
            name TEXT,
            service TEXT,
            preferred_time TEXT,
            phone TEXT,
            sale_temperature INTEGER NOT NULL DEFAULT 10,
            transcript TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create leads table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS services (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price REAL NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create services table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS open_times (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            day_of_week INTEGER NOT NULL,
            open_time TEXT NOT NULL,
            close_time TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create open_times table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS appointments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            telegram_id INTEGER NOT NULL,
            service_id INTEGER NOT NULL,
            scheduled_time TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create appointments table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// A service offered in the catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogService {
    pub name: String,
    pub price: f64,
}

/// Opening hours for one weekday in the catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogOpenTime {
    /// 1 = Monday ... 7 = Sunday
    pub day: i64,
    pub open: String,
    pub close: String,
}

/// Services and opening hours seeded into empty reference tables
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub services: Vec<CatalogService>,
    #[serde(default)]
    pub open_times: Vec<CatalogOpenTime>,
}

impl Default for Catalog {
    fn default() -> Self {
        let service = |name: &str, price| CatalogService {
            name: name.to_string(),
            price,
        };
        Self {
            services: vec![
                service("Initial consultation", 50.0),
                service("Behavioral therapy package", 300.0),
                service("Parent guidance session", 80.0),
            ],
            // Monday(1) to Saturday(6)
            open_times: (1..=6)
                .map(|day| CatalogOpenTime {
                    day,
                    open: "14:00".to_string(),
                    close: "22:00".to_string(),
                })
                .collect(),
        }
    }
}

impl Catalog {
    /// Parse a catalog from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid catalog JSON")
    }

    /// Read a catalog from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::from_json(&json)
    }
}

/// Seed the built-in catalog into empty reference tables
pub async fn seed_default_catalog(pool: &SqlitePool) -> Result<()> {
    seed_catalog(pool, &Catalog::default()).await
}

/// Seed `catalog` into the reference tables that are still empty
pub async fn seed_catalog(pool: &SqlitePool, catalog: &Catalog) -> Result<()> {
    let services: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services")
        .fetch_one(pool)
        .await
        .context("Failed to count services")?;
    if services == 0 {
        seed_services(pool, &catalog.services).await?;
    } else {
        debug!(existing = services, "Services already seeded");
    }

    let open_times: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM open_times")
        .fetch_one(pool)
        .await
        .context("Failed to count open times")?;
    if open_times == 0 {
        seed_open_times(pool, &catalog.open_times).await?;
    } else {
        debug!(existing = open_times, "Open times already seeded");
    }

    Ok(())
}

async fn seed_services(pool: &SqlitePool, services: &[CatalogService]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    for service in services {
        sqlx::query("INSERT INTO services (name, price) VALUES (?1, ?2)")
            .bind(&service.name)
            .bind(service.price)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert service {}", service.name))?;
    }
    tx.commit().await.context("Failed to commit services")?;

    info!(count = services.len(), "Seeded services");
    Ok(())
}

async fn seed_open_times(pool: &SqlitePool, times: &[CatalogOpenTime]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    for time in times {
        sqlx::query("INSERT INTO open_times (day_of_week, open_time, close_time) VALUES (?1, ?2, ?3)")
            .bind(time.day)
            .bind(&time.open)
            .bind(&time.close)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert open time for day {}", time.day))?;
    }
    tx.commit().await.context("Failed to commit open times")?;

    info!(count = times.len(), "Seeded open times");
    Ok(())
}

/// Return all services with pricing
pub async fn list_services(pool: &SqlitePool) -> Result<Vec<Service>, sqlx::Error> {
    sqlx::query_as::<_, Service>("SELECT id, name, price FROM services ORDER BY id")
        .fetch_all(pool)
        .await
}

/// Return weekly open times
pub async fn list_open_times(pool: &SqlitePool) -> Result<Vec<OpenTime>, sqlx::Error> {
    sqlx::query_as::<_, OpenTime>(
        "SELECT day_of_week, open_time, close_time FROM open_times ORDER BY day_of_week",
    )
    .fetch_all(pool)
    .await
}

/// Insert or overwrite the lead for `lead.telegram_id`.
///
/// The original `created_at` is kept when a lead is overwritten.
pub async fn upsert_lead(pool: &SqlitePool, lead: &NewLead) -> Result<(), sqlx::Error> {
    debug!(telegram_id = lead.telegram_id, "Upserting lead");

    sqlx::query(
        "INSERT INTO leads (telegram_id, name, service, preferred_time, phone, sale_temperature, transcript)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(telegram_id) DO UPDATE SET
             name = excluded.name,
             service = excluded.service,
             preferred_time = excluded.preferred_time,
             phone = excluded.phone,
             sale_temperature = excluded.sale_temperature,
             transcript = excluded.transcript,
             updated_at = CURRENT_TIMESTAMP",
    )
    .bind(lead.telegram_id)
    .bind(&lead.name)
    .bind(&lead.service)
    .bind(&lead.preferred_time)
    .bind(&lead.phone)
    .bind(i64::from(lead.sale_temperature))
    .bind(&lead.transcript)
    .execute(pool)
    .await?;

    info!(telegram_id = lead.telegram_id, "Lead saved");
    Ok(())
}

/// Return the lead recorded for a Telegram user, if any
pub async fn get_lead_by_telegram_id(
    pool: &SqlitePool,
    telegram_id: i64,
) -> Result<Option<Lead>, sqlx::Error> {
    sqlx::query_as::<_, Lead>(
        "SELECT id, telegram_id, name, service, preferred_time, phone, sale_temperature,
                transcript, created_at, updated_at
         FROM leads WHERE telegram_id = ?1",
    )
    .bind(telegram_id)
    .fetch_optional(pool)
    .await
}

/// Book `scheduled_time` for a user. Returns `false` when the time is taken.
pub async fn schedule_appointment(
    pool: &SqlitePool,
    telegram_id: i64,
    service_id: i64,
    scheduled_time: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO appointments (telegram_id, service_id, scheduled_time)
         VALUES (?1, ?2, ?3)",
    )
    .bind(telegram_id)
    .bind(service_id)
    .bind(scheduled_time)
    .execute(pool)
    .await?;

    let booked = result.rows_affected() == 1;
    info!(telegram_id, service_id, scheduled_time, booked, "Appointment request processed");
    Ok(booked)
}

/// Count appointments booked by a user
pub async fn count_appointments(pool: &SqlitePool, telegram_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query("SELECT COUNT(*) AS total FROM appointments WHERE telegram_id = ?1")
        .bind(telegram_id)
        .fetch_one(pool)
        .await?
        .try_get("total")
}
