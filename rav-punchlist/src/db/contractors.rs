//! Contractor lookups
//!
//! Contractors are maintained elsewhere (self-service and admin screens);
//! the pipeline only reads them. `insert_contractor` exists for seeding.

use rav_common::time::now_db_string;
use rav_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::models::{Availability, Contractor, NewContractor, PriceRange};

fn json_list(row: &SqliteRow, column: &str) -> Result<Vec<String>> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Internal(format!("Malformed {} list: {}", column, e)))
}

fn contractor_from_row(row: &SqliteRow) -> Result<Contractor> {
    let id: i64 = row.try_get("id")?;

    let availability_text: String = row.try_get("availability_status")?;
    let availability_status = availability_text.parse().unwrap_or_else(|_| {
        warn!(contractor_id = id, value = %availability_text, "Unknown availability status, treating as unavailable");
        Availability::Unavailable
    });

    let price_range: Option<String> = row.try_get("price_range")?;

    Ok(Contractor {
        id,
        business_name: row.try_get("business_name")?,
        phone: row.try_get("phone")?,
        specialties: json_list(row, "specialties")?,
        service_areas: json_list(row, "service_areas")?,
        price_range: price_range.as_deref().and_then(PriceRange::parse_lenient),
        availability_status,
        rating: row.try_get("rating")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
    })
}

pub async fn insert_contractor(pool: &SqlitePool, contractor: &NewContractor) -> Result<i64> {
    let now = now_db_string();
    let specialties = serde_json::to_string(&contractor.specialties)?;
    let service_areas = serde_json::to_string(&contractor.service_areas)?;
    let phone = contractor.phone.as_deref().and_then(rav_common::phone::normalize);

    let id = sqlx::query(
        r#"
        INSERT INTO contractors (business_name, phone, specialties, service_areas, price_range,
                                 availability_status, rating, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&contractor.business_name)
    .bind(phone)
    .bind(specialties)
    .bind(service_areas)
    .bind(contractor.price_range.map(|p| p.as_str()))
    .bind(contractor.availability_status.as_str())
    .bind(contractor.rating)
    .bind(contractor.is_active as i64)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_contractor(pool: &SqlitePool, id: i64) -> Result<Option<Contractor>> {
    let row = sqlx::query("SELECT * FROM contractors WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(contractor_from_row).transpose()
}

/// All active contractors in id order
///
/// Specialty and service-area matching happens in the selector; the lists
/// are JSON columns and the candidate pool is small.
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Contractor>> {
    let rows = sqlx::query("SELECT * FROM contractors WHERE is_active = 1 ORDER BY id")
        .fetch_all(pool)
        .await?;
    rows.iter().map(contractor_from_row).collect()
}

pub async fn find_by_phone(pool: &SqlitePool, phone: &str) -> Result<Option<Contractor>> {
    let row = sqlx::query("SELECT * FROM contractors WHERE phone = ? ORDER BY id LIMIT 1")
        .bind(phone)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(contractor_from_row).transpose()
}
