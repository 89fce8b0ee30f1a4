use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::brand::{Brand, BrandIdentity};
use crate::models::creative::{Creative, CreativeAssets, CreativeCopy, CreativeFormat, CreativeStatus};
use crate::models::template::{LayoutStyle, Template};

fn brand_from_row(row: &PgRow) -> Result<Brand, StoreError> {
    let identity: Json<BrandIdentity> = row.try_get("identity")?;
    Ok(Brand {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        website: row.try_get("website")?,
        identity: identity.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn template_from_row(row: &PgRow) -> Result<Template, StoreError> {
    let layout: String = row.try_get("layout")?;
    let formats: Json<Vec<CreativeFormat>> = row.try_get("formats")?;
    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        layout: LayoutStyle::from_str(&layout)
            .map_err(|_| StoreError::Decode(format!("unknown layout '{layout}'")))?,
        formats: formats.0,
    })
}

fn creative_from_row(row: &PgRow) -> Result<Creative, StoreError> {
    let copy: Json<CreativeCopy> = row.try_get("copy")?;
    let assets: Json<CreativeAssets> = row.try_get("assets")?;
    let status: String = row.try_get("status")?;
    Ok(Creative {
        id: row.try_get("id")?,
        brand_id: row.try_get("brand_id")?,
        template_id: row.try_get("template_id")?,
        job_id: row.try_get("job_id")?,
        copy: copy.0,
        assets: assets.0,
        validation_score: row.try_get("validation_score")?,
        status: CreativeStatus::from_str(&status)
            .map_err(|_| StoreError::Decode(format!("unknown creative status '{status}'")))?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn insert_brand(pool: &PgPool, brand: &Brand) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO brands (id, name, website, identity, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(brand.id)
    .bind(&brand.name)
    .bind(&brand.website)
    .bind(Json(&brand.identity))
    .bind(brand.created_at)
    .bind(brand.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_brand(pool: &PgPool, id: Uuid) -> Result<Option<Brand>, StoreError> {
    let row = sqlx::query(
        "SELECT id, name, website, identity, created_at, updated_at FROM brands WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(brand_from_row).transpose()
}

pub async fn update_brand_identity(
    pool: &PgPool,
    id: Uuid,
    identity: &BrandIdentity,
) -> Result<bool, StoreError> {
    let done = sqlx::query("UPDATE brands SET identity = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(Json(identity))
        .execute(pool)
        .await?;

    Ok(done.rows_affected() == 1)
}

pub async fn insert_template(pool: &PgPool, template: &Template) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO templates (id, name, layout, formats) VALUES ($1, $2, $3, $4)")
        .bind(template.id)
        .bind(&template.name)
        .bind(template.layout.to_string())
        .bind(Json(&template.formats))
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn get_template(pool: &PgPool, id: Uuid) -> Result<Option<Template>, StoreError> {
    let row = sqlx::query("SELECT id, name, layout, formats FROM templates WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(template_from_row).transpose()
}

pub async fn list_templates(pool: &PgPool) -> Result<Vec<Template>, StoreError> {
    let rows = sqlx::query("SELECT id, name, layout, formats FROM templates ORDER BY name")
        .fetch_all(pool)
        .await?;

    rows.iter().map(template_from_row).collect()
}

/// Insert a creative; the foreign keys reject orphaned brand/template references.
pub async fn insert_creative(pool: &PgPool, creative: &Creative) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO creatives
            (id, brand_id, template_id, job_id, copy, assets, validation_score, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(creative.id)
    .bind(creative.brand_id)
    .bind(creative.template_id)
    .bind(creative.job_id)
    .bind(Json(&creative.copy))
    .bind(Json(&creative.assets))
    .bind(creative.validation_score)
    .bind(creative.status.to_string())
    .bind(creative.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_creative(pool: &PgPool, id: Uuid) -> Result<Option<Creative>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, brand_id, template_id, job_id, copy, assets, validation_score, status, created_at
        FROM creatives
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(creative_from_row).transpose()
}

pub async fn delete_creative(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
    let done = sqlx::query("DELETE FROM creatives WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(done.rows_affected() == 1)
}
