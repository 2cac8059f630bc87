// src/routes/inventory_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkResponse},
    pagination::{PageParams, Paginated},
    validation,
};

const INVENTORY_COLUMNS: &str = r#"
    id, clinic_id, item_name, category, brand, supplier, current_stock, minimum_stock,
    unit_cost_cents, expiry_date, notes, created_at, updated_at
"#;

const SORTS: &[(&str, &'static str)] = &[
    ("item_name", "item_name"),
    ("category", "category"),
    ("current_stock", "current_stock"),
    ("expiry_date", "expiry_date"),
    ("created_at", "created_at"),
];

/// Window used by the `expiring_soon` list filter.
const EXPIRING_SOON_DAYS: i32 = 30;
const MAX_EXPIRY_WINDOW_DAYS: i32 = 3650;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InventoryRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub item_name: String,
    pub category: String,
    pub brand: Option<String>,
    pub supplier: Option<String>,
    pub current_stock: i32,
    pub minimum_stock: i32,
    pub unit_cost_cents: Option<i64>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_items).post(create_item))
        .route("/low-stock", get(low_stock))
        .route("/expiring", get(expiring))
        .route("/categories", get(categories))
        .route(
            "/{item_id}",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route("/{item_id}/stock", patch(update_stock))
}

/* -------------------------
   Stock arithmetic
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockChangeKind {
    Add,
    Subtract,
    Set,
}

/// New on-hand count. Subtraction floors at zero.
pub fn apply_stock_change(current: i32, kind: StockChangeKind, quantity: i32) -> Result<i32, ApiError> {
    if quantity < 0 {
        return Err(ApiError::validation("quantity must be >= 0"));
    }
    match kind {
        StockChangeKind::Add => current
            .checked_add(quantity)
            .ok_or_else(|| ApiError::validation("quantity is too large")),
        StockChangeKind::Subtract => Ok(current.saturating_sub(quantity).max(0)),
        StockChangeKind::Set => Ok(quantity),
    }
}

/* -------------------------
   Helpers
--------------------------*/

async fn load_item(conn: &mut PgConnection, clinic_id: Uuid, item_id: Uuid) -> Result<InventoryRow, ApiError> {
    sqlx::query_as::<_, InventoryRow>(&format!(
        "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE id = $1 AND clinic_id = $2"
    ))
    .bind(item_id)
    .bind(clinic_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Inventory item"))
}

async fn ensure_item_name_free(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    item_name: &str,
    except: Option<Uuid>,
) -> Result<(), ApiError> {
    let taken: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM inventory
        WHERE clinic_id = $1 AND lower(item_name) = lower($2) AND ($3::uuid IS NULL OR id <> $3)
        LIMIT 1
        "#,
    )
    .bind(clinic_id)
    .bind(item_name)
    .bind(except)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?;

    if taken.is_some() {
        return Err(ApiError::Conflict(
            "ITEM_EXISTS",
            "Inventory item with this name already exists".into(),
        ));
    }
    Ok(())
}

fn stock_level(field: &str, value: i32) -> Result<i32, ApiError> {
    if value < 0 {
        return Err(ApiError::validation(format!("{field} must be >= 0")));
    }
    Ok(value)
}

/* ============================================================
   POST /inventory
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub item_name: String,
    pub category: String,
    pub brand: Option<String>,
    pub supplier: Option<String>,
    pub current_stock: i32,
    pub minimum_stock: i32,
    pub unit_cost_cents: Option<i64>,
    pub expiry_date: Option<String>,
    pub notes: Option<String>,
}

pub async fn create_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<ApiOk<InventoryRow>>), ApiError> {
    auth.require_admin()?;

    let item_name = validation::required_text("item_name", &req.item_name, 2, 100)?;
    let category = validation::required_text("category", &req.category, 2, 50)?;
    let brand = validation::optional_text("brand", req.brand.as_deref(), 50)?;
    let supplier = validation::optional_text("supplier", req.supplier.as_deref(), 100)?;
    let current_stock = stock_level("current_stock", req.current_stock)?;
    let minimum_stock = stock_level("minimum_stock", req.minimum_stock)?;
    let unit_cost = req
        .unit_cost_cents
        .map(|c| validation::non_negative("unit_cost_cents", c))
        .transpose()?;
    let expiry_date = validation::optional_date("expiry_date", req.expiry_date.as_deref())?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 500)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    ensure_item_name_free(&mut conn, auth.clinic_id, &item_name, None).await?;

    let row: InventoryRow = sqlx::query_as::<_, InventoryRow>(&format!(
        r#"
        INSERT INTO inventory (
            clinic_id, item_name, category, brand, supplier, current_stock, minimum_stock,
            unit_cost_cents, expiry_date, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {INVENTORY_COLUMNS}
        "#
    ))
    .bind(auth.clinic_id)
    .bind(&item_name)
    .bind(category)
    .bind(brand)
    .bind(supplier)
    .bind(current_stock)
    .bind(minimum_stock)
    .bind(unit_cost)
    .bind(expiry_date)
    .bind(notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

/* ============================================================
   GET /inventory
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub supplier: Option<String>,
    pub low_stock: Option<bool>,
    pub expiring_soon: Option<bool>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn push_item_filters(qb: &mut QueryBuilder<'_, Postgres>, clinic_id: Uuid, q: &ListItemsQuery) {
    qb.push(" WHERE clinic_id = ").push_bind(clinic_id);
    if let Some(s) = non_blank(&q.search) {
        qb.push(" AND item_name ILIKE ").push_bind(format!("%{s}%"));
    }
    if let Some(c) = non_blank(&q.category) {
        qb.push(" AND category = ").push_bind(c.to_string());
    }
    if let Some(b) = non_blank(&q.brand) {
        qb.push(" AND brand ILIKE ").push_bind(format!("%{b}%"));
    }
    if let Some(s) = non_blank(&q.supplier) {
        qb.push(" AND supplier ILIKE ").push_bind(format!("%{s}%"));
    }
    if q.low_stock == Some(true) {
        qb.push(" AND current_stock <= minimum_stock");
    }
    if q.expiring_soon == Some(true) {
        qb.push(" AND expiry_date IS NOT NULL AND expiry_date < current_date + ")
            .push_bind(EXPIRING_SOON_DAYS);
    }
}

pub async fn list_items(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListItemsQuery>,
) -> Result<Json<Paginated<InventoryRow>>, ApiError> {
    auth.require_admin()?;

    let params = PageParams::new(q.page, q.limit, q.sort_by.as_deref(), q.sort_order.as_deref(), SORTS)?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM inventory");
    push_item_filters(&mut count, auth.clinic_id, &q);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {INVENTORY_COLUMNS} FROM inventory"));
    push_item_filters(&mut qb, auth.clinic_id, &q);
    params.push_tail(&mut qb);

    let rows: Vec<InventoryRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(Paginated::new(rows, &params, total)))
}

pub async fn get_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ApiOk<InventoryRow>>, ApiError> {
    auth.require_admin()?;
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let row = load_item(&mut conn, auth.clinic_id, item_id).await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   PUT /inventory/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub item_name: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub supplier: Option<String>,
    pub current_stock: Option<i32>,
    pub minimum_stock: Option<i32>,
    pub unit_cost_cents: Option<i64>,
    pub expiry_date: Option<String>,
    pub notes: Option<String>,
}

pub async fn update_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<ApiOk<InventoryRow>>, ApiError> {
    auth.require_admin()?;

    let item_name = req
        .item_name
        .as_deref()
        .map(|n| validation::required_text("item_name", n, 2, 100))
        .transpose()?;
    let category = req
        .category
        .as_deref()
        .map(|c| validation::required_text("category", c, 2, 50))
        .transpose()?;
    let brand = validation::optional_text("brand", req.brand.as_deref(), 50)?;
    let supplier = validation::optional_text("supplier", req.supplier.as_deref(), 100)?;
    let current_stock = req.current_stock.map(|v| stock_level("current_stock", v)).transpose()?;
    let minimum_stock = req.minimum_stock.map(|v| stock_level("minimum_stock", v)).transpose()?;
    let unit_cost = req
        .unit_cost_cents
        .map(|c| validation::non_negative("unit_cost_cents", c))
        .transpose()?;
    let expiry_date = validation::optional_date("expiry_date", req.expiry_date.as_deref())?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 500)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let current = load_item(&mut conn, auth.clinic_id, item_id).await?;

    if let Some(n) = item_name.as_deref() {
        if !n.eq_ignore_ascii_case(&current.item_name) {
            ensure_item_name_free(&mut conn, auth.clinic_id, n, Some(item_id)).await?;
        }
    }

    let row: InventoryRow = sqlx::query_as::<_, InventoryRow>(&format!(
        r#"
        UPDATE inventory
        SET item_name = COALESCE($3, item_name),
            category = COALESCE($4, category),
            brand = COALESCE($5, brand),
            supplier = COALESCE($6, supplier),
            current_stock = COALESCE($7, current_stock),
            minimum_stock = COALESCE($8, minimum_stock),
            unit_cost_cents = COALESCE($9, unit_cost_cents),
            expiry_date = COALESCE($10, expiry_date),
            notes = COALESCE($11, notes),
            updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        RETURNING {INVENTORY_COLUMNS}
        "#
    ))
    .bind(item_id)
    .bind(auth.clinic_id)
    .bind(item_name)
    .bind(category)
    .bind(brand)
    .bind(supplier)
    .bind(current_stock)
    .bind(minimum_stock)
    .bind(unit_cost)
    .bind(expiry_date)
    .bind(notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   PATCH /inventory/{id}/stock
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct StockChangeRequest {
    #[serde(rename = "type")]
    pub kind: StockChangeKind,
    pub quantity: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockChange {
    #[serde(rename = "type")]
    pub kind: StockChangeKind,
    pub quantity: i32,
    pub previous_stock: i32,
    pub new_stock: i32,
}

#[derive(Debug, Serialize)]
pub struct StockChangeData {
    #[serde(flatten)]
    pub item: InventoryRow,
    pub stock_change: StockChange,
}

pub async fn update_stock(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
    Json(req): Json<StockChangeRequest>,
) -> Result<Json<ApiOk<StockChangeData>>, ApiError> {
    auth.require_admin()?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 500)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let previous: i32 = sqlx::query_scalar(
        r#"
        SELECT current_stock FROM inventory
        WHERE id = $1 AND clinic_id = $2
        FOR UPDATE
        "#,
    )
    .bind(item_id)
    .bind(auth.clinic_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Inventory item"))?;

    let new_stock = apply_stock_change(previous, req.kind, req.quantity)?;

    let item: InventoryRow = sqlx::query_as::<_, InventoryRow>(&format!(
        r#"
        UPDATE inventory
        SET current_stock = $3, updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        RETURNING {INVENTORY_COLUMNS}
        "#
    ))
    .bind(item_id)
    .bind(auth.clinic_id)
    .bind(new_stock)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        %item_id,
        kind = ?req.kind,
        previous,
        new_stock,
        notes = notes.as_deref().unwrap_or(""),
        "stock adjusted"
    );

    Ok(Json(ApiOk {
        data: StockChangeData {
            item,
            stock_change: StockChange {
                kind: req.kind,
                quantity: req.quantity,
                previous_stock: previous,
                new_stock,
            },
        },
    }))
}

pub async fn delete_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require_admin()?;

    let deleted = sqlx::query(r#"DELETE FROM inventory WHERE id = $1 AND clinic_id = $2"#)
        .bind(item_id)
        .bind(auth.clinic_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::not_found("Inventory item"));
    }

    Ok(Json(OkResponse::ok()))
}

/* ============================================================
   Reports
   ============================================================ */

pub async fn low_stock(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<InventoryRow>>>, ApiError> {
    auth.require_admin()?;

    let rows: Vec<InventoryRow> = sqlx::query_as::<_, InventoryRow>(&format!(
        r#"
        SELECT {INVENTORY_COLUMNS}
        FROM inventory
        WHERE clinic_id = $1 AND current_stock <= minimum_stock
        ORDER BY current_stock ASC, item_name ASC
        "#
    ))
    .bind(auth.clinic_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i32>,
}

pub async fn expiring(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ExpiringQuery>,
) -> Result<Json<ApiOk<Vec<InventoryRow>>>, ApiError> {
    auth.require_admin()?;

    let days = q.days.unwrap_or(EXPIRING_SOON_DAYS);
    if !(0..=MAX_EXPIRY_WINDOW_DAYS).contains(&days) {
        return Err(ApiError::validation(format!(
            "days must be between 0 and {MAX_EXPIRY_WINDOW_DAYS}"
        )));
    }

    let rows: Vec<InventoryRow> = sqlx::query_as::<_, InventoryRow>(&format!(
        r#"
        SELECT {INVENTORY_COLUMNS}
        FROM inventory
        WHERE clinic_id = $1
          AND expiry_date IS NOT NULL
          AND expiry_date <= current_date + $2::int
        ORDER BY expiry_date ASC
        "#
    ))
    .bind(auth.clinic_id)
    .bind(days)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn categories(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<String>>>, ApiError> {
    auth.require_admin()?;

    let rows: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT category
        FROM inventory
        WHERE clinic_id = $1
        ORDER BY category ASC
        "#,
    )
    .bind(auth.clinic_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_changes() {
        assert_eq!(apply_stock_change(10, StockChangeKind::Add, 5).unwrap(), 15);
        assert_eq!(apply_stock_change(10, StockChangeKind::Subtract, 4).unwrap(), 6);
        assert_eq!(apply_stock_change(10, StockChangeKind::Set, 3).unwrap(), 3);
    }

    #[test]
    fn subtract_floors_at_zero() {
        assert_eq!(apply_stock_change(3, StockChangeKind::Subtract, 10).unwrap(), 0);
        assert_eq!(apply_stock_change(0, StockChangeKind::Subtract, i32::MAX).unwrap(), 0);
    }

    #[test]
    fn bad_quantities_are_rejected() {
        assert_eq!(
            apply_stock_change(1, StockChangeKind::Set, -1).unwrap_err().code(),
            "VALIDATION_ERROR"
        );
        assert!(apply_stock_change(i32::MAX, StockChangeKind::Add, 1).is_err());
    }

    #[test]
    fn stock_request_uses_type_key() {
        let req: StockChangeRequest =
            serde_json::from_str(r#"{"type":"subtract","quantity":2}"#).unwrap();
        assert_eq!(req.kind, StockChangeKind::Subtract);
        assert!(serde_json::from_str::<StockChangeRequest>(r#"{"type":"double","quantity":2}"#).is_err());
    }
}
