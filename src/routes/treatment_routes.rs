// src/routes/treatment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkResponse},
    pagination::{PageParams, Paginated, SortOrder},
    scheduling::resolve_duration,
    validation,
};

const TREATMENT_COLUMNS: &str =
    "id, clinic_id, name, description, duration_minutes, price_cents, is_active, created_at, updated_at";

const SORTS: &[(&str, &'static str)] = &[
    ("name", "name"),
    ("price_cents", "price_cents"),
    ("duration_minutes", "duration_minutes"),
    ("created_at", "created_at"),
];

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TreatmentRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub price_cents: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_treatments).post(create_treatment))
        .route(
            "/{treatment_id}",
            get(get_treatment).put(update_treatment).delete(delete_treatment),
        )
}

async fn load_treatment(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    treatment_id: Uuid,
) -> Result<TreatmentRow, ApiError> {
    sqlx::query_as::<_, TreatmentRow>(&format!(
        "SELECT {TREATMENT_COLUMNS} FROM treatments WHERE id = $1 AND clinic_id = $2"
    ))
    .bind(treatment_id)
    .bind(clinic_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Treatment"))
}

async fn ensure_name_free(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    name: &str,
    except: Option<Uuid>,
) -> Result<(), ApiError> {
    let taken: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM treatments
        WHERE clinic_id = $1 AND lower(name) = lower($2) AND ($3::uuid IS NULL OR id <> $3)
        LIMIT 1
        "#,
    )
    .bind(clinic_id)
    .bind(name)
    .bind(except)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?;

    if taken.is_some() {
        return Err(ApiError::Conflict(
            "TREATMENT_EXISTS",
            "Treatment with this name already exists".into(),
        ));
    }
    Ok(())
}

fn optional_price(value: Option<i64>) -> Result<Option<i64>, ApiError> {
    value.map(|p| validation::non_negative("price_cents", p)).transpose()
}

#[derive(Debug, Deserialize)]
pub struct CreateTreatmentRequest {
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: Option<i32>,
    pub price_cents: Option<i64>,
    pub is_active: Option<bool>,
}

pub async fn create_treatment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTreatmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<TreatmentRow>>), ApiError> {
    auth.require_admin()?;

    let name = validation::required_text("name", &req.name, 2, 100)?;
    let description = validation::optional_text("description", req.description.as_deref(), 500)?;
    let duration = resolve_duration(req.duration_minutes)?;
    let price = optional_price(req.price_cents)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    ensure_name_free(&mut conn, auth.clinic_id, &name, None).await?;

    let row: TreatmentRow = sqlx::query_as::<_, TreatmentRow>(&format!(
        r#"
        INSERT INTO treatments (clinic_id, name, description, duration_minutes, price_cents, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {TREATMENT_COLUMNS}
        "#
    ))
    .bind(auth.clinic_id)
    .bind(&name)
    .bind(description)
    .bind(duration)
    .bind(price)
    .bind(req.is_active.unwrap_or(true))
    .fetch_one(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

#[derive(Debug, Deserialize)]
pub struct ListTreatmentsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn push_treatment_filters(qb: &mut QueryBuilder<'_, Postgres>, clinic_id: Uuid, q: &ListTreatmentsQuery) {
    qb.push(" WHERE clinic_id = ").push_bind(clinic_id);
    if let Some(s) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let like = format!("%{s}%");
        qb.push(" AND (name ILIKE ")
            .push_bind(like.clone())
            .push(" OR description ILIKE ")
            .push_bind(like)
            .push(")");
    }
    if let Some(active) = q.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(min) = q.min_price {
        qb.push(" AND price_cents >= ").push_bind(min);
    }
    if let Some(max) = q.max_price {
        qb.push(" AND price_cents <= ").push_bind(max);
    }
}

pub async fn list_treatments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListTreatmentsQuery>,
) -> Result<Json<Paginated<TreatmentRow>>, ApiError> {
    auth.require_admin()?;

    let mut params = PageParams::new(q.page, q.limit, q.sort_by.as_deref(), q.sort_order.as_deref(), SORTS)?;
    if q.sort_order.is_none() {
        // names read best A-Z
        params.sort_order = SortOrder::Asc;
    }
    if let (Some(min), Some(max)) = (q.min_price, q.max_price) {
        if min > max {
            return Err(ApiError::validation("min_price must not exceed max_price"));
        }
    }

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM treatments");
    push_treatment_filters(&mut count, auth.clinic_id, &q);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {TREATMENT_COLUMNS} FROM treatments"));
    push_treatment_filters(&mut qb, auth.clinic_id, &q);
    params.push_tail(&mut qb);

    let rows: Vec<TreatmentRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(Paginated::new(rows, &params, total)))
}

pub async fn get_treatment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<ApiOk<TreatmentRow>>, ApiError> {
    auth.require_admin()?;
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let row = load_treatment(&mut conn, auth.clinic_id, treatment_id).await?;
    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTreatmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<i32>,
    pub price_cents: Option<i64>,
    pub is_active: Option<bool>,
}

pub async fn update_treatment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
    Json(req): Json<UpdateTreatmentRequest>,
) -> Result<Json<ApiOk<TreatmentRow>>, ApiError> {
    auth.require_admin()?;

    let name = req
        .name
        .as_deref()
        .map(|n| validation::required_text("name", n, 2, 100))
        .transpose()?;
    let description = validation::optional_text("description", req.description.as_deref(), 500)?;
    let duration = req.duration_minutes.map(|d| resolve_duration(Some(d))).transpose()?;
    let price = optional_price(req.price_cents)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let current = load_treatment(&mut conn, auth.clinic_id, treatment_id).await?;

    if let Some(n) = name.as_deref() {
        if !n.eq_ignore_ascii_case(&current.name) {
            ensure_name_free(&mut conn, auth.clinic_id, n, Some(treatment_id)).await?;
        }
    }

    let row: TreatmentRow = sqlx::query_as::<_, TreatmentRow>(&format!(
        r#"
        UPDATE treatments
        SET name = COALESCE($3, name),
            description = COALESCE($4, description),
            duration_minutes = COALESCE($5, duration_minutes),
            price_cents = COALESCE($6, price_cents),
            is_active = COALESCE($7, is_active),
            updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        RETURNING {TREATMENT_COLUMNS}
        "#
    ))
    .bind(treatment_id)
    .bind(auth.clinic_id)
    .bind(name)
    .bind(description)
    .bind(duration)
    .bind(price)
    .bind(req.is_active)
    .fetch_one(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_treatment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    load_treatment(&mut tx, auth.clinic_id, treatment_id).await?;

    let in_use: bool = sqlx::query_scalar(
        r#"SELECT EXISTS (SELECT 1 FROM appointment_treatments WHERE treatment_id = $1)"#,
    )
    .bind(treatment_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if in_use {
        return Err(ApiError::BadRequest(
            "TREATMENT_IN_USE",
            "Cannot delete treatment that is used in appointments".into(),
        ));
    }

    sqlx::query(r#"DELETE FROM treatments WHERE id = $1 AND clinic_id = $2"#)
        .bind(treatment_id)
        .bind(auth.clinic_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%treatment_id, "treatment deleted");

    Ok(Json(OkResponse::ok()))
}
