// src/routes/transaction_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::ApiError,
    ledger::{self, LedgerEntry, PaymentMethod, TransactionType},
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkResponse},
    pagination::{PageParams, Paginated},
    validation,
};

pub const TRANSACTION_COLUMNS: &str = r#"
    id, clinic_id, appointment_id, patient_id, transaction_type, payment_method, amount_cents,
    description, transaction_date, reference_number, notes, created_at, updated_at
"#;

const SORTS: &[(&str, &'static str)] = &[
    ("transaction_date", "transaction_date"),
    ("amount_cents", "amount_cents"),
    ("created_at", "created_at"),
];

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub transaction_type: String,
    pub payment_method: String,
    pub amount_cents: i64,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_transactions).post(create_transaction))
        .route("/summary", get(summary))
        .route("/reports/daily", get(daily_report))
        .route("/reports/monthly", get(monthly_report))
        .route(
            "/{transaction_id}",
            get(get_transaction)
                .put(update_transaction)
                .delete(delete_transaction),
        )
}

async fn load_transaction(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    transaction_id: Uuid,
) -> Result<TransactionRow, ApiError> {
    sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 AND clinic_id = $2"
    ))
    .bind(transaction_id)
    .bind(clinic_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Transaction"))
}

/// Linked patient/appointment must belong to the caller's clinic.
async fn verify_links(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    patient_id: Option<Uuid>,
    appointment_id: Option<Uuid>,
) -> Result<(), ApiError> {
    if let Some(id) = patient_id {
        let found: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1 AND clinic_id = $2)"#,
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(ApiError::db)?;
        if !found {
            return Err(ApiError::not_found("Patient"));
        }
    }
    if let Some(id) = appointment_id {
        let found: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM appointments WHERE id = $1 AND clinic_id = $2)"#,
        )
        .bind(id)
        .bind(clinic_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(ApiError::db)?;
        if !found {
            return Err(ApiError::not_found("Appointment"));
        }
    }
    Ok(())
}

/* ============================================================
   POST /transactions
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub transaction_type: String,
    pub payment_method: String,
    pub amount_cents: i64,
    pub description: String,
    pub transaction_date: Option<String>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

pub async fn create_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<ApiOk<TransactionRow>>), ApiError> {
    auth.require_admin()?;

    let kind = TransactionType::parse("transaction_type", &req.transaction_type)?;
    let method = PaymentMethod::parse("payment_method", &req.payment_method)?;
    let amount = validation::non_negative("amount_cents", req.amount_cents)?;
    let description = validation::required_text("description", &req.description, 1, 500)?;
    let date = validation::optional_date("transaction_date", req.transaction_date.as_deref())?
        .unwrap_or_else(|| Utc::now().date_naive());
    let reference = validation::optional_text("reference_number", req.reference_number.as_deref(), 100)?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 1000)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    verify_links(&mut conn, auth.clinic_id, req.patient_id, req.appointment_id).await?;

    let row: TransactionRow = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        INSERT INTO transactions (
            clinic_id, appointment_id, patient_id, transaction_type, payment_method,
            amount_cents, description, transaction_date, reference_number, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(auth.clinic_id)
    .bind(req.appointment_id)
    .bind(req.patient_id)
    .bind(kind.as_str())
    .bind(method.as_str())
    .bind(amount)
    .bind(description)
    .bind(date)
    .bind(reference)
    .bind(notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(transaction_id = %row.id, kind = kind.as_str(), amount_cents = amount, "transaction recorded");

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

/* ============================================================
   GET /transactions
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub transaction_type: Option<String>,
    pub payment_method: Option<String>,
    pub patient_id: Option<Uuid>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Default)]
struct TransactionFilters {
    kind: Option<TransactionType>,
    method: Option<PaymentMethod>,
    patient_id: Option<Uuid>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
}

fn date_range(from: Option<&str>, to: Option<&str>) -> Result<(Option<NaiveDate>, Option<NaiveDate>), ApiError> {
    let from = validation::optional_date("date_from", from)?;
    let to = validation::optional_date("date_to", to)?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(ApiError::validation("date_from must not be after date_to"));
        }
    }
    Ok((from, to))
}

fn push_transaction_filters(qb: &mut QueryBuilder<'_, Postgres>, clinic_id: Uuid, f: &TransactionFilters) {
    qb.push(" WHERE clinic_id = ").push_bind(clinic_id);
    if let Some(k) = f.kind {
        qb.push(" AND transaction_type = ").push_bind(k.as_str());
    }
    if let Some(m) = f.method {
        qb.push(" AND payment_method = ").push_bind(m.as_str());
    }
    if let Some(id) = f.patient_id {
        qb.push(" AND patient_id = ").push_bind(id);
    }
    if let Some(d) = f.date_from {
        qb.push(" AND transaction_date >= ").push_bind(d);
    }
    if let Some(d) = f.date_to {
        qb.push(" AND transaction_date <= ").push_bind(d);
    }
}

pub async fn list_transactions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListTransactionsQuery>,
) -> Result<Json<Paginated<TransactionRow>>, ApiError> {
    auth.require_admin()?;

    let params = PageParams::new(q.page, q.limit, q.sort_by.as_deref(), q.sort_order.as_deref(), SORTS)?;
    let (date_from, date_to) = date_range(q.date_from.as_deref(), q.date_to.as_deref())?;
    let filters = TransactionFilters {
        kind: q
            .transaction_type
            .as_deref()
            .map(|s| TransactionType::parse("transaction_type", s))
            .transpose()?,
        method: q
            .payment_method
            .as_deref()
            .map(|s| PaymentMethod::parse("payment_method", s))
            .transpose()?,
        patient_id: q.patient_id,
        date_from,
        date_to,
    };

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
    push_transaction_filters(&mut count, auth.clinic_id, &filters);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions"));
    push_transaction_filters(&mut qb, auth.clinic_id, &filters);
    params.push_tail(&mut qb);

    let rows: Vec<TransactionRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(Paginated::new(rows, &params, total)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<ApiOk<TransactionRow>>, ApiError> {
    auth.require_admin()?;
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let row = load_transaction(&mut conn, auth.clinic_id, transaction_id).await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   PUT /transactions/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateTransactionRequest {
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub transaction_type: Option<String>,
    pub payment_method: Option<String>,
    pub amount_cents: Option<i64>,
    pub description: Option<String>,
    pub transaction_date: Option<String>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

pub async fn update_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(transaction_id): Path<Uuid>,
    Json(req): Json<UpdateTransactionRequest>,
) -> Result<Json<ApiOk<TransactionRow>>, ApiError> {
    auth.require_admin()?;

    let kind = req
        .transaction_type
        .as_deref()
        .map(|s| TransactionType::parse("transaction_type", s))
        .transpose()?;
    let method = req
        .payment_method
        .as_deref()
        .map(|s| PaymentMethod::parse("payment_method", s))
        .transpose()?;
    let amount = req
        .amount_cents
        .map(|a| validation::non_negative("amount_cents", a))
        .transpose()?;
    let description = req
        .description
        .as_deref()
        .map(|d| validation::required_text("description", d, 1, 500))
        .transpose()?;
    let date = validation::optional_date("transaction_date", req.transaction_date.as_deref())?;
    let reference = validation::optional_text("reference_number", req.reference_number.as_deref(), 100)?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 1000)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    load_transaction(&mut conn, auth.clinic_id, transaction_id).await?;
    verify_links(&mut conn, auth.clinic_id, req.patient_id, req.appointment_id).await?;

    let row: TransactionRow = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        UPDATE transactions
        SET appointment_id = COALESCE($3, appointment_id),
            patient_id = COALESCE($4, patient_id),
            transaction_type = COALESCE($5, transaction_type),
            payment_method = COALESCE($6, payment_method),
            amount_cents = COALESCE($7, amount_cents),
            description = COALESCE($8, description),
            transaction_date = COALESCE($9, transaction_date),
            reference_number = COALESCE($10, reference_number),
            notes = COALESCE($11, notes),
            updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(transaction_id)
    .bind(auth.clinic_id)
    .bind(req.appointment_id)
    .bind(req.patient_id)
    .bind(kind.map(TransactionType::as_str))
    .bind(method.map(PaymentMethod::as_str))
    .bind(amount)
    .bind(description)
    .bind(date)
    .bind(reference)
    .bind(notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require_admin()?;

    let deleted = sqlx::query(r#"DELETE FROM transactions WHERE id = $1 AND clinic_id = $2"#)
        .bind(transaction_id)
        .bind(auth.clinic_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::not_found("Transaction"));
    }

    tracing::info!(%transaction_id, "transaction deleted");

    Ok(Json(OkResponse::ok()))
}

/* ============================================================
   Summary and reports
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    transaction_type: String,
    payment_method: String,
    amount_cents: i64,
    transaction_date: NaiveDate,
    created_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_entry(self) -> Result<LedgerEntry, ApiError> {
        let stored = |e: ApiError| ApiError::Internal(format!("unexpected stored transaction: {e:?}"));
        Ok(LedgerEntry {
            kind: TransactionType::parse("transaction_type", &self.transaction_type).map_err(stored)?,
            method: PaymentMethod::parse("payment_method", &self.payment_method).map_err(stored)?,
            amount_cents: self.amount_cents,
            transaction_date: self.transaction_date,
            created_at: self.created_at,
        })
    }
}

async fn load_ledger(
    db: &PgPool,
    clinic_id: Uuid,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<LedgerEntry>, ApiError> {
    let rows: Vec<LedgerRow> = sqlx::query_as::<_, LedgerRow>(
        r#"
        SELECT transaction_type, payment_method, amount_cents, transaction_date, created_at
        FROM transactions
        WHERE clinic_id = $1
          AND ($2::date IS NULL OR transaction_date >= $2)
          AND ($3::date IS NULL OR transaction_date <= $3)
        ORDER BY transaction_date ASC, created_at ASC
        "#,
    )
    .bind(clinic_id)
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await
    .map_err(ApiError::db)?;

    rows.into_iter().map(LedgerRow::into_entry).collect()
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

pub async fn summary(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<ApiOk<ledger::Summary>>, ApiError> {
    auth.require_admin()?;
    let (from, to) = date_range(q.date_from.as_deref(), q.date_to.as_deref())?;
    let entries = load_ledger(&state.db, auth.clinic_id, from, to).await?;
    Ok(Json(ApiOk {
        data: ledger::summarize(&entries),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: Option<String>,
}

pub async fn daily_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<DailyQuery>,
) -> Result<Json<ApiOk<ledger::DailyReport>>, ApiError> {
    auth.require_admin()?;
    let date = validation::optional_date("date", q.date.as_deref())?.unwrap_or_else(|| Utc::now().date_naive());
    let entries = load_ledger(&state.db, auth.clinic_id, Some(date), Some(date)).await?;
    Ok(Json(ApiOk {
        data: ledger::daily_report(date, &entries),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

pub async fn monthly_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<MonthlyQuery>,
) -> Result<Json<ApiOk<ledger::MonthlyReport>>, ApiError> {
    auth.require_admin()?;
    let today = Utc::now().date_naive();
    let year = q.year.unwrap_or(today.year());
    let month = q.month.unwrap_or(today.month());
    let (first, last) = ledger::month_bounds(year, month)?;

    let entries = load_ledger(&state.db, auth.clinic_id, Some(first), Some(last)).await?;
    Ok(Json(ApiOk {
        data: ledger::monthly_report(year, month, &entries)?,
    }))
}
