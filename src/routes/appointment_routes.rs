// src/routes/appointment_routes.rs

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::lock_clinic,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkResponse},
    pagination::{PageParams, Paginated},
    routes::patient_routes::{allocate_patient_number, load_patient},
    scheduling::{
        AppointmentStatus, Candidate, DEFAULT_DURATION_MINUTES, ExistingAppointment, SchedulingError, check_conflict,
        conflict::{parse_date, parse_time},
        resolve_duration,
        status::ensure_deletable,
        validate_status,
    },
    validation,
};

/// Appointment columns plus the patient's display fields. Expects the
/// aliases `a` (appointments) and `p` (patients).
pub const APPOINTMENT_COLUMNS: &str = r#"
    a.id, a.clinic_id, a.patient_id, a.dentist_id, a.appointment_date, a.appointment_time,
    a.duration_minutes, a.status, a.notes, a.diagnosis, a.treatment_plan, a.created_at, a.updated_at,
    p.first_name AS patient_first_name, p.last_name AS patient_last_name, p.patient_number
"#;

const SORTS: &[(&str, &'static str)] = &[
    ("appointment_date", "a.appointment_date"),
    ("appointment_time", "a.appointment_time"),
    ("created_at", "a.created_at"),
    ("status", "a.status"),
];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: Option<i32>,
    pub status: String,
    pub notes: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub patient_number: String,
}

#[derive(Debug, Serialize)]
pub struct AttachedTreatment {
    pub treatment_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub price_cents: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: AppointmentRow,
    pub treatments: Vec<AttachedTreatment>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_appointments).post(create_appointment))
        .route("/mine", get(my_appointments))
        .route("/book", post(book_appointment))
        .route(
            "/{appointment_id}",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
        .route("/{appointment_id}/status", patch(update_status))
}

fn stored_status(s: &str) -> Result<AppointmentStatus, ApiError> {
    validate_status(s).map_err(|_| ApiError::Internal(format!("unexpected stored status {s:?}")))
}

fn internal_row(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("row decode error: {e}"))
}

/* ============================================================
   Conflict guard
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    clinic_id: Uuid,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    duration_minutes: Option<i32>,
    status: String,
}

async fn load_day(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<ExistingAppointment>, ApiError> {
    let rows: Vec<SlotRow> = sqlx::query_as::<_, SlotRow>(
        r#"
        SELECT id, clinic_id, appointment_date, appointment_time, duration_minutes, status
        FROM appointments
        WHERE clinic_id = $1
          AND appointment_date = $2
          AND status <> 'cancelled'
        ORDER BY appointment_time ASC
        "#,
    )
    .bind(clinic_id)
    .bind(date)
    .fetch_all(conn)
    .await
    .map_err(ApiError::db)?;

    rows.into_iter()
        .map(|r| {
            Ok(ExistingAppointment {
                id: r.id,
                clinic_id: r.clinic_id,
                date: r.appointment_date,
                time: r.appointment_time,
                duration_minutes: r.duration_minutes,
                status: stored_status(&r.status)?,
            })
        })
        .collect()
}

/// Takes the clinic lock, then checks the candidate against the clinic's
/// bookings on that date. Must run inside the transaction that writes.
///
/// Only the candidate's own date is loaded, so an overlap that crosses
/// midnight into a neighbouring day is not detected.
async fn ensure_slot_free(conn: &mut PgConnection, candidate: &Candidate) -> Result<(), ApiError> {
    lock_clinic(&mut *conn, candidate.clinic_id)
        .await
        .map_err(ApiError::db)?;

    let existing = load_day(conn, candidate.clinic_id, candidate.date).await?;

    check_conflict(candidate, &existing).into_result().map_err(|e| {
        if let SchedulingError::Conflict { appointment_id } = &e {
            tracing::info!(
                clinic_id = %candidate.clinic_id,
                date = %candidate.date,
                time = %candidate.time,
                conflicting = %appointment_id,
                "appointment slot rejected"
            );
        }
        ApiError::from(e)
    })
}

/* ============================================================
   Loading
   ============================================================ */

async fn load_row(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointments a
        JOIN patients p ON p.id = a.patient_id
        WHERE a.id = $1 AND a.clinic_id = $2
        "#
    ))
    .bind(appointment_id)
    .bind(clinic_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::from(SchedulingError::NotFound("Appointment")))
}

fn detail_query(filter: &str) -> String {
    format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS},
               t.id AS t_id, t.name AS t_name,
               apt.quantity AS apt_quantity, apt.price_cents AS apt_price_cents, apt.notes AS apt_notes
        FROM appointments a
        JOIN patients p ON p.id = a.patient_id
        LEFT JOIN appointment_treatments apt ON apt.appointment_id = a.id
        LEFT JOIN treatments t ON t.id = apt.treatment_id
        WHERE {filter}
        ORDER BY a.appointment_date, a.appointment_time, apt.created_at
        "#
    )
}

/// One output entry per appointment, in date/time order, with its
/// treatments gathered from the LEFT JOIN rows.
fn fold_rows_into_details(rows: Vec<PgRow>) -> Result<Vec<AppointmentDetail>, ApiError> {
    let mut map: BTreeMap<(NaiveDate, NaiveTime, Uuid), AppointmentDetail> = BTreeMap::new();

    for r in rows {
        let appointment = AppointmentRow::from_row(&r).map_err(internal_row)?;
        let key = (
            appointment.appointment_date,
            appointment.appointment_time,
            appointment.id,
        );
        let entry = map.entry(key).or_insert_with(|| AppointmentDetail {
            appointment,
            treatments: vec![],
        });

        let t_id: Option<Uuid> = r.try_get("t_id").map_err(internal_row)?;
        if let Some(treatment_id) = t_id {
            entry.treatments.push(AttachedTreatment {
                treatment_id,
                name: r.try_get("t_name").map_err(internal_row)?,
                quantity: r
                    .try_get::<Option<i32>, _>("apt_quantity")
                    .map_err(internal_row)?
                    .unwrap_or(1),
                price_cents: r.try_get("apt_price_cents").map_err(internal_row)?,
                notes: r.try_get("apt_notes").map_err(internal_row)?,
            });
        }
    }

    Ok(map.into_values().collect())
}

async fn load_detail(
    db: &PgPool,
    clinic_id: Uuid,
    appointment_id: Uuid,
) -> Result<AppointmentDetail, ApiError> {
    let rows = sqlx::query(&detail_query("a.id = $1 AND a.clinic_id = $2"))
        .bind(appointment_id)
        .bind(clinic_id)
        .fetch_all(db)
        .await
        .map_err(ApiError::db)?;

    fold_rows_into_details(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::from(SchedulingError::NotFound("Appointment")))
}

/* ============================================================
   Treatment attachments
   ============================================================ */

/// Best-effort: the appointment is already committed, so failures are only
/// logged.
async fn attach_treatments(db: &PgPool, clinic_id: Uuid, appointment_id: Uuid, treatment_ids: &[Uuid]) {
    for treatment_id in treatment_ids {
        let res = sqlx::query(
            r#"
            INSERT INTO appointment_treatments (appointment_id, treatment_id, quantity, price_cents)
            SELECT $1, t.id, 1, t.price_cents
            FROM treatments t
            WHERE t.id = $2 AND t.clinic_id = $3
            "#,
        )
        .bind(appointment_id)
        .bind(treatment_id)
        .bind(clinic_id)
        .execute(db)
        .await;

        match res {
            Ok(r) if r.rows_affected() == 0 => {
                tracing::warn!(%appointment_id, %treatment_id, "treatment not found in clinic, not attached");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%appointment_id, %treatment_id, error = %e, "failed to attach treatment");
            }
        }
    }
}

async fn replace_treatments(db: &PgPool, clinic_id: Uuid, appointment_id: Uuid, treatment_ids: &[Uuid]) {
    let cleared = sqlx::query(r#"DELETE FROM appointment_treatments WHERE appointment_id = $1"#)
        .bind(appointment_id)
        .execute(db)
        .await;

    if let Err(e) = cleared {
        tracing::warn!(%appointment_id, error = %e, "failed to clear appointment treatments");
        return;
    }

    attach_treatments(db, clinic_id, appointment_id, treatment_ids).await;
}

/* ============================================================
   POST /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub dentist_id: Option<Uuid>,
    pub appointment_date: String,
    pub appointment_time: String,
    pub duration_minutes: Option<i32>,
    pub notes: Option<String>,
    pub treatment_ids: Option<Vec<Uuid>>,
}

struct NewAppointment {
    patient_id: Uuid,
    dentist_id: Option<Uuid>,
    candidate: Candidate,
    notes: Option<String>,
}

/// Conflict check and insert, inside the caller's transaction.
async fn insert_checked(conn: &mut PgConnection, new: &NewAppointment) -> Result<Uuid, ApiError> {
    ensure_slot_free(&mut *conn, &new.candidate).await?;

    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO appointments (
            clinic_id, patient_id, dentist_id, appointment_date, appointment_time,
            duration_minutes, status, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(new.candidate.clinic_id)
    .bind(new.patient_id)
    .bind(new.dentist_id)
    .bind(new.candidate.date)
    .bind(new.candidate.time)
    .bind(new.candidate.duration_minutes)
    .bind(AppointmentStatus::Scheduled.as_str())
    .bind(&new.notes)
    .fetch_one(conn)
    .await
    .map_err(ApiError::db)
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentDetail>>), ApiError> {
    auth.require_admin()?;

    let candidate = Candidate::parse(
        auth.clinic_id,
        &req.appointment_date,
        &req.appointment_time,
        req.duration_minutes,
    )?;
    let new = NewAppointment {
        patient_id: req.patient_id,
        dentist_id: req.dentist_id,
        candidate,
        notes: validation::optional_text("notes", req.notes.as_deref(), 1000)?,
    };

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    load_patient(&mut tx, auth.clinic_id, new.patient_id).await?;
    let appointment_id = insert_checked(&mut tx, &new).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%appointment_id, patient_id = %new.patient_id, "appointment created");

    if let Some(ids) = req.treatment_ids.as_deref() {
        attach_treatments(&state.db, auth.clinic_id, appointment_id, ids).await;
    }

    let detail = load_detail(&state.db, auth.clinic_id, appointment_id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: detail })))
}

/* ============================================================
   GET /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListAppointmentsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Default)]
struct AppointmentFilters {
    status: Option<AppointmentStatus>,
    patient_id: Option<Uuid>,
    dentist_id: Option<Uuid>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    search: Option<String>,
}

impl ListAppointmentsQuery {
    fn filters(&self) -> Result<AppointmentFilters, ApiError> {
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(validate_status(s)?),
            None => None,
        };
        let date_from = validation::optional_date("date_from", self.date_from.as_deref())?;
        let date_to = validation::optional_date("date_to", self.date_to.as_deref())?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(ApiError::validation("date_from must not be after date_to"));
            }
        }
        Ok(AppointmentFilters {
            status,
            patient_id: self.patient_id,
            dentist_id: self.dentist_id,
            date_from,
            date_to,
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

fn push_appointment_filters(qb: &mut QueryBuilder<'_, Postgres>, clinic_id: Uuid, f: &AppointmentFilters) {
    qb.push(" WHERE a.clinic_id = ").push_bind(clinic_id);
    if let Some(s) = f.status {
        qb.push(" AND a.status = ").push_bind(s.as_str());
    }
    if let Some(id) = f.patient_id {
        qb.push(" AND a.patient_id = ").push_bind(id);
    }
    if let Some(id) = f.dentist_id {
        qb.push(" AND a.dentist_id = ").push_bind(id);
    }
    if let Some(d) = f.date_from {
        qb.push(" AND a.appointment_date >= ").push_bind(d);
    }
    if let Some(d) = f.date_to {
        qb.push(" AND a.appointment_date <= ").push_bind(d);
    }
    if let Some(s) = &f.search {
        let like = format!("%{s}%");
        qb.push(" AND (p.first_name ILIKE ")
            .push_bind(like.clone())
            .push(" OR p.last_name ILIKE ")
            .push_bind(like.clone())
            .push(" OR p.patient_number ILIKE ")
            .push_bind(like)
            .push(")");
    }
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListAppointmentsQuery>,
) -> Result<Json<Paginated<AppointmentRow>>, ApiError> {
    auth.require_admin()?;

    let params = PageParams::new(
        q.page,
        q.limit,
        q.sort_by.as_deref(),
        q.sort_order.as_deref(),
        SORTS,
    )?;
    let filters = q.filters()?;

    let mut count = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*) FROM appointments a JOIN patients p ON p.id = a.patient_id",
    );
    push_appointment_filters(&mut count, auth.clinic_id, &filters);
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments a JOIN patients p ON p.id = a.patient_id"
    ));
    push_appointment_filters(&mut qb, auth.clinic_id, &filters);
    params.push_tail(&mut qb);

    let rows: Vec<AppointmentRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(Paginated::new(rows, &params, total)))
}

/* ============================================================
   GET /appointments/{id} | /mine
   ============================================================ */

async fn own_patient_id(db: &PgPool, auth: &AuthContext) -> Result<Uuid, ApiError> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM patients
        WHERE user_id = $1 AND clinic_id = $2
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.clinic_id)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Patient record"))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    let owner = if auth.is_admin() {
        None
    } else {
        Some(own_patient_id(&state.db, &auth).await?)
    };

    let detail = load_detail(&state.db, auth.clinic_id, appointment_id).await?;

    // patients only see their own; report others as missing
    if let Some(patient_id) = owner {
        if detail.appointment.patient_id != patient_id {
            return Err(SchedulingError::NotFound("Appointment").into());
        }
    }

    Ok(Json(ApiOk { data: detail }))
}

pub async fn my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    let patient_id = own_patient_id(&state.db, &auth).await?;

    let rows = sqlx::query(&detail_query("a.patient_id = $1 AND a.clinic_id = $2"))
        .bind(patient_id)
        .bind(auth.clinic_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    // newest first
    let mut details = fold_rows_into_details(rows)?;
    details.reverse();

    Ok(Json(ApiOk { data: details }))
}

/* ============================================================
   PUT /appointments/{id}
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub duration_minutes: Option<i32>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub treatment_ids: Option<Vec<Uuid>>,
}

impl UpdateAppointmentRequest {
    fn touches_schedule(&self) -> bool {
        self.appointment_date.is_some() || self.appointment_time.is_some() || self.duration_minutes.is_some()
    }

    /// The merged slot to re-check, or `None` when the schedule is untouched.
    fn candidate(&self, current: &AppointmentRow) -> Result<Option<Candidate>, SchedulingError> {
        if !self.touches_schedule() {
            return Ok(None);
        }
        let date = match self.appointment_date.as_deref() {
            Some(d) => parse_date(d)?,
            None => current.appointment_date,
        };
        let time = match self.appointment_time.as_deref() {
            Some(t) => parse_time(t)?,
            None => current.appointment_time,
        };
        // Only a duration the caller sent is range-checked; a stored one is
        // taken as it is, with NULL counting as the default hour.
        let duration = match self.duration_minutes {
            Some(d) => resolve_duration(Some(d))?,
            None => current.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
        };

        Ok(Some(
            Candidate::new(current.clinic_id, date, time, duration).excluding(current.id),
        ))
    }
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    auth.require_admin()?;

    let status = req.status.as_deref().map(validate_status).transpose()?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 1000)?;
    let diagnosis = validation::optional_text("diagnosis", req.diagnosis.as_deref(), 2000)?;
    let treatment_plan = validation::optional_text("treatment_plan", req.treatment_plan.as_deref(), 2000)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = load_row(&mut tx, auth.clinic_id, appointment_id).await?;

    if let Some(patient_id) = req.patient_id {
        load_patient(&mut tx, auth.clinic_id, patient_id).await?;
    }

    // A status-only change (even cancelled back to scheduled) is not re-checked.
    let (date, time) = match req.candidate(&current)? {
        Some(candidate) => {
            ensure_slot_free(&mut tx, &candidate).await?;
            (candidate.date, candidate.time)
        }
        None => (current.appointment_date, current.appointment_time),
    };

    sqlx::query(
        r#"
        UPDATE appointments
        SET patient_id = COALESCE($3, patient_id),
            dentist_id = COALESCE($4, dentist_id),
            appointment_date = $5,
            appointment_time = $6,
            duration_minutes = COALESCE($7, duration_minutes),
            status = COALESCE($8, status),
            notes = COALESCE($9, notes),
            diagnosis = COALESCE($10, diagnosis),
            treatment_plan = COALESCE($11, treatment_plan),
            updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        "#,
    )
    .bind(appointment_id)
    .bind(auth.clinic_id)
    .bind(req.patient_id)
    .bind(req.dentist_id)
    .bind(date)
    .bind(time)
    .bind(req.duration_minutes)
    .bind(status.map(AppointmentStatus::as_str))
    .bind(notes)
    .bind(diagnosis)
    .bind(treatment_plan)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    if let Some(ids) = req.treatment_ids.as_deref() {
        replace_treatments(&state.db, auth.clinic_id, appointment_id, ids).await;
    }

    let detail = load_detail(&state.db, auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data: detail }))
}

/* ============================================================
   PATCH /appointments/{id}/status
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub notes: Option<String>,
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    auth.require_admin()?;

    let status = validate_status(&req.status)?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 1000)?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;

    // The slot is not re-checked here, reopening a cancelled booking included.
    let updated = sqlx::query(
        r#"
        UPDATE appointments
        SET status = $3,
            notes = COALESCE($4, notes),
            updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        "#,
    )
    .bind(appointment_id)
    .bind(auth.clinic_id)
    .bind(status.as_str())
    .bind(notes)
    .execute(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    if updated.rows_affected() == 0 {
        return Err(SchedulingError::NotFound("Appointment").into());
    }

    tracing::info!(%appointment_id, %status, "appointment status changed");

    let row = load_row(&mut conn, auth.clinic_id, appointment_id).await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   DELETE /appointments/{id}
   ============================================================ */

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = load_row(&mut tx, auth.clinic_id, appointment_id).await?;
    if let Err(e) = ensure_deletable(stored_status(&current.status)?) {
        tracing::info!(%appointment_id, "refused to delete completed appointment");
        return Err(e.into());
    }

    sqlx::query(r#"DELETE FROM appointment_treatments WHERE appointment_id = $1"#)
        .bind(appointment_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    sqlx::query(r#"DELETE FROM appointments WHERE id = $1 AND clinic_id = $2"#)
        .bind(appointment_id)
        .bind(auth.clinic_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%appointment_id, "appointment deleted");

    Ok(Json(OkResponse::ok()))
}

/* ============================================================
   POST /appointments/book (public)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BookAppointmentRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub appointment_date: String,
    pub appointment_time: String,
    pub duration_minutes: Option<i32>,
    pub service: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingConfirmation {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
}

fn booking_notes(service: &str, notes: Option<&str>) -> String {
    format!("Service: {service}\nNotes: {}", notes.unwrap_or("N/A"))
}

pub async fn book_appointment(
    State(state): State<AppState>,
    Json(req): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<BookingConfirmation>>), ApiError> {
    let first_name = validation::required_text("first_name", &req.first_name, 2, 50)?;
    let last_name = validation::required_text("last_name", &req.last_name, 2, 50)?;
    let email = validation::email("email", &req.email)?;
    let phone = validation::optional_phone("phone", req.phone.as_deref())?;
    let service = validation::required_text("service", &req.service, 1, 100)?;
    let notes = validation::optional_text("notes", req.notes.as_deref(), 1000)?;
    let date = parse_date(&req.appointment_date)?;
    let time = parse_time(&req.appointment_time)?;
    let duration = resolve_duration(req.duration_minutes)?;

    let clinic_id = state.default_clinic_id.ok_or_else(|| {
        ApiError::BadRequest("CLINIC_NOT_CONFIGURED", "Clinic configuration not found".into())
    })?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    lock_clinic(&mut *tx, clinic_id).await.map_err(ApiError::db)?;

    let existing: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM patients
        WHERE clinic_id = $1 AND email = $2
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .bind(clinic_id)
    .bind(&email)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let patient_id = match existing {
        Some(id) => id,
        None => {
            let patient_number = allocate_patient_number(&mut tx, clinic_id).await?;
            let id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO patients (clinic_id, patient_number, first_name, last_name, email, phone)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(clinic_id)
            .bind(&patient_number)
            .bind(&first_name)
            .bind(&last_name)
            .bind(&email)
            .bind(phone.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(ApiError::db)?;
            tracing::info!(patient_id = %id, %patient_number, "patient created from public booking");
            id
        }
    };

    let new = NewAppointment {
        patient_id,
        dentist_id: None,
        candidate: Candidate::new(clinic_id, date, time, duration),
        notes: Some(booking_notes(&service, notes.as_deref())),
    };
    let appointment_id = insert_checked(&mut tx, &new).await?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%appointment_id, %patient_id, "appointment booked");

    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: BookingConfirmation {
                appointment_id,
                patient_id,
                appointment_date: date,
                appointment_time: time,
                status: AppointmentStatus::Scheduled,
            },
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(duration: Option<i32>) -> AppointmentRow {
        AppointmentRow {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            dentist_id: None,
            appointment_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            appointment_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration_minutes: duration,
            status: "scheduled".into(),
            notes: None,
            diagnosis: None,
            treatment_plan: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            patient_first_name: "Ali".into(),
            patient_last_name: "Raza".into(),
            patient_number: "P000001".into(),
        }
    }

    #[test]
    fn untouched_schedule_skips_the_check() {
        let req = UpdateAppointmentRequest {
            status: Some("confirmed".into()),
            notes: Some("call first".into()),
            ..Default::default()
        };
        assert_eq!(req.candidate(&stored(Some(30))), Ok(None));
    }

    #[test]
    fn update_candidate_merges_and_excludes_self() {
        let current = stored(Some(30));
        let req = UpdateAppointmentRequest {
            appointment_time: Some("10:15".into()),
            ..Default::default()
        };
        let c = req.candidate(&current).unwrap().unwrap();
        assert_eq!(c.clinic_id, current.clinic_id);
        assert_eq!(c.date, current.appointment_date);
        assert_eq!(c.time, NaiveTime::from_hms_opt(10, 15, 0).unwrap());
        assert_eq!(c.duration_minutes, 30);
        assert_eq!(c.exclude_appointment_id, Some(current.id));
    }

    #[test]
    fn legacy_rows_fall_back_to_an_hour() {
        let req = UpdateAppointmentRequest {
            appointment_date: Some("2026-03-03".into()),
            ..Default::default()
        };
        let c = req.candidate(&stored(None)).unwrap().unwrap();
        assert_eq!(c.duration_minutes, 60);
    }

    #[test]
    fn stored_out_of_range_duration_does_not_block_a_date_change() {
        let req = UpdateAppointmentRequest {
            appointment_date: Some("2026-03-03".into()),
            ..Default::default()
        };
        let c = req.candidate(&stored(Some(600))).unwrap().unwrap();
        assert_eq!(c.duration_minutes, 600);
        assert_eq!(c.date, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    }

    #[test]
    fn bad_update_input_is_rejected_before_any_check() {
        let current = stored(Some(30));

        let req = UpdateAppointmentRequest {
            appointment_time: Some("25:00".into()),
            ..Default::default()
        };
        assert!(matches!(req.candidate(&current), Err(SchedulingError::InvalidInput(_))));

        let req = UpdateAppointmentRequest {
            duration_minutes: Some(5),
            ..Default::default()
        };
        assert!(matches!(req.candidate(&current), Err(SchedulingError::Validation(_))));
    }

    #[test]
    fn booking_notes_carry_the_service() {
        assert_eq!(booking_notes("Cleaning", None), "Service: Cleaning\nNotes: N/A");
        assert_eq!(
            booking_notes("Whitening", Some("mornings only")),
            "Service: Whitening\nNotes: mornings only"
        );
    }

    #[test]
    fn booking_confirmation_serializes_status_in_snake_case() {
        let c = BookingConfirmation {
            appointment_id: Uuid::nil(),
            patient_id: Uuid::nil(),
            appointment_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            appointment_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            status: AppointmentStatus::Scheduled,
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["status"], "scheduled");
        assert_eq!(v["appointment_date"], "2026-03-02");
        assert_eq!(v["appointment_time"], "09:30:00");
    }
}
