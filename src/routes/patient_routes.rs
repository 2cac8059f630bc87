// src/routes/patient_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::Deserializer};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::lock_clinic,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkResponse},
    pagination::{PageParams, Paginated},
    routes::{
        appointment_routes::{APPOINTMENT_COLUMNS, AppointmentRow},
        transaction_routes::{TRANSACTION_COLUMNS, TransactionRow},
    },
    scheduling::next_patient_number,
    validation::{self, GENDERS},
};

const PATIENT_COLUMNS: &str = r#"
    id, clinic_id, user_id, patient_number, first_name, last_name, date_of_birth, gender,
    phone, email, address, emergency_contact_name, emergency_contact_phone,
    medical_history, allergies, insurance_provider, insurance_number, created_at, updated_at
"#;

const SORTS: &[(&str, &'static str)] = &[
    ("created_at", "created_at"),
    ("first_name", "first_name"),
    ("last_name", "last_name"),
    ("patient_number", "patient_number"),
    ("date_of_birth", "date_of_birth"),
];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub user_id: Option<Uuid>,
    pub patient_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_patients).post(create_patient))
        .route(
            "/{patient_id}",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
        .route("/{patient_id}/appointments", get(list_patient_appointments))
        .route("/{patient_id}/transactions", get(list_patient_transactions))
}

/// Next free number for the clinic. Takes the clinic lock so the read and the
/// caller's insert happen under one serialized transaction.
pub(crate) async fn allocate_patient_number(
    conn: &mut PgConnection,
    clinic_id: Uuid,
) -> Result<String, ApiError> {
    lock_clinic(&mut *conn, clinic_id).await.map_err(ApiError::db)?;

    let last: Option<String> = sqlx::query_scalar(
        r#"
        SELECT patient_number
        FROM patients
        WHERE clinic_id = $1
        ORDER BY created_at DESC, patient_number DESC
        LIMIT 1
        "#,
    )
    .bind(clinic_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok(next_patient_number(last.as_deref()))
}

pub(crate) async fn load_patient(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    patient_id: Uuid,
) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1 AND clinic_id = $2"
    ))
    .bind(patient_id)
    .bind(clinic_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Patient"))
}

async fn ensure_email_free(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    email: &str,
    except: Option<Uuid>,
) -> Result<(), ApiError> {
    let taken: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM patients
        WHERE clinic_id = $1 AND email = $2 AND ($3::uuid IS NULL OR id <> $3)
        LIMIT 1
        "#,
    )
    .bind(clinic_id)
    .bind(email)
    .bind(except)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?;

    match taken {
        Some(_) => Err(ApiError::Conflict(
            "PATIENT_EXISTS",
            "Patient already exists with this email".into(),
        )),
        None => Ok(()),
    }
}

/* ============================================================
   POST /patients
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
}

/// Validated column values shared by create and update.
#[derive(Debug, Clone, PartialEq)]
struct PatientFields {
    first_name: String,
    last_name: String,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    medical_history: Option<String>,
    allergies: Option<String>,
    insurance_provider: Option<String>,
    insurance_number: Option<String>,
}

fn optional_gender(value: Option<&str>) -> Result<Option<String>, ApiError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(g) => Ok(Some(validation::one_of("gender", g, GENDERS)?.to_string())),
        None => Ok(None),
    }
}

fn optional_birth_date(value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    let dob = validation::optional_date("date_of_birth", value)?;
    if let Some(d) = dob {
        if d > Utc::now().date_naive() {
            return Err(ApiError::validation("date_of_birth cannot be in the future"));
        }
    }
    Ok(dob)
}

impl CreatePatientRequest {
    fn validate(&self) -> Result<PatientFields, ApiError> {
        Ok(PatientFields {
            first_name: validation::required_text("first_name", &self.first_name, 2, 50)?,
            last_name: validation::required_text("last_name", &self.last_name, 2, 50)?,
            date_of_birth: optional_birth_date(self.date_of_birth.as_deref())?,
            gender: optional_gender(self.gender.as_deref())?,
            phone: validation::optional_phone("phone", self.phone.as_deref())?,
            email: validation::optional_email("email", self.email.as_deref())?,
            address: validation::optional_text("address", self.address.as_deref(), 500)?,
            emergency_contact_name: validation::optional_text(
                "emergency_contact_name",
                self.emergency_contact_name.as_deref(),
                100,
            )?,
            emergency_contact_phone: validation::optional_phone(
                "emergency_contact_phone",
                self.emergency_contact_phone.as_deref(),
            )?,
            medical_history: validation::optional_text(
                "medical_history",
                self.medical_history.as_deref(),
                5000,
            )?,
            allergies: validation::optional_text("allergies", self.allergies.as_deref(), 1000)?,
            insurance_provider: validation::optional_text(
                "insurance_provider",
                self.insurance_provider.as_deref(),
                100,
            )?,
            insurance_number: validation::optional_text(
                "insurance_number",
                self.insurance_number.as_deref(),
                50,
            )?,
        })
    }
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<PatientRow>>), ApiError> {
    auth.require_admin()?;
    let f = req.validate()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    if let Some(email) = f.email.as_deref() {
        ensure_email_free(&mut tx, auth.clinic_id, email, None).await?;
    }

    let patient_number = allocate_patient_number(&mut tx, auth.clinic_id).await?;

    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        INSERT INTO patients (
            clinic_id, patient_number, first_name, last_name, date_of_birth, gender,
            phone, email, address, emergency_contact_name, emergency_contact_phone,
            medical_history, allergies, insurance_provider, insurance_number
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(auth.clinic_id)
    .bind(&patient_number)
    .bind(&f.first_name)
    .bind(&f.last_name)
    .bind(f.date_of_birth)
    .bind(&f.gender)
    .bind(&f.phone)
    .bind(&f.email)
    .bind(&f.address)
    .bind(&f.emergency_contact_name)
    .bind(&f.emergency_contact_phone)
    .bind(&f.medical_history)
    .bind(&f.allergies)
    .bind(&f.insurance_provider)
    .bind(&f.insurance_number)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(patient_id = %row.id, patient_number = %row.patient_number, "patient created");

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

/* ============================================================
   GET /patients
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListPatientsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub gender: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn push_patient_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    clinic_id: Uuid,
    search: Option<&str>,
    gender: Option<&str>,
) {
    qb.push(" WHERE clinic_id = ").push_bind(clinic_id);
    if let Some(s) = search {
        let like = format!("%{s}%");
        qb.push(" AND (first_name ILIKE ")
            .push_bind(like.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(like.clone())
            .push(" OR email ILIKE ")
            .push_bind(like.clone())
            .push(" OR patient_number ILIKE ")
            .push_bind(like)
            .push(")");
    }
    if let Some(g) = gender {
        qb.push(" AND gender = ").push_bind(g.to_string());
    }
}

pub async fn list_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListPatientsQuery>,
) -> Result<Json<Paginated<PatientRow>>, ApiError> {
    auth.require_admin()?;

    let params = PageParams::new(
        q.page,
        q.limit,
        q.sort_by.as_deref(),
        q.sort_order.as_deref(),
        SORTS,
    )?;
    let search = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let gender = optional_gender(q.gender.as_deref())?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM patients");
    push_patient_filters(&mut count, auth.clinic_id, search, gender.as_deref());
    let total: i64 = count
        .build_query_scalar()
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PATIENT_COLUMNS} FROM patients"));
    push_patient_filters(&mut qb, auth.clinic_id, search, gender.as_deref());
    params.push_tail(&mut qb);

    let rows: Vec<PatientRow> = qb
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(Paginated::new(rows, &params, total)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require_admin()?;
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let row = load_patient(&mut conn, auth.clinic_id, patient_id).await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   PUT /patients/{id}
   ============================================================ */

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // only called when the field is present: null => Some(None)
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/// Absent fields are left alone; `null` clears an optional column.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub date_of_birth: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub gender: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub emergency_contact_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub emergency_contact_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub medical_history: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub allergies: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub insurance_provider: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub insurance_number: Option<Option<String>>,
}

fn merge<T>(current: Option<T>, patch: Option<Option<T>>) -> Option<T> {
    match patch {
        Some(v) => v,
        None => current,
    }
}

impl UpdatePatientRequest {
    /// Overlay the patch on the stored row and validate the result as a whole.
    fn merge_into(self, row: &PatientRow) -> Result<PatientFields, ApiError> {
        let dob = match self.date_of_birth {
            Some(v) => optional_birth_date(v.as_deref())?,
            None => row.date_of_birth,
        };
        let merged = CreatePatientRequest {
            first_name: self.first_name.unwrap_or_else(|| row.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| row.last_name.clone()),
            date_of_birth: None,
            gender: merge(row.gender.clone(), self.gender),
            phone: merge(row.phone.clone(), self.phone),
            email: merge(row.email.clone(), self.email),
            address: merge(row.address.clone(), self.address),
            emergency_contact_name: merge(row.emergency_contact_name.clone(), self.emergency_contact_name),
            emergency_contact_phone: merge(row.emergency_contact_phone.clone(), self.emergency_contact_phone),
            medical_history: merge(row.medical_history.clone(), self.medical_history),
            allergies: merge(row.allergies.clone(), self.allergies),
            insurance_provider: merge(row.insurance_provider.clone(), self.insurance_provider),
            insurance_number: merge(row.insurance_number.clone(), self.insurance_number),
        };
        let mut fields = merged.validate()?;
        fields.date_of_birth = dob;
        Ok(fields)
    }
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current = load_patient(&mut tx, auth.clinic_id, patient_id).await?;
    let f = req.merge_into(&current)?;

    if let Some(email) = f.email.as_deref() {
        if current.email.as_deref() != Some(email) {
            ensure_email_free(&mut tx, auth.clinic_id, email, Some(patient_id)).await?;
        }
    }

    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patients
        SET first_name = $3,
            last_name = $4,
            date_of_birth = $5,
            gender = $6,
            phone = $7,
            email = $8,
            address = $9,
            emergency_contact_name = $10,
            emergency_contact_phone = $11,
            medical_history = $12,
            allergies = $13,
            insurance_provider = $14,
            insurance_number = $15,
            updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(auth.clinic_id)
    .bind(&f.first_name)
    .bind(&f.last_name)
    .bind(f.date_of_birth)
    .bind(&f.gender)
    .bind(&f.phone)
    .bind(&f.email)
    .bind(&f.address)
    .bind(&f.emergency_contact_name)
    .bind(&f.emergency_contact_phone)
    .bind(&f.medical_history)
    .bind(&f.allergies)
    .bind(&f.insurance_provider)
    .bind(&f.insurance_number)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    load_patient(&mut tx, auth.clinic_id, patient_id).await?;

    let booked: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM appointments WHERE patient_id = $1"#)
        .bind(patient_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    if booked > 0 {
        return Err(ApiError::BadRequest(
            "PATIENT_HAS_APPOINTMENTS",
            "Cannot delete patient with existing appointments".into(),
        ));
    }

    sqlx::query(r#"DELETE FROM patients WHERE id = $1 AND clinic_id = $2"#)
        .bind(patient_id)
        .bind(auth.clinic_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%patient_id, "patient deleted");

    Ok(Json(OkResponse::ok()))
}

/* ============================================================
   GET /patients/{id}/appointments | /transactions
   ============================================================ */

pub async fn list_patient_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    auth.require_admin()?;
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    load_patient(&mut conn, auth.clinic_id, patient_id).await?;

    let rows: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointments a
        JOIN patients p ON p.id = a.patient_id
        WHERE a.clinic_id = $1 AND a.patient_id = $2
        ORDER BY a.appointment_date DESC, a.appointment_time DESC
        "#
    ))
    .bind(auth.clinic_id)
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn list_patient_transactions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<TransactionRow>>>, ApiError> {
    auth.require_admin()?;
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    load_patient(&mut conn, auth.clinic_id, patient_id).await?;

    let rows: Vec<TransactionRow> = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE clinic_id = $1 AND patient_id = $2
        ORDER BY transaction_date DESC, created_at DESC
        "#
    ))
    .bind(auth.clinic_id)
    .bind(patient_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> PatientRow {
        PatientRow {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            user_id: None,
            patient_number: "P000007".into(),
            first_name: "Sara".into(),
            last_name: "Khan".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1991, 3, 4),
            gender: Some("female".into()),
            phone: Some("+923001234567".into()),
            email: Some("sara@example.com".into()),
            address: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            medical_history: Some("none".into()),
            allergies: None,
            insurance_provider: None,
            insurance_number: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn absent_fields_keep_null_clears() {
        let req: UpdatePatientRequest =
            serde_json::from_str(r#"{"last_name":"Ahmed","phone":null}"#).unwrap();
        let f = req.merge_into(&stored()).unwrap();
        assert_eq!(f.first_name, "Sara");
        assert_eq!(f.last_name, "Ahmed");
        assert_eq!(f.phone, None);
        assert_eq!(f.email.as_deref(), Some("sara@example.com"));
        assert_eq!(f.date_of_birth, NaiveDate::from_ymd_opt(1991, 3, 4));
        assert_eq!(f.medical_history.as_deref(), Some("none"));
    }

    #[test]
    fn merged_values_are_validated() {
        let req: UpdatePatientRequest = serde_json::from_str(r#"{"gender":"unknown"}"#).unwrap();
        assert_eq!(req.merge_into(&stored()).unwrap_err().code(), "VALIDATION_ERROR");

        let req: UpdatePatientRequest = serde_json::from_str(r#"{"email":"not-an-email"}"#).unwrap();
        assert!(req.merge_into(&stored()).is_err());

        let req: UpdatePatientRequest = serde_json::from_str(r#"{"date_of_birth":"2999-01-01"}"#).unwrap();
        assert!(req.merge_into(&stored()).is_err());
    }

    #[test]
    fn create_requires_names() {
        let req: CreatePatientRequest =
            serde_json::from_str(r#"{"first_name":"A","last_name":"Khan"}"#).unwrap();
        assert!(req.validate().is_err());

        let req: CreatePatientRequest = serde_json::from_str(
            r#"{"first_name":"Ali","last_name":"Khan","email":"ALI@Example.com","gender":"male"}"#,
        )
        .unwrap();
        let f = req.validate().unwrap();
        assert_eq!(f.email.as_deref(), Some("ali@example.com"));
        assert_eq!(f.gender.as_deref(), Some("male"));
    }
}
