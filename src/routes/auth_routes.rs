// src/routes/auth_routes.rs

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, validate_new_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::patient_routes::allocate_patient_number,
    validation,
};

const REMEMBER_ME_TTL_HOURS: i64 = 24 * 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).put(update_profile))
        .route("/change_password", post(change_password))
}

pub(crate) async fn load_clinic_profile(
    conn: &mut PgConnection,
    clinic_id: Uuid,
) -> Result<ClinicProfile, ApiError> {
    sqlx::query_as::<_, ClinicProfile>(
        r#"
        SELECT clinic_id, clinic_name, phone, address
        FROM clinic
        WHERE clinic_id = $1
        "#,
    )
    .bind(clinic_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Clinic"))
}

async fn issue_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    device_name: Option<&str>,
    ttl_hours: i64,
) -> Result<(String, SessionTokenRow), ApiError> {
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user_id)
    .bind(&token_hash)
    .bind(device_name)
    .bind(expires_at)
    .fetch_one(conn)
    .await
    .map_err(ApiError::db)?;

    Ok((access_token, session))
}

/* ============================================================
   POST /auth/signup
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub clinic_name: Option<String>,
    pub device_name: Option<String>,
}

/// Admins open a new clinic; patients join the configured one.
enum SignupClinic {
    Create(String),
    Join(Uuid),
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let email = validation::email("email", &req.email)?;
    validate_new_password("password", &req.password)?;
    let first_name = validation::required_text("first_name", &req.first_name, 2, 50)?;
    let last_name = validation::required_text("last_name", &req.last_name, 2, 50)?;
    let phone = validation::optional_phone("phone", req.phone.as_deref())?;
    let role = req.role.unwrap_or(Role::Patient);

    let target = match role {
        Role::Admin => SignupClinic::Create(validation::required_text(
            "clinic_name",
            req.clinic_name.as_deref().unwrap_or_default(),
            2,
            100,
        )?),
        Role::Patient => SignupClinic::Join(state.default_clinic_id.ok_or_else(|| {
            ApiError::BadRequest("CLINIC_NOT_CONFIGURED", "Clinic configuration not found".into())
        })?),
    };

    let password_hash = hash_password(&req.password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let taken: Option<Uuid> = sqlx::query_scalar(r#"SELECT user_id FROM dcms_user WHERE email = $1"#)
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    if taken.is_some() {
        return Err(ApiError::Conflict("USER_EXISTS", "User already exists with this email".into()));
    }

    let clinic_id = match target {
        SignupClinic::Create(name) => sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO clinic (clinic_name)
            VALUES ($1)
            RETURNING clinic_id
            "#,
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?,
        SignupClinic::Join(id) => id,
    };

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO dcms_user (clinic_id, email, display_name, phone, password_hash, roles)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING user_id, clinic_id, email, display_name, phone, password_hash, roles, is_active
        "#,
    )
    .bind(clinic_id)
    .bind(&email)
    .bind(format!("{first_name} {last_name}"))
    .bind(phone.as_deref())
    .bind(password_hash)
    .bind(role.to_db())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
            ApiError::BadRequest("CLINIC_NOT_CONFIGURED", "Clinic configuration not found".into())
        }
        e => ApiError::db(e),
    })?;

    if role == Role::Patient {
        // Link a staff-created record with the same email, otherwise create one.
        let linked = sqlx::query(
            r#"
            UPDATE patients
            SET user_id = $1, updated_at = now()
            WHERE id = (
                SELECT id FROM patients
                WHERE clinic_id = $2 AND email = $3 AND user_id IS NULL
                ORDER BY created_at ASC
                LIMIT 1
            )
            "#,
        )
        .bind(user.user_id)
        .bind(clinic_id)
        .bind(&email)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

        if linked.rows_affected() == 0 {
            let patient_number = allocate_patient_number(&mut tx, clinic_id).await?;
            sqlx::query(
                r#"
                INSERT INTO patients (clinic_id, user_id, patient_number, first_name, last_name, email, phone)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(clinic_id)
            .bind(user.user_id)
            .bind(&patient_number)
            .bind(&first_name)
            .bind(&last_name)
            .bind(&email)
            .bind(phone.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db)?;
        }
    }

    let clinic = load_clinic_profile(&mut tx, clinic_id).await?;
    let (access_token, session) =
        issue_session(&mut tx, user.user_id, req.device_name.as_deref(), state.session_ttl_hours).await?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, role = role.as_str(), "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            data: LoginResponseData {
                access_token,
                expires_at: session.expires_at,
                user: user.profile(),
                clinic,
            },
        }),
    ))
}

/* ============================================================
   POST /auth/login
   ============================================================ */

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = req.email.trim().to_ascii_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, clinic_id, email, display_name, phone, password_hash, roles, is_active
        FROM dcms_user
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&mut *conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let clinic = load_clinic_profile(&mut conn, user.clinic_id).await?;

    let ttl_hours = if req.remember_me.unwrap_or(false) {
        REMEMBER_ME_TTL_HOURS
    } else {
        state.session_ttl_hours
    };
    let (access_token, session) =
        issue_session(&mut conn, user.user_id, req.device_name.as_deref(), ttl_hours).await?;

    Ok(Json(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            user: user.profile(),
            clinic,
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkResponse::ok()))
}

/* ============================================================
   GET/PUT /auth/profile
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ProfileData {
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

async fn load_user(conn: &mut PgConnection, user_id: Uuid) -> Result<UserRow, ApiError> {
    sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, clinic_id, email, display_name, phone, password_hash, roles, is_active
        FROM dcms_user
        WHERE user_id = $1 AND is_active = true
        "#,
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)
}

pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ProfileData>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let user = load_user(&mut conn, auth.user_id).await?;
    let clinic = load_clinic_profile(&mut conn, auth.clinic_id).await?;

    Ok(Json(ApiOk {
        data: ProfileData {
            user: user.profile(),
            clinic,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiOk<ProfileData>>, ApiError> {
    let display_name = req
        .display_name
        .as_deref()
        .map(|s| validation::required_text("display_name", s, 2, 100))
        .transpose()?;
    let phone = validation::optional_phone("phone", req.phone.as_deref())?;

    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE dcms_user
        SET display_name = COALESCE($2, display_name),
            phone = COALESCE($3, phone),
            updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .bind(display_name)
    .bind(phone)
    .execute(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    let user = load_user(&mut conn, auth.user_id).await?;
    let clinic = load_clinic_profile(&mut conn, auth.clinic_id).await?;

    Ok(Json(ApiOk {
        data: ProfileData {
            user: user.profile(),
            clinic,
        },
    }))
}

/* ============================================================
   POST /auth/change_password
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    if req.current_password.is_empty() {
        return Err(ApiError::validation("current_password is required"));
    }
    validate_new_password("new_password", &req.new_password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user = load_user(&mut tx, auth.user_id).await?;
    if !verify_password(&req.current_password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password)?;

    sqlx::query(
        r#"
        UPDATE dcms_user
        SET password_hash = $1, updated_at = now()
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    // keep the current session, drop the rest
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(OkResponse::ok()))
}
