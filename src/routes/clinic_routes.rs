// src/routes/clinic_routes.rs

use axum::{Json, Router, extract::State, routing::get};
use serde::Deserialize;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, ClinicProfile},
    routes::auth_routes::load_clinic_profile,
    validation,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/clinic", get(get_clinic).patch(update_clinic))
}

pub async fn get_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ClinicProfile>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(ApiError::db)?;
    let clinic = load_clinic_profile(&mut conn, auth.clinic_id).await?;
    Ok(Json(ApiOk { data: clinic }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    pub clinic_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ApiOk<ClinicProfile>>, ApiError> {
    auth.require_admin()?;

    let name = req
        .clinic_name
        .as_deref()
        .map(|n| validation::required_text("clinic_name", n, 1, 128))
        .transpose()?;
    let phone = validation::optional_phone("phone", req.phone.as_deref())?;
    let address = validation::optional_text("address", req.address.as_deref(), 500)?;

    let clinic: ClinicProfile = sqlx::query_as::<_, ClinicProfile>(
        r#"
        UPDATE clinic
        SET clinic_name = COALESCE($2, clinic_name),
            phone = COALESCE($3, phone),
            address = COALESCE($4, address),
            updated_at = now()
        WHERE clinic_id = $1
        RETURNING clinic_id, clinic_name, phone, address
        "#,
    )
    .bind(auth.clinic_id)
    .bind(name)
    .bind(phone)
    .bind(address)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Clinic"))?;

    tracing::info!(clinic_id = %clinic.clinic_id, "clinic profile updated");

    Ok(Json(ApiOk { data: clinic }))
}
