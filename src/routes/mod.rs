use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod clinic_routes;
pub mod inventory_routes;
pub mod patient_routes;
pub mod transaction_routes;
pub mod treatment_routes;

#[cfg(test)]
mod tests;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/patients", patient_routes::router())
        .nest("/api/v1/appointments", appointment_routes::router())
        .nest("/api/v1/treatments", treatment_routes::router())
        .nest("/api/v1/inventory", inventory_routes::router())
        .nest("/api/v1/transactions", transaction_routes::router())
        .nest("/api/v1", clinic_routes::router())
        .with_state(state)
}
