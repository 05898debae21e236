//! Application and integration management endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::envelope;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub application_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDetailRequest {
    pub application_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub application_id: i64,
    pub application_version_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSupportRequest {
    pub application_version_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntegrationRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveIntegrationRequest {
    pub id: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateApplicationRequest>,
) -> ApiResult<Json<Value>> {
    let detail = state.applications.create_application(&request.application_name)?;
    Ok(envelope::ok(detail))
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let applications = state.applications.list_applications()?;
    Ok(envelope::ok(applications))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApplicationDetailRequest>,
) -> ApiResult<Json<Value>> {
    let detail = state.applications.get_application_detail(request.application_id)?;
    Ok(envelope::ok(detail))
}

pub async fn create_version(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateVersionRequest>,
) -> ApiResult<Json<Value>> {
    let version = state
        .applications
        .create_application_version(request.application_id, &request.application_version_name)?;
    Ok(envelope::ok(version))
}

pub async fn support_version(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VersionSupportRequest>,
) -> ApiResult<Json<Value>> {
    let version = state
        .applications
        .set_version_supported(request.application_version_id, true)?;
    Ok(envelope::ok(version))
}

pub async fn unsupport_version(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VersionSupportRequest>,
) -> ApiResult<Json<Value>> {
    let version = state
        .applications
        .set_version_supported(request.application_version_id, false)?;
    Ok(envelope::ok(version))
}

pub async fn create_integration(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateIntegrationRequest>,
) -> ApiResult<Json<Value>> {
    let created = state.applications.create_integration(&request.name)?;
    Ok(envelope::ok(created))
}

pub async fn list_integrations(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let integrations = state.applications.list_integrations()?;
    Ok(envelope::ok(integrations))
}

pub async fn remove_integration(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemoveIntegrationRequest>,
) -> ApiResult<Json<Value>> {
    state.applications.remove_integration(&request.id)?;
    Ok(envelope::ok_empty())
}
