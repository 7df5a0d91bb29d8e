//! Template CRUD endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use courier_core::{Template, TemplateId};
use courier_dispatch::template::extract_variables;
use serde::Deserialize;
use uuid::Uuid;

use super::{parse_channel, tenant_id};
use crate::{error::ApiError, state::AppState};

/// Template creation and update body.
#[derive(Debug, Deserialize)]
pub struct TemplateBody {
    /// Human-readable name.
    pub name: String,
    /// Channel this template targets.
    pub channel: String,
    /// Body with `{{name}}` placeholders.
    pub body: String,
    /// Declared variables. Derived from the body when omitted.
    pub variables: Option<Vec<String>>,
    /// Provider-registered template identifier, for channels that need
    /// approved templates.
    pub provider_template_id: Option<String>,
    /// BCP 47 language code of the provider registration.
    pub language: Option<String>,
}

/// `POST /api/v1/templates`
pub async fn create_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TemplateBody>,
) -> Result<(StatusCode, Json<Template>), ApiError> {
    let tenant = tenant_id(&headers)?;
    let channel = parse_channel(&body.channel)?;
    let now = state.dispatcher.clock().now_utc();

    let variables = body.variables.unwrap_or_else(|| extract_variables(&body.body));
    let template = state.dispatcher.templates().create(Template {
        id: TemplateId::new(),
        tenant_id: tenant,
        name: body.name,
        channel,
        body: body.body,
        variables,
        provider_template_id: body.provider_template_id,
        language: body.language,
        created_at: now,
        updated_at: now,
    });
    Ok((StatusCode::CREATED, Json(template)))
}

/// `GET /api/v1/templates`
pub async fn list_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Template>>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.dispatcher.templates().list(tenant)))
}

/// `GET /api/v1/templates/{id}`
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Template>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.dispatcher.templates().get(tenant, TemplateId::from(id))?))
}

/// `PUT /api/v1/templates/{id}`
///
/// Full replacement; `updated_at` is refreshed by the store.
pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<TemplateBody>,
) -> Result<Json<Template>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let channel = parse_channel(&body.channel)?;
    let id = TemplateId::from(id);

    let existing = state.dispatcher.templates().get(tenant, id)?;
    let variables = body.variables.unwrap_or_else(|| extract_variables(&body.body));
    let updated = state.dispatcher.templates().update(Template {
        id,
        tenant_id: tenant,
        name: body.name,
        channel,
        body: body.body,
        variables,
        provider_template_id: body.provider_template_id,
        language: body.language,
        created_at: existing.created_at,
        updated_at: existing.updated_at,
    })?;
    Ok(Json(updated))
}

/// `DELETE /api/v1/templates/{id}`
pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let tenant = tenant_id(&headers)?;
    state.dispatcher.templates().delete(tenant, TemplateId::from(id))?;
    Ok(StatusCode::NO_CONTENT)
}
