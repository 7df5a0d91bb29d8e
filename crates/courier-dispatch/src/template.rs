//! Tenant-scoped template storage and rendering.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use courier_core::{
    Clock, CoreError, ProviderTemplate, Result, Template, TemplateId, TenantId,
};

/// Renders `{{name}}` placeholders from the supplied parameters.
///
/// # Errors
///
/// [`CoreError::MissingVariable`] listing every declared variable absent
/// from `params`. Extra parameters are ignored.
pub fn render(template: &Template, params: &HashMap<String, String>) -> Result<String> {
    let missing: Vec<String> =
        template.variables.iter().filter(|v| !params.contains_key(*v)).cloned().collect();
    if !missing.is_empty() {
        return Err(CoreError::MissingVariable(missing));
    }

    let mut body = template.body.clone();
    for variable in &template.variables {
        if let Some(value) = params.get(variable) {
            body = body.replace(&format!("{{{{{variable}}}}}"), value);
        }
    }
    Ok(body)
}

/// Provider-side template identity for channels that require approved
/// templates, with parameter values in declared variable order.
///
/// Returns `None` when the template has no provider registration; the
/// caller must have validated parameters via [`render`] first.
pub fn provider_template(
    template: &Template,
    params: &HashMap<String, String>,
) -> Option<ProviderTemplate> {
    let provider_template_id = template.provider_template_id.clone()?;
    Some(ProviderTemplate {
        provider_template_id,
        language: template.language.clone().unwrap_or_else(|| "en".to_string()),
        params: template
            .variables
            .iter()
            .filter_map(|v| params.get(v).cloned())
            .collect(),
    })
}

/// Collects `{{name}}` placeholders from a body, deduplicated, in first
/// appearance order. Unclosed braces are ignored.
pub fn extract_variables(body: &str) -> Vec<String> {
    let mut variables = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = after[..end].trim();
        if !name.is_empty() && !variables.iter().any(|v| v == name) {
            variables.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    variables
}

/// In-memory template store keyed by `(tenant, template)`.
#[derive(Debug)]
pub struct TemplateStore {
    templates: RwLock<HashMap<(TenantId, TemplateId), Template>>,
    clock: Arc<dyn Clock>,
}

impl TemplateStore {
    /// Creates an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { templates: RwLock::new(HashMap::new()), clock }
    }

    /// Stores a new template.
    pub fn create(&self, template: Template) -> Template {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        templates.insert((template.tenant_id, template.id), template.clone());
        template
    }

    /// Fetches a tenant's template.
    pub fn get(&self, tenant_id: TenantId, id: TemplateId) -> Result<Template> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        templates
            .get(&(tenant_id, id))
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("template {id}")))
    }

    /// Replaces an existing template, refreshing `updated_at`.
    pub fn update(&self, mut template: Template) -> Result<Template> {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        let key = (template.tenant_id, template.id);
        if !templates.contains_key(&key) {
            return Err(CoreError::NotFound(format!("template {}", template.id)));
        }
        template.updated_at = self.clock.now_utc();
        templates.insert(key, template.clone());
        Ok(template)
    }

    /// Deletes a tenant's template.
    pub fn delete(&self, tenant_id: TenantId, id: TemplateId) -> Result<()> {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        templates
            .remove(&(tenant_id, id))
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("template {id}")))
    }

    /// All templates belonging to a tenant.
    pub fn list(&self, tenant_id: TenantId) -> Vec<Template> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<Template> =
            templates.values().filter(|t| t.tenant_id == tenant_id).cloned().collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        owned
    }
}
