//! Named session-key configurations, managed by the registry owner

use crate::account::SessionPermissions;
use crate::aggregation::MasterRegistry;
use crate::crypto::Address;
use crate::error::{CustodyError, CustodyResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    /// Seconds a provisioned key stays valid
    pub default_duration: u64,
    pub permissions: SessionPermissions,
    pub active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, Template>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn create_template(
        &mut self,
        registry: &MasterRegistry,
        caller: Address,
        name: &str,
        duration: u64,
        permissions: SessionPermissions,
    ) -> CustodyResult<&Template> {
        if !registry.is_owner(&caller) {
            return Err(CustodyError::NotRegistryOwner(caller));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(CustodyError::InvalidTemplate("name is empty".to_string()));
        }
        if duration == 0 {
            return Err(CustodyError::InvalidDuration);
        }
        if self.templates.contains_key(name) {
            return Err(CustodyError::TemplateExists(name.to_string()));
        }

        let template = Template {
            name: name.to_string(),
            default_duration: duration,
            permissions,
            active: true,
        };
        info!(template = name, duration, "Template created");
        Ok(self.templates.entry(name.to_string()).or_insert(template))
    }

    pub fn set_template_active(
        &mut self,
        registry: &MasterRegistry,
        caller: Address,
        name: &str,
        active: bool,
    ) -> CustodyResult<()> {
        if !registry.is_owner(&caller) {
            return Err(CustodyError::NotRegistryOwner(caller));
        }
        let template = self
            .templates
            .get_mut(name)
            .ok_or_else(|| CustodyError::TemplateNotFound(name.to_string()))?;
        template.active = active;
        info!(template = name, active, "Template activation changed");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Look up a template that may be used for provisioning
    pub fn require_active(&self, name: &str) -> CustodyResult<&Template> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| CustodyError::TemplateNotFound(name.to_string()))?;
        if !template.active {
            return Err(CustodyError::TemplateInactive(name.to_string()));
        }
        Ok(template)
    }

    /// All templates, sorted by name
    pub fn templates(&self) -> Vec<&Template> {
        let mut list: Vec<&Template> = self.templates.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}
