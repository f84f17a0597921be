//! Process-wide resource description and the tenant config collaborator.
//!
//! A [`ResourceDescriptor`] captures the static attributes of the process
//! emitting spans (service name, version, host, environment). It is built
//! once, handed to the tracer at construction, and never changes afterwards.

use crate::span::AttributeValue;

/// Static attributes attached once per process lifetime.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    service_name: String,
    service_version: String,
    host_name: Option<String>,
    environment: Option<String>,
    extra: Vec<(String, AttributeValue)>,
}

impl ResourceDescriptor {
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            host_name: None,
            environment: None,
            extra: Vec::new(),
        }
    }

    /// Fills host and environment from `HOSTNAME` and
    /// `DEPLOYMENT_ENVIRONMENT`, defaulting to `"local"` when unset.
    pub fn from_env(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self::new(service_name, service_version)
            .with_host_name(env_or("HOSTNAME", "local"))
            .with_environment(env_or("DEPLOYMENT_ENVIRONMENT", "local"))
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// All resource attributes under their conventional keys.
    pub fn attributes(&self) -> Vec<(String, AttributeValue)> {
        let mut out = vec![
            (
                "service.name".to_string(),
                AttributeValue::String(self.service_name.clone()),
            ),
            (
                "service.version".to_string(),
                AttributeValue::String(self.service_version.clone()),
            ),
        ];
        if let Some(host) = &self.host_name {
            out.push(("host.name".to_string(), AttributeValue::String(host.clone())));
        }
        if let Some(env) = &self.environment {
            out.push((
                "deployment.environment".to_string(),
                AttributeValue::String(env.clone()),
            ));
        }
        out.extend(self.extra.iter().cloned());
        out
    }
}

fn env_or(var: &str, fallback: &str) -> String {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => fallback.to_string(),
    }
}

/// Supplies the process-wide current tenant id, read on demand by the
/// tenant enrichment processor.
pub trait TenantSource: Send + Sync {
    fn current_tenant(&self) -> String;
}

/// A constant tenant id.
#[derive(Debug, Clone)]
pub struct FixedTenant(pub String);

impl FixedTenant {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self(tenant.into())
    }
}

impl TenantSource for FixedTenant {
    fn current_tenant(&self) -> String {
        self.0.clone()
    }
}

/// Reads the tenant id from an environment variable on every call, falling
/// back to a fixed value when the variable is unset or blank.
#[derive(Debug, Clone)]
pub struct EnvTenant {
    var: String,
    fallback: String,
}

impl EnvTenant {
    pub fn new(var: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            fallback: fallback.into(),
        }
    }
}

impl TenantSource for EnvTenant {
    fn current_tenant(&self) -> String {
        env_or(&self.var, &self.fallback)
    }
}
