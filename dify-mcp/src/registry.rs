//! Workflow registry
//!
//! Maps each tool name to the Dify application that backs it. The registry is
//! built once at startup from the configured credentials and is read-only
//! afterwards.

use crate::error::RegistryError;
use dify_client::{DifyClient, InputField, WorkflowApi};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An application API key
///
/// Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for building an authorization header
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A short non-secret label for log lines
    pub fn hint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() > 8 {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("...{}", tail)
        } else {
            "...".to_string()
        }
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Creates an upstream client for a credential
pub trait WorkflowConnector: Send + Sync {
    fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn WorkflowApi>, dify_client::ClientError>;
}

/// Connects credentials to a Dify instance over a shared HTTP client
#[derive(Debug, Clone)]
pub struct DifyConnector {
    http: reqwest::Client,
    base_url: String,
}

impl DifyConnector {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl WorkflowConnector for DifyConnector {
    fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn WorkflowApi>, dify_client::ClientError> {
        let client = DifyClient::new(self.http.clone(), &self.base_url, credential.expose())?;
        Ok(Arc::new(client))
    }
}

/// One workflow exposed as a tool
#[derive(Clone)]
pub struct WorkflowRegistration {
    name: String,
    description: String,
    fields: Vec<InputField>,
    credential: Credential,
    api: Arc<dyn WorkflowApi>,
    accepts_files: bool,
}

impl fmt::Debug for WorkflowRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("fields", &self.fields)
            .field("credential", &self.credential)
            .field("accepts_files", &self.accepts_files)
            .finish_non_exhaustive()
    }
}

impl WorkflowRegistration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<InputField>,
        credential: Credential,
        api: Arc<dyn WorkflowApi>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields,
            credential,
            api,
            accepts_files: false,
        }
    }

    /// Mark the application as taking file attachments
    pub fn with_file_upload(mut self, accepts_files: bool) -> Self {
        self.accepts_files = accepts_files;
        self
    }

    /// Tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application description, possibly empty
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared inputs, in form order
    pub fn fields(&self) -> &[InputField] {
        &self.fields
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Upstream client for this workflow
    pub fn api(&self) -> &Arc<dyn WorkflowApi> {
        &self.api
    }

    /// Whether runs may carry file attachments
    pub fn accepts_files(&self) -> bool {
        self.accepts_files
    }
}

/// All workflows served, keyed by tool name
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, WorkflowRegistration>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a workflow
    pub fn register(&mut self, registration: WorkflowRegistration) {
        let name = registration.name.clone();
        if let Some(previous) = self.workflows.insert(name.clone(), registration) {
            warn!(
                "Workflow '{}' registered twice; credential {} replaced by the later one",
                name,
                previous.credential.hint()
            );
        } else {
            debug!("Registered workflow '{}'", name);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&WorkflowRegistration> {
        self.workflows.get(name)
    }

    /// Registered names in sorted order
    pub fn list(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Registrations in name order
    pub fn iter(&self) -> impl Iterator<Item = &WorkflowRegistration> {
        self.workflows.values()
    }

    /// Fetch metadata for every credential and build the registry
    ///
    /// All credentials are queried concurrently. The first failure aborts
    /// the build. When `names` is non-empty it must have one entry per
    /// credential and replaces the upstream application names.
    pub async fn build(
        credentials: &[Credential],
        names: &[String],
        connector: &dyn WorkflowConnector,
    ) -> Result<Self, RegistryError> {
        if credentials.is_empty() {
            return Err(RegistryError::NoCredentials);
        }
        if !names.is_empty() && names.len() != credentials.len() {
            return Err(RegistryError::NameCountMismatch {
                names: names.len(),
                credentials: credentials.len(),
            });
        }

        let registrations =
            try_join_all(credentials.iter().enumerate().map(|(index, credential)| {
                let name_override = names.get(index).map(String::as_str);
                fetch_registration(index, credential, name_override, connector)
            }))
            .await?;

        let mut registry = Self::new();
        for registration in registrations {
            registry.register(registration);
        }
        info!(
            "Loaded {} workflows: {}",
            registry.len(),
            registry.list().join(", ")
        );
        Ok(registry)
    }
}

async fn fetch_registration(
    index: usize,
    credential: &Credential,
    name_override: Option<&str>,
    connector: &dyn WorkflowConnector,
) -> Result<WorkflowRegistration, RegistryError> {
    let api = connector
        .connect(credential)
        .map_err(|source| RegistryError::Client { index, source })?;

    let (info, parameters) = tokio::try_join!(api.app_info(), api.app_parameters())
        .map_err(|source| RegistryError::Metadata { index, source })?;

    let name = name_override
        .map(str::to_string)
        .unwrap_or(info.name)
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(RegistryError::EmptyName { index });
    }

    let fields = parameters
        .input_fields()
        .map_err(|source| RegistryError::InvalidForm {
            name: name.clone(),
            source,
        })?;
    let accepts_files = parameters.accepts_files();
    debug!(
        "Workflow '{}' ({}) declares {} inputs{}",
        name,
        credential.hint(),
        fields.len(),
        if accepts_files { " and takes files" } else { "" }
    );

    Ok(WorkflowRegistration::new(
        name,
        info.description,
        fields,
        credential.clone(),
        api,
    )
    .with_file_upload(accepts_files))
}
