//! Run manifests.
//!
//! A manifest is a TOML file describing the records a batch of tasks needs
//! and the tasks themselves:
//!
//! ```toml
//! [[keys]]
//! id = 1
//! name = "deploy"
//! secret_file = "keys/deploy_ed25519"
//!
//! [[inventories]]
//! id = 1
//! kind = "static"
//! inventory = "[web]\nhost1\n"
//! ssh_key_id = 1
//!
//! [[environments]]
//! id = 1
//! json = { region = "eu-west-1" }
//!
//! [[tasks]]
//! template_id = 1
//! playbook = "site.yml"
//! inventory_id = 1
//! environment_id = 1
//! ```
//!
//! Relative paths (`secret_file`, `working_directory`) resolve against the
//! manifest's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;

use runbook_engine::JsonlRecordStore;
use runbook_types::{EnvironmentRecord, InventoryRecord, KeyRecord, RecordId, TaskSpec};

/// Key entry; exactly one of `secret`, `secret_file`, `secret_env` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyEntry {
    pub id: RecordId,
    #[serde(default)]
    pub project_id: RecordId,
    #[serde(default)]
    pub name: String,
    pub secret: Option<String>,
    pub secret_file: Option<PathBuf>,
    pub secret_env: Option<String>,
}

impl KeyEntry {
    fn resolve(&self, base: &Path) -> Result<KeyRecord> {
        let secret = match (&self.secret, &self.secret_file, &self.secret_env) {
            (Some(secret), None, None) => secret.clone(),
            (None, Some(file), None) => {
                let path = base.join(file);
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading key {} from {}", self.id, path.display()))?
            }
            (None, None, Some(var)) => std::env::var(var)
                .with_context(|| format!("key {}: environment variable {var} is not set", self.id))?,
            _ => bail!(
                "key {} must set exactly one of secret, secret_file, secret_env",
                self.id
            ),
        };

        let mut record = KeyRecord::new(self.id, secret);
        record.project_id = self.project_id;
        record.name = self.name.clone();
        Ok(record)
    }
}

/// A parsed manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    pub keys: Vec<KeyEntry>,
    pub inventories: Vec<InventoryRecord>,
    pub environments: Vec<EnvironmentRecord>,
    pub tasks: Vec<TaskSpec>,

    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Manifest {
    /// Read and check a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&contents, base_dir).with_context(|| format!("in manifest {}", path.display()))
    }

    /// Parse manifest text, resolving relative paths against `base_dir`.
    pub fn parse(contents: &str, base_dir: PathBuf) -> Result<Self> {
        let mut manifest: Manifest = toml::from_str(contents)?;
        manifest.base_dir = base_dir;

        for task in &mut manifest.tasks {
            if let Some(dir) = &task.working_directory
                && dir.is_relative()
            {
                task.working_directory = Some(manifest.base_dir.join(dir));
            }
        }

        manifest.check()?;
        Ok(manifest)
    }

    fn check(&self) -> Result<()> {
        if self.tasks.is_empty() {
            bail!("no [[tasks]] defined");
        }

        let keys = unique_ids("key", self.keys.iter().map(|k| k.id))?;
        let inventories = unique_ids("inventory", self.inventories.iter().map(|i| i.id))?;
        let environments = unique_ids("environment", self.environments.iter().map(|e| e.id))?;

        for inventory in &self.inventories {
            if let Some(key) = inventory.ssh_key_id
                && !keys.contains(&key)
            {
                bail!("inventory {} references unknown key {key}", inventory.id);
            }
        }

        for (n, task) in self.tasks.iter().enumerate() {
            let n = n + 1;
            if let Some(id) = task.inventory_id
                && !inventories.contains(&id)
            {
                bail!("task #{n} references unknown inventory {id}");
            }
            if let Some(id) = task.environment_id
                && !environments.contains(&id)
            {
                bail!("task #{n} references unknown environment {id}");
            }
            if let Some(id) = task.vault_key_id
                && !keys.contains(&id)
            {
                bail!("task #{n} references unknown key {id}");
            }
        }
        Ok(())
    }

    /// Load keys, inventories and environments into `store`.
    pub fn seed(&self, store: &JsonlRecordStore) -> Result<()> {
        for key in &self.keys {
            store.insert_key(key.resolve(&self.base_dir)?);
        }
        for inventory in &self.inventories {
            store.insert_inventory(inventory.clone());
        }
        for environment in &self.environments {
            store.insert_environment(environment.clone());
        }
        tracing::debug!(
            keys = self.keys.len(),
            inventories = self.inventories.len(),
            environments = self.environments.len(),
            "Seeded record store from manifest"
        );
        Ok(())
    }
}

fn unique_ids(kind: &str, ids: impl Iterator<Item = RecordId>) -> Result<HashSet<RecordId>> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            bail!("duplicate {kind} id {id}");
        }
    }
    Ok(seen)
}
