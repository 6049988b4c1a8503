//! Assembling the automation command line for a task.

use std::fmt;
use std::path::PathBuf;

use runbook_types::TaskSpec;

use crate::config::EngineConfig;
use crate::inventory::InventoryArtifact;

/// Artifacts prepared for one run.
#[derive(Debug, Clone, Default)]
pub struct PreparedRun {
    pub inventory: Option<InventoryArtifact>,
    pub ssh_key: Option<PathBuf>,
    pub vault_password_file: Option<PathBuf>,
    /// Environment record contents, passed as `--extra-vars`.
    pub extra_vars: Option<serde_json::Value>,
}

/// A fully assembled process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Applied in order; later entries win.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Printable command line with `--extra-vars` contents elided.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        let mut hide_next = false;
        for arg in &self.args {
            if hide_next {
                f.write_str(" <redacted>")?;
                hide_next = false;
                continue;
            }
            hide_next = arg == EXTRA_VARS_FLAG;
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

const EXTRA_VARS_FLAG: &str = "--extra-vars";

/// Build the invocation for `spec` with its prepared artifacts.
///
/// Argument order: template arguments, inventory, private key, vault
/// password file, extra vars, verbosity/check/diff flags, playbook.
pub fn build_command(config: &EngineConfig, spec: &TaskSpec, prepared: &PreparedRun) -> CommandSpec {
    let mut command = CommandSpec::new(&config.command).args(spec.arguments.iter().cloned());

    if let Some(inventory) = &prepared.inventory {
        command = command.arg("-i").arg(inventory.argument());
    }
    if let Some(key) = &prepared.ssh_key {
        command = command.arg(format!("--private-key={}", key.display()));
    }
    if let Some(vault) = &prepared.vault_password_file {
        command = command.arg(format!("--vault-password-file={}", vault.display()));
    }
    if let Some(vars) = &prepared.extra_vars
        && !is_empty_json(vars)
    {
        command = command.arg(EXTRA_VARS_FLAG).arg(vars.to_string());
    }
    if spec.debug {
        command = command.arg("-vvvv");
    }
    if spec.dry_run {
        command = command.arg("--check");
    }
    if spec.diff {
        command = command.arg("--diff");
    }
    if !spec.playbook.is_empty() {
        command = command.arg(&spec.playbook);
    }

    if let Some(dir) = &spec.working_directory {
        command = command.current_dir(dir);
    }

    command.env.extend(config.env.iter().cloned());
    command.env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    command
        .env("PYTHONUNBUFFERED", "1")
        .env("ANSIBLE_FORCE_COLOR", "0")
}

fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> EngineConfig {
        EngineConfig::new().with_command("ansible-playbook")
    }

    #[test]
    fn test_minimal_command() {
        let spec = TaskSpec::new(1, 1, "site.yml");
        let command = build_command(&config(), &spec, &PreparedRun::default());
        assert_eq!(command.program, "ansible-playbook");
        assert_eq!(command.args, vec!["site.yml"]);
        assert!(command.working_dir.is_none());
    }

    #[test]
    fn test_full_argument_order() {
        let spec = TaskSpec {
            debug: true,
            dry_run: true,
            diff: true,
            ..TaskSpec::new(1, 1, "deploy.yml").with_arguments(["--forks", "5"])
        };
        let prepared = PreparedRun {
            inventory: Some(InventoryArtifact::StaticText {
                path: PathBuf::from("/tmp/runbook/inventory_x"),
            }),
            ssh_key: Some(PathBuf::from("/tmp/runbook/key_x_ssh_1")),
            vault_password_file: Some(PathBuf::from("/tmp/runbook/key_x_vault_2")),
            extra_vars: Some(json!({"release": "1.2"})),
        };

        let command = build_command(&config(), &spec, &prepared);
        assert_eq!(
            command.args,
            vec![
                "--forks",
                "5",
                "-i",
                "/tmp/runbook/inventory_x",
                "--private-key=/tmp/runbook/key_x_ssh_1",
                "--vault-password-file=/tmp/runbook/key_x_vault_2",
                "--extra-vars",
                r#"{"release":"1.2"}"#,
                "-vvvv",
                "--check",
                "--diff",
                "deploy.yml",
            ]
        );
    }

    #[test]
    fn test_empty_extra_vars_omitted() {
        let prepared = PreparedRun {
            extra_vars: Some(json!({})),
            ..Default::default()
        };
        let command = build_command(&config(), &TaskSpec::new(1, 1, "a.yml"), &prepared);
        assert!(!command.args.iter().any(|a| a == "--extra-vars"));
    }

    #[test]
    fn test_environment_order() {
        let config = config().with_env("ANSIBLE_HOST_KEY_CHECKING", "False");
        let spec = TaskSpec::new(1, 1, "a.yml").with_env("DEPLOY_ENV", "staging");
        let command = build_command(&config, &spec, &PreparedRun::default());

        let keys: Vec<_> = command.env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "ANSIBLE_HOST_KEY_CHECKING",
                "DEPLOY_ENV",
                "PYTHONUNBUFFERED",
                "ANSIBLE_FORCE_COLOR"
            ]
        );
    }

    #[test]
    fn test_display_redacts_extra_vars() {
        let prepared = PreparedRun {
            extra_vars: Some(json!({"db_password": "s3cret"})),
            ..Default::default()
        };
        let command = build_command(&config(), &TaskSpec::new(1, 1, "a.yml"), &prepared);
        let shown = command.to_string();
        assert!(!shown.contains("s3cret"));
        assert_eq!(shown, "ansible-playbook --extra-vars <redacted> a.yml");
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let command = CommandSpec::new("sh").arg("-c").arg("echo hi");
        assert_eq!(command.to_string(), "sh -c 'echo hi'");
    }
}
