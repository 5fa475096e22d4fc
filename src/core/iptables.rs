//! iptables / ip6tables rule-engine adapter
//!
//! Every primitive is one invocation of the family's engine binary, spawned
//! through [`crate::elevation`] with an argv vector (no shell). The global
//! arguments `-w` (wait for the xtables lock) and `-t <table>` are prepended
//! to every call.

use crate::config::AppConfig;
use crate::core::engine::{JumpRemoval, RuleEngine, truncate_annotation};
use crate::core::error::EngineError;
use crate::core::family::Family;
use std::process::Stdio;
use tracing::{debug, warn};

/// iptables diagnostic for an unknown chain or jump target
const NO_SUCH_NAME: &str = "no chain/target/match by that name";
/// iptables diagnostic when `-D` finds no matching rule
const NO_MATCHING_RULE: &str = "does a matching rule exist";

/// Adapter driving one iptables-family binary
#[derive(Debug, Clone)]
pub struct IptablesEngine {
    family: Family,
    program: String,
    table: String,
    wait_for_lock: bool,
}

struct EngineOutput {
    success: bool,
    stderr: String,
    exit_code: Option<i32>,
}

impl IptablesEngine {
    pub fn new(family: Family, program: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            family,
            program: program.into(),
            table: table.into(),
            wait_for_lock: true,
        }
    }

    pub fn with_wait_for_lock(mut self, wait: bool) -> Self {
        self.wait_for_lock = wait;
        self
    }

    /// Builds the engine for `family` from the effective configuration
    pub fn from_config(config: &AppConfig, family: Family) -> Self {
        Self::new(family, config.engine_program(family), config.table.clone())
            .with_wait_for_lock(config.wait_for_lock)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument vector for one primitive
    fn command_args(&self, op_args: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(op_args.len() + 3);
        if self.wait_for_lock {
            args.push("-w".to_string());
        }
        args.push("-t".to_string());
        args.push(self.table.clone());
        args.extend_from_slice(op_args);
        args
    }

    async fn execute(&self, op_args: &[String]) -> Result<EngineOutput, EngineError> {
        let args = self.command_args(op_args);
        debug!(program = %self.program, args = ?args, "Executing engine command");

        let output = crate::elevation::create_elevated_engine_command(&self.program, &args)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            debug!(
                program = %self.program,
                exit_code = ?output.status.code(),
                stderr = %stderr,
                "Engine command failed"
            );
        }

        Ok(EngineOutput {
            success: output.status.success(),
            stderr,
            exit_code: output.status.code(),
        })
    }

    fn command_error(&self, op_args: &[String], out: EngineOutput) -> EngineError {
        EngineError::Command {
            program: self.program.clone(),
            args: self.command_args(op_args),
            stderr: out.stderr,
            exit_code: out.exit_code,
        }
    }

    /// Runs a primitive that must succeed
    async fn run(&self, op_args: &[String]) -> Result<(), EngineError> {
        let out = self.execute(op_args).await?;
        if out.success {
            Ok(())
        } else {
            Err(self.command_error(op_args, out))
        }
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

/// Arguments appending `spec` to `chain`, with the annotation as an xt_comment match
pub fn append_args(chain: &str, spec: &[String], annotation: Option<&str>) -> Vec<String> {
    let mut args = owned(&["-A", chain]);
    args.extend_from_slice(spec);
    if let Some(annotation) = annotation.filter(|a| !a.is_empty()) {
        args.extend(owned(&["-m", "comment", "--comment", truncate_annotation(annotation)]));
    }
    args
}

impl RuleEngine for IptablesEngine {
    fn family(&self) -> Family {
        self.family
    }

    async fn exists(&self, chain: &str) -> Result<bool, EngineError> {
        let op = owned(&["-n", "-L", chain]);
        let out = self.execute(&op).await?;
        if out.success {
            Ok(true)
        } else if out.stderr.to_lowercase().contains(NO_SUCH_NAME) {
            Ok(false)
        } else {
            Err(self.command_error(&op, out))
        }
    }

    async fn create(&self, chain: &str) -> Result<(), EngineError> {
        let op = owned(&["-N", chain]);
        let out = self.execute(&op).await?;
        if out.success {
            Ok(())
        } else if out.stderr.to_lowercase().contains("already exists") {
            Err(EngineError::ChainExists(chain.to_string()))
        } else {
            Err(self.command_error(&op, out))
        }
    }

    async fn append(
        &self,
        chain: &str,
        spec: &[String],
        annotation: Option<&str>,
    ) -> Result<(), EngineError> {
        let op = append_args(chain, spec, annotation);
        let out = self.execute(&op).await?;
        if out.success {
            return Ok(());
        }
        let lower = out.stderr.to_lowercase();
        if lower.contains("xtables lock") || lower.contains("permission denied") {
            Err(self.command_error(&op, out))
        } else {
            Err(EngineError::Rejected {
                chain: chain.to_string(),
                message: out.stderr,
            })
        }
    }

    async fn insert_jump_before(
        &self,
        jump_chain: &str,
        target: &str,
    ) -> Result<(), EngineError> {
        self.run(&owned(&["-I", jump_chain, "1", "-j", target])).await
    }

    async fn rename(&self, old: &str, new: &str) -> Result<(), EngineError> {
        let op = owned(&["-E", old, new]);
        let out = self.execute(&op).await?;
        let lower = out.stderr.to_lowercase();
        if out.success {
            Ok(())
        } else if lower.contains("already exists") || lower.contains("file exists") {
            Err(EngineError::ChainExists(new.to_string()))
        } else {
            Err(self.command_error(&op, out))
        }
    }

    async fn remove_jump(
        &self,
        jump_chain: &str,
        target: &str,
    ) -> Result<JumpRemoval, EngineError> {
        let op = owned(&["-D", jump_chain, "-j", target]);
        let out = self.execute(&op).await?;
        if out.success {
            return Ok(JumpRemoval::Removed);
        }

        let lower = out.stderr.to_lowercase();
        if lower.contains(NO_MATCHING_RULE) {
            return Ok(JumpRemoval::NotFound);
        }
        if lower.contains(NO_SUCH_NAME) {
            // Same diagnostic for a missing target and a missing jump chain
            if self.exists(jump_chain).await? {
                return Ok(JumpRemoval::NotFound);
            }
            warn!(
                chain = %jump_chain,
                family = %self.family,
                "Jump chain vanished during rotation"
            );
            return Err(EngineError::NoSuchChain(jump_chain.to_string()));
        }
        Err(self.command_error(&op, out))
    }

    async fn flush(&self, chain: &str) -> Result<(), EngineError> {
        self.run(&owned(&["-F", chain])).await
    }

    async fn delete(&self, chain: &str) -> Result<(), EngineError> {
        let op = owned(&["-X", chain]);
        let out = self.execute(&op).await?;
        if out.success {
            return Ok(());
        }
        let lower = out.stderr.to_lowercase();
        if lower.contains("too many links") || lower.contains("resource busy") {
            Err(EngineError::ChainInUse(chain.to_string()))
        } else if lower.contains("directory not empty") {
            Err(EngineError::ChainNotEmpty(chain.to_string()))
        } else {
            Err(self.command_error(&op, out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_with_lock_wait() {
        let engine = IptablesEngine::new(Family::V4, "iptables", "filter");
        let args = engine.command_args(&owned(&["-N", "edge_new"]));
        assert_eq!(args, owned(&["-w", "-t", "filter", "-N", "edge_new"]));
    }

    #[test]
    fn test_command_args_without_lock_wait() {
        let engine =
            IptablesEngine::new(Family::V6, "ip6tables", "mangle").with_wait_for_lock(false);
        let args = engine.command_args(&owned(&["-F", "x"]));
        assert_eq!(args, owned(&["-t", "mangle", "-F", "x"]));
    }

    #[test]
    fn test_append_args_with_annotation() {
        let spec = owned(&["-p", "tcp", "--dport", "22", "-j", "ACCEPT"]);
        let args = append_args("edge_new", &spec, Some("allow ssh"));
        assert_eq!(
            args,
            owned(&[
                "-A", "edge_new", "-p", "tcp", "--dport", "22", "-j", "ACCEPT", "-m", "comment",
                "--comment", "allow ssh"
            ])
        );
    }

    #[test]
    fn test_append_args_skips_empty_annotation() {
        let spec = owned(&["-j", "DROP"]);
        assert_eq!(append_args("c", &spec, Some("")), owned(&["-A", "c", "-j", "DROP"]));
        assert_eq!(append_args("c", &spec, None), owned(&["-A", "c", "-j", "DROP"]));
    }

    #[test]
    fn test_append_args_truncates_annotation() {
        let long = "z".repeat(300);
        let args = append_args("c", &owned(&["-j", "DROP"]), Some(&long));
        assert_eq!(args.last().unwrap().len(), 255);
    }

    #[test]
    fn test_from_config_uses_family_binary() {
        let config = AppConfig::default();
        let v6 = IptablesEngine::from_config(&config, Family::V6);
        assert_eq!(v6.family(), Family::V6);
        assert!(v6.program().ends_with("ip6tables"));
    }
}
