//! Invocation of the weave network-control script

use crate::error::{ProxyError, Result};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Captured result of one weave invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeaveOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs weave subcommands synchronously.
pub trait WeaveRunner: Send + Sync {
    fn run(&self, args: &[String]) -> std::io::Result<WeaveOutput>;
}

/// Runs the real weave script as a subprocess
#[derive(Debug, Clone)]
pub struct WeaveCommand {
    program: PathBuf,
}

impl WeaveCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl WeaveRunner for WeaveCommand {
    fn run(&self, args: &[String]) -> std::io::Result<WeaveOutput> {
        debug!("Running {:?} --local {:?}", self.program, args);
        let output = Command::new(&self.program)
            .arg("--local")
            .args(args)
            .output()?;

        Ok(WeaveOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a weave subcommand on the blocking pool.
///
/// A non-zero exit becomes [`ProxyError::Weave`] carrying stderr; on success
/// stderr is still returned since weave uses it for warnings.
pub async fn call_weave(runner: &Arc<dyn WeaveRunner>, args: Vec<String>) -> Result<WeaveOutput> {
    let runner = Arc::clone(runner);
    let output = tokio::task::spawn_blocking(move || runner.run(&args))
        .await
        .map_err(|e| ProxyError::WeaveExec(std::io::Error::other(e)))?
        .map_err(ProxyError::WeaveExec)?;

    if output.success {
        Ok(output)
    } else {
        Err(ProxyError::Weave {
            stderr: output.stderr,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedWeave;
    use super::*;

    #[tokio::test]
    async fn test_call_weave_success_keeps_stderr() {
        let scripted = ScriptedWeave::new();
        scripted.reply(true, "172.17.0.1\n", "warning: something");
        let runner: Arc<dyn WeaveRunner> = scripted.clone();

        let output = call_weave(&runner, vec!["docker-bridge-ip".into()]).await.unwrap();
        assert_eq!(output.stdout, "172.17.0.1\n");
        assert_eq!(output.stderr, "warning: something");
        assert_eq!(scripted.calls(), vec![vec!["docker-bridge-ip".to_string()]]);
    }

    #[tokio::test]
    async fn test_call_weave_failure_carries_stderr() {
        let scripted = ScriptedWeave::new();
        scripted.reply(false, "", "container not found");
        let runner: Arc<dyn WeaveRunner> = scripted;

        let err = call_weave(&runner, vec!["attach".into()]).await.unwrap_err();
        match err {
            ProxyError::Weave { stderr } => assert_eq!(stderr, "container not found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_weave_command_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("weave");
        std::fs::write(&script, "#!/bin/sh\necho \"$@\"\necho oops >&2\nexit 3\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let output = WeaveCommand::new(&script)
            .run(&["ps".to_string(), "abc".to_string()])
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.stdout, "--local ps abc\n");
        assert_eq!(output.stderr, "oops\n");
    }
}
