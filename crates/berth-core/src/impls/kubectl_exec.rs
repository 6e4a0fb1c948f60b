//! KubectlExecAdmin - AdminChannel via `kubectl exec` into the database pod.
//!
//! Commands run under `sh -c` inside the container, so credential flags
//! expand from the container's own environment (populated from a cluster
//! secret). The controller process never sees the values.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::{ClusterConfig, DatabaseConfig};
use crate::domain::InstanceRef;
use crate::ports::{AdminChannel, AdminError};

#[derive(Debug, Clone)]
pub struct KubectlExecAdmin {
    cluster: ClusterConfig,
    database: DatabaseConfig,
}

/// Map a failed command's stderr onto the admin error classes.
///
/// Order matters: a shell that cannot find `mongodump` prints "not found"
/// too, and must not be mistaken for a missing pod. Only kubectl's own
/// phrasing of a missing pod or container counts as unreachable.
pub(crate) fn classify(instance: &InstanceRef, stderr: &str) -> AdminError {
    let lower = stderr.to_lowercase();
    const AUTH: &[&str] = &[
        "authentication failed",
        "auth failed",
        "not authorized",
        "requires authentication",
        "unauthorized",
    ];
    const MISCONFIGURED: &[&str] = &[
        "command not found",
        ": not found",
        "executable file not found",
        "no such file or directory",
        "permission denied",
        "syntax error",
        "unrecognized option",
        "unknown option",
    ];
    const UNREACHABLE: &[&str] = &[
        "connection refused",
        "econnrefused",
        "server selection",
        "connection timed out",
        "i/o timeout",
        "no reachable servers",
        "unable to upgrade connection",
        "container not found",
        "is not running",
        "pod does not exist",
        "(notfound)",
        "unable to connect",
        "no route to host",
    ];
    let detail = stderr.trim();
    if AUTH.iter().any(|p| lower.contains(p)) {
        AdminError::auth_failure(instance, detail)
    } else if UNREACHABLE.iter().any(|p| lower.contains(p)) {
        AdminError::unreachable(instance, detail)
    } else if MISCONFIGURED.iter().any(|p| lower.contains(p)) {
        AdminError::misconfigured(instance, detail)
    } else {
        AdminError::data_error(instance, detail)
    }
}

impl KubectlExecAdmin {
    pub fn new(cluster: ClusterConfig, database: DatabaseConfig) -> Self {
        Self { cluster, database }
    }

    fn exec(&self, instance: &InstanceRef, template: &str, interactive: bool) -> Command {
        let mut cmd = Command::new(&self.cluster.kubectl);
        cmd.arg("--namespace").arg(&self.cluster.namespace);
        if let Some(context) = &self.cluster.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("exec");
        if interactive {
            cmd.arg("-i");
        }
        cmd.arg(&instance.instance);
        if let Some(container) = instance.container.as_ref().or(self.database.container.as_ref()) {
            cmd.arg("-c").arg(container);
        }
        cmd.args(["--", "sh", "-c"]).arg(self.database.render(template));
        cmd.kill_on_drop(true);
        cmd
    }

    fn launch_error(&self, instance: &InstanceRef, e: std::io::Error) -> AdminError {
        AdminError::unreachable(instance, format!("failed to launch {}: {e}", self.cluster.kubectl))
    }

    /// Run a short command and return its trimmed stdout.
    async fn query(&self, instance: &InstanceRef, template: &str) -> Result<String, AdminError> {
        let output = self
            .exec(instance, template, false)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.launch_error(instance, e))?;
        if !output.status.success() {
            return Err(classify(instance, &String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl AdminChannel for KubectlExecAdmin {
    async fn ping(&self, instance: &InstanceRef) -> Result<(), AdminError> {
        let reply = self.query(instance, &self.database.ping_command).await?;
        if reply.lines().last().map(str::trim) == Some("1") {
            Ok(())
        } else {
            Err(AdminError::data_error(instance, format!("unexpected ping reply: {reply}")))
        }
    }

    async fn is_empty(&self, instance: &InstanceRef) -> Result<bool, AdminError> {
        let reply = self.query(instance, &self.database.empty_check_command).await?;
        let count: u64 = reply
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| AdminError::data_error(instance, format!("unexpected count: {reply}")))?;
        Ok(count == 0)
    }

    async fn dump(&self, instance: &InstanceRef, destination: &Path) -> Result<u64, AdminError> {
        let io_err = |e: std::io::Error| {
            AdminError::data_error(instance, format!("{}: {e}", destination.display()))
        };
        let mut file = tokio::fs::File::create(destination).await.map_err(io_err)?;
        let mut child = self
            .exec(instance, &self.database.dump_command, false)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.launch_error(instance, e))?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(AdminError::data_error(instance, "exec pipes unavailable"));
        };
        let mut err_text = String::new();
        let (copied, _) = tokio::try_join!(
            tokio::io::copy(&mut stdout, &mut file),
            stderr.read_to_string(&mut err_text),
        )
        .map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;

        let status = child.wait().await.map_err(io_err)?;
        if !status.success() {
            return Err(classify(instance, &err_text));
        }
        Ok(copied)
    }

    async fn restore(&self, instance: &InstanceRef, source: &Path) -> Result<(), AdminError> {
        let io_err = |e: std::io::Error| {
            AdminError::data_error(instance, format!("{}: {e}", source.display()))
        };
        let mut file = tokio::fs::File::open(source).await.map_err(io_err)?;
        let mut child = self
            .exec(instance, &self.database.restore_command, true)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.launch_error(instance, e))?;

        let (Some(mut stdin), Some(mut stderr)) = (child.stdin.take(), child.stderr.take()) else {
            return Err(AdminError::data_error(instance, "exec pipes unavailable"));
        };
        let mut err_text = String::new();
        let feed = async move {
            let copied = tokio::io::copy(&mut file, &mut stdin).await;
            drop(stdin);
            copied
        };
        tokio::try_join!(feed, stderr.read_to_string(&mut err_text)).map_err(io_err)?;

        let status = child.wait().await.map_err(io_err)?;
        if !status.success() {
            return Err(classify(instance, &err_text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn instance() -> InstanceRef {
        InstanceRef::new("mongo", "mongo-0")
    }

    #[rstest]
    #[case("MongoServerError: Authentication failed.")]
    #[case("command listDatabases requires authentication")]
    #[case("not authorized on admin to execute command")]
    fn credential_rejections_are_auth_failures(#[case] stderr: &str) {
        assert!(matches!(classify(&instance(), stderr), AdminError::AuthFailure { .. }));
    }

    #[rstest]
    #[case("MongoNetworkError: connect ECONNREFUSED 127.0.0.1:27017")]
    #[case("MongoServerSelectionError: Server selection timed out after 30000 ms")]
    #[case("error: unable to upgrade connection: container not found (\"mongo\")")]
    #[case("Error from server (NotFound): pods \"mongo-0\" not found")]
    fn connection_problems_are_unreachable(#[case] stderr: &str) {
        let err = classify(&instance(), stderr);
        assert!(err.is_retryable(), "{err:?}");
    }

    #[rstest]
    #[case("sh: 1: mongodump: not found")]
    #[case("bash: mongorestore: command not found")]
    #[case("OCI runtime exec failed: exec: \"sh\": executable file not found in $PATH")]
    #[case("sh: 1: cannot open /backup/dump.archive: No such file or directory")]
    fn broken_commands_are_configuration_errors(#[case] stderr: &str) {
        let err = classify(&instance(), stderr);
        assert!(matches!(err, AdminError::Misconfigured { .. }), "{err:?}");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), crate::domain::ErrorKind::ConfigurationError);
    }

    #[test]
    fn anything_else_is_a_data_error() {
        let err = classify(&instance(), "Failed: mongo.messages: error restoring: E11000 duplicate key");
        assert!(matches!(err, AdminError::DataError { .. }));
        assert_eq!(err.kind(), crate::domain::ErrorKind::DataIntegrityRisk);
    }

    #[test]
    fn exec_targets_the_configured_container() {
        let admin = KubectlExecAdmin::new(ClusterConfig::default(), DatabaseConfig::default());
        let cmd = admin.exec(&instance(), "echo {auth}", false);
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let c = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[c + 1], "mongo");
        let script = args.last().unwrap();
        assert!(script.contains("$MONGO_INITDB_ROOT_PASSWORD"));
    }
}
