//! Transport backed by the system OpenSSH client
//!
//! Each `exec` spawns `ssh user@host /bin/bash -s` and pipes the script over
//! stdin. Private keys are written to a 0600 temp file owned by the session
//! and removed when it closes. Password authentication goes through
//! `sshpass -e` so the password never appears on a command line.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{Connection, ExecutionResult, Session, Transport};
use crate::{Error, Result};

/// Exit status OpenSSH uses for its own failures (connect, auth, host key)
const SSH_CLIENT_FAILURE: i32 = 255;

/// Settings shared by every session a transport opens
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Path to the `ssh` binary
    pub ssh_program: PathBuf,
    /// Path to `sshpass`, used only for password authentication
    pub sshpass_program: PathBuf,
    /// Upper bound on a single remote command
    pub command_timeout: Duration,
    /// Verify host keys against known_hosts
    pub strict_host_key_checking: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_program: PathBuf::from("ssh"),
            sshpass_program: PathBuf::from("sshpass"),
            command_timeout: Duration::from_secs(600),
            strict_host_key_checking: false,
        }
    }
}

/// Opens sessions by spawning the OpenSSH client
#[derive(Clone, Debug, Default)]
pub struct SshTransport {
    config: TransportConfig,
}

impl SshTransport {
    /// Create a transport with the given settings
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, connection: &Connection) -> Result<Arc<dyn Session>> {
        connection.validate()?;

        let identity = match &connection.private_key {
            Some(key) => Some(write_identity(&connection.host, key.expose())?),
            None => None,
        };

        let session = SshSession {
            connection: connection.clone(),
            config: self.config.clone(),
            identity: Mutex::new(identity),
        };

        // One round trip proves reachability and authentication
        let dial = Duration::from_secs(connection.per_dial_timeout);
        let probe = tokio::time::timeout(dial, session.exec("true"))
            .await
            .map_err(|_| {
                Error::connection(
                    &connection.host,
                    format!("dial timed out after {}s", connection.per_dial_timeout),
                    1,
                )
            })??;
        if !probe.success() {
            return Err(Error::connection(
                &connection.host,
                format!("probe exited with {}: {}", probe.exit_status, probe.stderr.trim()),
                1,
            ));
        }

        debug!(host = %connection.host, port = connection.port, "session established");
        Ok(Arc::new(session))
    }
}

fn write_identity(host: &str, key: &str) -> Result<NamedTempFile> {
    let io_err = |e: std::io::Error| {
        Error::internal_with_context("ssh", format!("writing identity for {host}: {e}"))
    };
    // NamedTempFile is created 0600
    let mut file = NamedTempFile::new().map_err(io_err)?;
    file.write_all(key.as_bytes()).map_err(io_err)?;
    if !key.ends_with('\n') {
        file.write_all(b"\n").map_err(io_err)?;
    }
    file.flush().map_err(io_err)?;
    Ok(file)
}

/// A session to one host; commands run one at a time
pub struct SshSession {
    connection: Connection,
    config: TransportConfig,
    identity: Mutex<Option<NamedTempFile>>,
}

impl SshSession {
    fn command(&self, identity: Option<&NamedTempFile>) -> Command {
        let conn = &self.connection;
        let use_password = identity.is_none() && conn.password.is_some();

        let mut cmd = if use_password {
            let mut cmd = Command::new(&self.config.sshpass_program);
            cmd.arg("-e").arg(&self.config.ssh_program);
            if let Some(password) = &conn.password {
                cmd.env("SSHPASS", password.expose());
            }
            cmd
        } else {
            Command::new(&self.config.ssh_program)
        };

        cmd.arg("-p")
            .arg(conn.port.to_string())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", conn.per_dial_timeout))
            .arg("-o")
            .arg("LogLevel=ERROR");

        if !use_password {
            cmd.arg("-o").arg("BatchMode=yes");
        }
        if !self.config.strict_host_key_checking {
            cmd.arg("-o")
                .arg("StrictHostKeyChecking=no")
                .arg("-o")
                .arg("UserKnownHostsFile=/dev/null");
        }
        if let Some(file) = identity {
            cmd.arg("-i")
                .arg(file.path())
                .arg("-o")
                .arg("IdentitiesOnly=yes");
        }

        cmd.arg(format!("{}@{}", conn.user, conn.host))
            .arg("/bin/bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Session for SshSession {
    fn host(&self) -> String {
        self.connection.host.clone()
    }

    async fn exec(&self, script: &str) -> Result<ExecutionResult> {
        let host = &self.connection.host;
        // Holding the identity lock for the whole command serializes execution
        let identity = self.identity.lock().await;
        if identity.is_none() && self.connection.private_key.is_some() {
            return Err(Error::internal_with_context("ssh", format!("session to {host} is closed")));
        }

        trace!(host = %host, bytes = script.len(), "exec");
        let spawn_err = |e: std::io::Error| Error::connection(host, format!("spawning ssh: {e}"), 1);
        let mut child = self.command(identity.as_ref()).spawn().map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await.map_err(spawn_err)?;
            // Dropping stdin sends EOF so bash exits after the last line
        }

        let output = tokio::time::timeout(self.config.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::execution(
                    host,
                    "remote command",
                    -1,
                    format!("timed out after {}s", self.config.command_timeout.as_secs()),
                )
            })?
            .map_err(spawn_err)?;

        let exit_status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_status == SSH_CLIENT_FAILURE {
            return Err(Error::connection(host, stderr.trim(), 1));
        }

        Ok(ExecutionResult {
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            satisfied: false,
        })
    }

    async fn close(&self) -> Result<()> {
        if let Some(file) = self.identity.lock().await.take() {
            file.close().map_err(|e| {
                Error::internal_with_context("ssh", format!("removing identity file: {e}"))
            })?;
        }
        Ok(())
    }
}
