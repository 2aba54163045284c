//! Remote scripts with payload files and idempotency checks
//!
//! Scripts are rendered to plain bash and fed to `/bin/bash -s` on the host,
//! so nothing here depends on what is installed remotely beyond coreutils.

/// A file written to the host before the script body runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadFile {
    /// Absolute destination path
    pub path: String,
    /// File contents, written verbatim
    pub contents: String,
    /// Octal permission bits, e.g. `0o600`
    pub mode: u32,
}

impl PayloadFile {
    /// A payload file with explicit permissions
    pub fn new(path: impl Into<String>, contents: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            mode,
        }
    }

    /// A secret file readable only by its owner
    pub fn secret(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self::new(path, contents, 0o600)
    }

    fn render(&self) -> String {
        let dir = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(i) => self.path[..i].to_string(),
        };
        // umask first so the file is never briefly world-readable
        format!(
            "mkdir -p {dir}\n(umask 077 && printf '%s' {contents} > {path})\nchmod {mode:o} {path}\n",
            dir = shell_quote(&dir),
            contents = shell_quote(&self.contents),
            path = shell_quote(&self.path),
            mode = self.mode,
        )
    }
}

/// A unit of remote work
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    name: String,
    env: Vec<(String, String)>,
    files: Vec<PayloadFile>,
    check: Option<String>,
    body: String,
}

impl Script {
    /// A script with a short name (used in errors and logs) and a bash body
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Export an environment variable for the check and the body
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Write a file before the body runs
    pub fn with_file(mut self, file: PayloadFile) -> Self {
        self.files.push(file);
        self
    }

    /// Skip the body entirely when this command exits 0
    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }

    /// Short name of the script
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload files, in write order
    pub fn files(&self) -> &[PayloadFile] {
        &self.files
    }

    fn exports(&self) -> String {
        self.env
            .iter()
            .map(|(k, v)| format!("export {k}={}\n", shell_quote(v)))
            .collect()
    }

    /// The check rendered as a standalone script, if there is one
    pub fn render_check(&self) -> Option<String> {
        self.check
            .as_ref()
            .map(|check| format!("set -u\n{}{check}\n", self.exports()))
    }

    /// The full body: strict mode, exports, payload files, then the commands
    pub fn render(&self) -> String {
        let mut out = String::from("set -euo pipefail\n");
        out.push_str(&self.exports());
        for file in &self.files {
            out.push_str(&file.render());
        }
        out.push_str(&self.body);
        if !self.body.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Quote a value for safe interpolation into a POSIX shell command
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(shell_quote("/home/sol/ledger"), "/home/sol/ledger");
        assert_eq!(shell_quote("8000-8020"), "8000-8020");
    }

    #[test]
    fn metacharacters_and_quotes_are_escaped() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }

    #[test]
    fn render_writes_files_before_body() {
        let script = Script::new("install", "systemctl daemon-reload")
            .with_env("SOLANA_METRICS_CONFIG", "host=https://m,db=d")
            .with_file(PayloadFile::secret("/home/sol/validator-keypair.json", "[1,2,3]"));

        let rendered = script.render();
        let export = rendered.find("export SOLANA_METRICS_CONFIG=").unwrap();
        let write = rendered.find("/home/sol/validator-keypair.json").unwrap();
        let body = rendered.find("systemctl daemon-reload").unwrap();

        assert!(rendered.starts_with("set -euo pipefail\n"));
        assert!(export < write && write < body);
        assert!(rendered.contains("mkdir -p /home/sol\n"));
        assert!(rendered.contains("chmod 600 /home/sol/validator-keypair.json"));
        assert!(rendered.contains("printf '%s' '[1,2,3]'"));
    }

    #[test]
    fn check_includes_exports_but_not_files() {
        let script = Script::new("n", "true")
            .with_env("LEDGER", "/mnt/ledger")
            .with_file(PayloadFile::secret("/tmp/key", "secret"))
            .with_check("test -f \"$LEDGER/genesis.bin\"");

        let check = script.render_check().unwrap();
        assert!(check.contains("export LEDGER=/mnt/ledger"));
        assert!(check.contains("genesis.bin"));
        assert!(!check.contains("secret"));
    }

    #[test]
    fn script_without_check_renders_none() {
        assert!(Script::new("n", "true").render_check().is_none());
    }
}
