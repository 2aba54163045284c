//! Command-line flag rendering
//!
//! Both `solana-genesis` and `agave-validator` are configured entirely
//! through long flags. Builders append in call order, so the rendered
//! argument list (and anything hashed from it) is stable for a given input.

use crate::ssh::shell_quote;

/// Accumulates `--flag value` pairs in a fixed order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagBuilder {
    args: Vec<String>,
}

impl FlagBuilder {
    /// An empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// `--name value`
    pub fn append(&mut self, name: &str, value: impl ToString) -> &mut Self {
        self.args.push(format!("--{name}"));
        self.args.push(value.to_string());
        self
    }

    /// `--name value` when the value is present
    pub fn append_opt<T: ToString>(&mut self, name: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.append(name, value);
        }
        self
    }

    /// `--name` when the switch is set
    pub fn append_bool(&mut self, name: &str, value: Option<bool>) -> &mut Self {
        if value == Some(true) {
            self.args.push(format!("--{name}"));
        }
        self
    }

    /// `--name v` once per value
    pub fn append_list<T: ToString>(&mut self, name: &str, values: &[T]) -> &mut Self {
        for value in values {
            self.append(name, value.to_string());
        }
        self
    }

    /// `--name a b c`: a single flag followed by several positional values
    pub fn append_multi<T: ToString>(&mut self, name: &str, values: &[T]) -> &mut Self {
        self.args.push(format!("--{name}"));
        self.args.extend(values.iter().map(ToString::to_string));
        self
    }

    /// Arguments passed through untouched
    pub fn extend_raw<I, S>(&mut self, raw: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(raw.into_iter().map(Into::into));
        self
    }

    /// The argument vector
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Arguments quoted for a shell, one flag group per line
    pub fn to_shell(&self) -> String {
        let mut out = String::new();
        for arg in &self.args {
            if arg.starts_with("--") && !out.is_empty() {
                out.push_str(" \\\n    ");
            } else if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&shell_quote(arg));
        }
        out
    }
}
