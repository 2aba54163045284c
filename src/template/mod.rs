//! Rendering of embedded script and configuration assets
//!
//! Remote scripts, systemd units and the primordial accounts file are kept as
//! minijinja templates next to the module that owns them and compiled into
//! the binary with `include_str!`. Undefined variables are an error so a
//! missing field never renders as an empty flag.
//!
//! Filters:
//! - `shell_quote`: quote a value for interpolation into bash

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::ssh::shell_quote;
use crate::Result;

/// A named template compiled into the binary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Asset {
    name: &'static str,
    source: &'static str,
}

impl Asset {
    /// Declare an asset; `name` shows up in render errors
    pub const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }

    /// Asset name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Template engine shared by the genesis and validator renderers
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create an engine with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_filter("shell_quote", |value: String| shell_quote(&value));
        Self { env }
    }

    /// Render an asset with the given context
    pub fn render<S: Serialize>(&self, asset: &Asset, ctx: S) -> Result<String> {
        let template = self.env.template_from_named_str(asset.name, asset.source)?;
        Ok(template.render(ctx)?)
    }
}
