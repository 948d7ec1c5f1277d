//! Renderer configuration

use tracing::debug;

/// Renderer behaviour switches
///
/// Defaults are tuned for production use; [`RendererConfig::from_env`]
/// applies `TESSERA_*` overrides on top of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererConfig {
    /// Extension substituted into texture source paths (`None` keeps them as-is)
    pub asset_extension: Option<String>,
    /// Warn at `end` when a texture override was armed but never consumed
    pub warn_unconsumed_override: bool,
    /// Clear the blur temp buffer before the horizontal pass
    pub blur_edge_clear: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            asset_extension: None,
            warn_unconsumed_override: true,
            blur_edge_clear: true,
        }
    }
}

impl RendererConfig {
    /// Defaults with environment overrides
    ///
    /// - `TESSERA_ASSET_EXTENSION`: extension for content paths, e.g. `tex`
    /// - `TESSERA_WARN_UNCONSUMED_OVERRIDE`: `0`/`1`, `false`/`true`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(extension) = env_string("TESSERA_ASSET_EXTENSION") {
            config.asset_extension = Some(extension);
        }
        if let Some(warn) = env_bool("TESSERA_WARN_UNCONSUMED_OVERRIDE") {
            config.warn_unconsumed_override = warn;
        }
        debug!("renderer config: {:?}", config);
        config
    }

    pub fn with_asset_extension(mut self, extension: impl Into<String>) -> Self {
        self.asset_extension = Some(extension.into());
        self
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    parse_bool(&env_string(name)?)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
