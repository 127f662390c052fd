use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::legend::Legend;
use crate::range_mapper::ResolveMode;

pub const MODE_ENV: &str = "SEMRANGE_RESOLVE_MODE";
pub const LEGEND_ENV: &str = "SEMRANGE_LEGEND";

/// Resolution settings shared by every open document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub mode: ResolveMode,
    pub legend: Legend,
}

/// Mode and legend path from the environment. Unknown modes are ignored.
pub fn from_env() -> (Option<ResolveMode>, Option<PathBuf>) {
    let mode = std::env::var(MODE_ENV).ok().and_then(|v| match v.parse() {
        Ok(m) => Some(m),
        Err(e) => {
            log::warn!("config: ignoring {}: {}", MODE_ENV, e);
            None
        }
    });
    let legend = std::env::var_os(LEGEND_ENV).map(PathBuf::from);
    (mode, legend)
}

impl Config {
    /// Command-line values win over the environment, which wins over the
    /// built-in defaults.
    pub fn load(mode: Option<ResolveMode>, legend_path: Option<&Path>) -> anyhow::Result<Self> {
        let (env_mode, env_legend) = from_env();
        let mode = mode.or(env_mode).unwrap_or_default();
        let legend = match legend_path.map(Path::to_path_buf).or(env_legend) {
            Some(path) => Legend::from_path(&path).with_context(|| format!("legend from {}", path.display()))?,
            None => Legend::standard(),
        };
        log::debug!(
            "config: mode={:?} legend types={} modifiers={}",
            mode,
            legend.token_types.len(),
            legend.token_modifiers.len()
        );
        Ok(Self { mode, legend })
    }
}
