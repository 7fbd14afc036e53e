use crate::{config::PipelineConfig, paths::PipelinePaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// If an env var is set and non-empty, apply `setter` with the trimmed value.
fn apply_env(var: &str, setter: impl FnOnce(&str)) {
    if let Ok(u) = std::env::var(var) {
        let t = u.trim();
        if !t.is_empty() {
            setter(t);
        }
    }
}

/// Apply environment variable overrides. Network-scoped overrides target the
/// default network after `AAVE_PIPELINE_NETWORK` has been applied.
fn apply_env_overrides(cfg: &mut PipelineConfig) {
    apply_env("AAVE_PIPELINE_NETWORK", |v| {
        v.clone_into(&mut cfg.default_network);
    });
    apply_env("AAVE_PIPELINE_AMOUNT", |v| {
        v.clone_into(&mut cfg.pipeline.amount);
    });

    let network = cfg.default_network.clone();
    if let Some(net) = cfg.network_mut(&network) {
        apply_env("AAVE_PIPELINE_RPC_URL", |v| {
            v.clone_into(&mut net.rpc_url);
        });
        if let Ok(v) = std::env::var("AAVE_PIPELINE_CONFIRMATIONS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    net.block_confirmations = n;
                }
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &PipelinePaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<PipelineConfig> {
        if !self.path.exists() {
            let cfg = PipelineConfig::default();
            self.save(&cfg)?;
            let mut cfg = cfg;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: PipelineConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &PipelineConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        fs::write(&self.path, s).context("write config.toml")?;
        Ok(())
    }
}
