use crate::{config::EngineConfig, paths::SwapquotePaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config (HTTP endpoints, timings).
fn apply_env_overrides(cfg: &mut EngineConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("SWAPQUOTE_QUOTE_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.quote_base_url);
    });
    apply_env("SWAPQUOTE_FALLBACK_QUOTE_BASE_URLS", |v| {
        cfg.http.fallback_quote_base_urls = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    });
    apply_env("SWAPQUOTE_BINANCE_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.binance_base_url);
    });
    apply_env("SWAPQUOTE_TOKEN_LIST", |v| {
        cfg.token_list_path = Some(v.to_owned());
    });
    apply_env("SWAPQUOTE_DEBOUNCE_MS", |v| {
        if let Ok(n) = v.parse::<u64>() {
            cfg.debounce_ms = n;
        }
    });
    apply_env("SWAPQUOTE_FALLBACK_RATE", |v| {
        if let Ok(r) = v.parse::<f64>() {
            if r.is_finite() && r.is_sign_positive() {
                cfg.rates.fallback_rate = Some(r);
            }
        }
    });
    apply_env("SWAPQUOTE_RATE_REFRESH_SECONDS", |v| {
        if let Ok(n) = v.parse::<u64>() {
            if n > 0 {
                cfg.rates.refresh_seconds = n;
            }
        }
    });
}

impl ConfigStore {
    pub fn new(paths: &SwapquotePaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<EngineConfig> {
        if !self.path.exists() {
            let cfg = EngineConfig::default();
            self.save(&cfg)?;
            let mut cfg = cfg;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: EngineConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &EngineConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults_then_reads_edits() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let paths = SwapquotePaths::at(tmp.path().join("cfg"), tmp.path().join("data"));
        let store = ConfigStore::new(&paths);

        let first = store.load_or_init_default()?;
        assert!(paths.config_file().exists());
        assert_eq!(first.native, EngineConfig::default().native);

        let mut edited = first;
        edited.debounce_ms = 42;
        edited.native.symbol = "ETH".into();
        store.save(&edited)?;

        let again = store.load_or_init_default()?;
        assert_eq!(again.native.symbol, "ETH");
        Ok(())
    }

    #[test]
    fn rejects_unparseable_file() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let paths = SwapquotePaths::at(tmp.path().to_path_buf(), tmp.path().to_path_buf());
        fs::write(paths.config_file(), "debounce_ms = \"soon\"")?;
        assert!(ConfigStore::new(&paths).load_or_init_default().is_err());
        Ok(())
    }
}
