pub mod drivers;
pub mod inspect;

use std::path::Path;

use sqlmux_core::MuxConfig;

/// Read the config file if one was given, otherwise use the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<MuxConfig> {
    match path {
        Some(path) => {
            let config = MuxConfig::from_file(path)?;
            tracing::debug!(path = %path.display(), drivers = config.drivers.len(), "loaded config");
            Ok(config)
        }
        None => Ok(MuxConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(load_config(None).unwrap(), MuxConfig::default());
    }

    #[test]
    fn reads_given_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlmux.toml");
        std::fs::write(&path, "[pool]\nmax_size = 3\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().pool.max_size, Some(3));
    }
}
