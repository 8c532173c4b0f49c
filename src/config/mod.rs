// SPDX-License-Identifier: GPL-3.0-only

use std::{fs::OpenOptions, path::PathBuf, time::Duration};

use ember_comp_config::EmberCompConfig;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: EmberCompConfig,
}

fn config_path(arg_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = arg_path {
        return Some(path);
    }
    let xdg = xdg::BaseDirectories::new().ok()?;
    xdg.find_config_file("ember-comp/config.ron")
}

impl Config {
    pub fn load(arg_path: Option<PathBuf>) -> Config {
        let settings = match config_path(arg_path) {
            Some(path) => match OpenOptions::new().read(true).open(&path) {
                Ok(file) => match ron::de::from_reader::<_, EmberCompConfig>(file) {
                    Ok(settings) => {
                        info!(?path, "Loaded configuration");
                        settings
                    }
                    Err(err) => {
                        error!(?err, ?path, "Malformed config file, using defaults");
                        EmberCompConfig::default()
                    }
                },
                Err(err) => {
                    warn!(?err, ?path, "Failed to read config file, using defaults");
                    EmberCompConfig::default()
                }
            },
            None => EmberCompConfig::default(),
        };
        Config { settings }
    }

    pub fn eom_delay(&self) -> Duration {
        Duration::from_secs(self.settings.external_output.presentation_delay_secs)
    }

    pub fn pace_interval(&self) -> Duration {
        let fps = self.settings.capture.paced_fps.max(1);
        Duration::from_millis(1000 / fps as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_pipeline_constants() {
        let config = Config {
            settings: EmberCompConfig::default(),
        };
        assert_eq!(config.eom_delay(), crate::eom::EOM_DELAY_CHECK_TIMEOUT);
        assert_eq!(config.pace_interval(), crate::capture::DPMS_PACE_INTERVAL);
    }

    #[test]
    fn parses_partial_ron() {
        let settings: EmberCompConfig =
            ron::from_str("(external_output: (presentation_delay_secs: 2))").unwrap();
        assert_eq!(settings.external_output.presentation_delay_secs, 2);
        assert_eq!(settings.capture.paced_fps, 30);
    }
}
