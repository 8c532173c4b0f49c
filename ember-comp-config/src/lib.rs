// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EmberCompConfig {
    pub external_output: ExternalOutputConfig,
    pub capture: CaptureConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExternalOutputConfig {
    /// Seconds an output connected for a waiting client stays black before
    /// falling back to mirroring.
    pub presentation_delay_secs: u64,
}

impl Default for ExternalOutputConfig {
    fn default() -> ExternalOutputConfig {
        ExternalOutputConfig {
            presentation_delay_secs: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Dequeue rate while the display is powered off.
    pub paced_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> CaptureConfig {
        CaptureConfig { paced_fps: 30 }
    }
}
