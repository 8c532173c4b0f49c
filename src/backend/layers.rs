// SPDX-License-Identifier: GPL-3.0-only

//! Directory of hardware layers across all outputs.
//!
//! Claiming marks the layer unusable in the same call that observed it as
//! free, so two surfaces deciding concurrently on the same dispatch can never
//! both walk away with it.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::backend::{HwLayer, HwOutput, LayerCaps, LayerId, OutputId};

struct LayerEntry {
    layer: Arc<dyn HwLayer>,
    usable: bool,
}

#[derive(Default)]
pub struct LayerDirectory {
    entries: IndexMap<LayerId, LayerEntry>,
}

impl LayerDirectory {
    pub fn new() -> LayerDirectory {
        LayerDirectory::default()
    }

    pub fn register_output(&mut self, output: &dyn HwOutput) {
        for layer in output.layers() {
            let id = layer.id();
            self.entries
                .entry(id)
                .or_insert(LayerEntry { layer, usable: true });
        }
    }

    pub fn remove_output(&mut self, output: OutputId) {
        self.entries.retain(|_, entry| entry.layer.output() != output);
    }

    /// Layers of one output, bottom-most first.
    pub fn layers_of(&self, output: OutputId) -> Vec<Arc<dyn HwLayer>> {
        let mut layers: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.layer.output() == output)
            .map(|entry| entry.layer.clone())
            .collect();
        layers.sort_by_key(|layer| layer.zpos());
        layers
    }

    pub fn is_usable(&self, id: LayerId) -> bool {
        self.entries.get(&id).map_or(false, |entry| entry.usable)
    }

    /// Claim a specific layer. Returns `None` if unknown or already claimed.
    pub fn claim(&mut self, id: LayerId) -> Option<Arc<dyn HwLayer>> {
        let entry = self.entries.get_mut(&id)?;
        if !entry.usable {
            return None;
        }
        entry.usable = false;
        Some(entry.layer.clone())
    }

    /// Claim the most capable free non-primary layer of `output` for video,
    /// preferring layers with the VIDEO capability.
    pub fn claim_video_layer(&mut self, output: OutputId) -> Option<Arc<dyn HwLayer>> {
        let pick = |entries: &IndexMap<LayerId, LayerEntry>, want_video: bool| {
            entries
                .iter()
                .filter(|(_, entry)| {
                    entry.usable
                        && entry.layer.output() == output
                        && !entry
                            .layer
                            .caps()
                            .intersects(LayerCaps::PRIMARY | LayerCaps::CURSOR)
                        && entry.layer.caps().contains(LayerCaps::VIDEO) == want_video
                })
                .map(|(id, _)| *id)
                .next()
        };
        let id = pick(&self.entries, true).or_else(|| pick(&self.entries, false))?;
        debug!(layer = ?id, ?output, "Claiming video layer");
        self.claim(id)
    }

    pub fn release(&mut self, id: LayerId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.usable = true;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::testing::FakeDevice;
    use crate::backend::DisplayDevice;

    #[test]
    fn claim_is_exclusive_until_release() {
        let device = FakeDevice::new_dual_output();
        let mut dir = LayerDirectory::new();
        for output in device.outputs() {
            dir.register_output(&*output);
        }
        let claimed = dir.claim_video_layer(OutputId(0)).expect("video layer");
        assert!(!dir.is_usable(claimed.id()));
        assert!(dir.claim(claimed.id()).is_none());
        dir.release(claimed.id());
        assert!(dir.is_usable(claimed.id()));
        assert!(dir.claim(claimed.id()).is_some());
    }

    #[test]
    fn video_capable_layer_preferred() {
        let device = FakeDevice::new_dual_output();
        let mut dir = LayerDirectory::new();
        for output in device.outputs() {
            dir.register_output(&*output);
        }
        let first = dir.claim_video_layer(OutputId(0)).expect("video layer");
        assert!(first.caps().contains(LayerCaps::VIDEO));
        // second claim falls back to a plain overlay
        let second = dir.claim_video_layer(OutputId(0)).expect("overlay layer");
        assert!(!second.caps().contains(LayerCaps::VIDEO));
    }
}
