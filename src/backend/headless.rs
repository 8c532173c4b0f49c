// SPDX-License-Identifier: GPL-3.0-only

//! Driverless backend for standalone operation: a fixed panel plus one
//! virtual external output. Commits, conversions and captures complete
//! immediately on the next event-loop dispatch.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::backend::*;
use crate::utils::event::EventSender;
use crate::utils::geometry::{Size, Transform};

struct OutputState {
    id: OutputId,
    connector: ConnectorType,
    primary: bool,
    connection: ConnectionStatus,
    modes: Vec<OutputMode>,
    current_mode: Option<OutputMode>,
    physical: (u32, u32),
    dpms: Dpms,
    displaying: Option<SurfaceId>,
}

struct LayerState {
    id: LayerId,
    output: OutputId,
    caps: LayerCaps,
    formats: Vec<PixelFormat>,
    zpos: i32,
    pending: Option<Option<SurfaceId>>,
    displaying: Option<SurfaceId>,
}

struct Inner {
    outputs: Vec<OutputState>,
    layers: Vec<LayerState>,
    surfaces: HashMap<SurfaceId, HwSurface>,
    next_surface: u64,
    next_seq: u64,
    next_pp: u32,
    next_capture: u32,
}

#[derive(Clone)]
pub struct HeadlessDevice {
    inner: Arc<Mutex<Inner>>,
    events: EventSender<HwEvent>,
}

struct HeadlessOutput {
    id: OutputId,
    inner: Arc<Mutex<Inner>>,
    events: EventSender<HwEvent>,
}

struct HeadlessLayer {
    id: LayerId,
    inner: Arc<Mutex<Inner>>,
    events: EventSender<HwEvent>,
}

struct HeadlessPp {
    id: PpId,
    events: EventSender<HwEvent>,
}

struct HeadlessCapture {
    id: CaptureId,
    events: EventSender<HwEvent>,
}

impl HeadlessDevice {
    pub fn new(events: EventSender<HwEvent>) -> HeadlessDevice {
        let argb = vec![PixelFormat::Argb8888, PixelFormat::Xrgb8888];
        let mut yuv = argb.clone();
        yuv.extend([PixelFormat::Nv12, PixelFormat::Yuv420]);
        let panel_mode = OutputMode {
            size: Size::new(720, 1280),
            refresh: 60_000,
            preferred: true,
        };
        let inner = Inner {
            outputs: vec![
                OutputState {
                    id: OutputId(0),
                    connector: ConnectorType::DSI,
                    primary: true,
                    connection: ConnectionStatus::Connected,
                    modes: vec![panel_mode],
                    current_mode: Some(panel_mode),
                    physical: (68, 121),
                    dpms: Dpms::On,
                    displaying: None,
                },
                OutputState {
                    id: OutputId(1),
                    connector: ConnectorType::Virtual,
                    primary: false,
                    connection: ConnectionStatus::Connected,
                    modes: vec![OutputMode {
                        size: Size::new(1920, 1080),
                        refresh: 60_000,
                        preferred: true,
                    }],
                    current_mode: None,
                    physical: (509, 286),
                    dpms: Dpms::On,
                    displaying: None,
                },
            ],
            layers: vec![
                LayerState {
                    id: LayerId(0),
                    output: OutputId(0),
                    caps: LayerCaps::PRIMARY,
                    formats: argb.clone(),
                    zpos: 0,
                    pending: None,
                    displaying: None,
                },
                LayerState {
                    id: LayerId(1),
                    output: OutputId(0),
                    caps: LayerCaps::OVERLAY
                        | LayerCaps::VIDEO
                        | LayerCaps::SCALE
                        | LayerCaps::TRANSFORM,
                    formats: yuv,
                    zpos: 1,
                    pending: None,
                    displaying: None,
                },
                LayerState {
                    id: LayerId(10),
                    output: OutputId(1),
                    caps: LayerCaps::PRIMARY | LayerCaps::SCALE,
                    formats: argb,
                    zpos: 0,
                    pending: None,
                    displaying: None,
                },
            ],
            surfaces: HashMap::new(),
            next_surface: 0,
            next_seq: 0,
            next_pp: 0,
            next_capture: 0,
        };
        HeadlessDevice {
            inner: Arc::new(Mutex::new(inner)),
            events,
        }
    }
}

impl DisplayDevice for HeadlessDevice {
    fn outputs(&self) -> Vec<Arc<dyn HwOutput>> {
        let inner = self.inner.lock().unwrap();
        inner
            .outputs
            .iter()
            .map(|output| {
                Arc::new(HeadlessOutput {
                    id: output.id,
                    inner: self.inner.clone(),
                    events: self.events.clone(),
                }) as Arc<dyn HwOutput>
            })
            .collect()
    }

    fn output(&self, id: OutputId) -> Option<Arc<dyn HwOutput>> {
        let inner = self.inner.lock().unwrap();
        inner.outputs.iter().find(|output| output.id == id).map(|output| {
            Arc::new(HeadlessOutput {
                id: output.id,
                inner: self.inner.clone(),
                events: self.events.clone(),
            }) as Arc<dyn HwOutput>
        })
    }

    fn allocate_surface(
        &self,
        size: Size<crate::utils::geometry::Buffer>,
        format: PixelFormat,
    ) -> Result<HwSurface, DeviceError> {
        if size.is_empty() {
            return Err(DeviceError::AllocationFailed);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.next_surface += 1;
        let surface = HwSurface {
            id: SurfaceId(inner.next_surface),
            size,
            pitch: size.w as u32 * 4,
            format,
        };
        inner.surfaces.insert(surface.id, surface);
        Ok(surface)
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        self.inner.lock().unwrap().surfaces.remove(&surface);
    }

    fn capture_caps(&self) -> CaptureCaps {
        CaptureCaps::ONESHOT | CaptureCaps::STREAM
    }

    fn create_capture(&self, _output: OutputId) -> Result<Arc<dyn CaptureSource>, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_capture += 1;
        Ok(Arc::new(HeadlessCapture {
            id: CaptureId(inner.next_capture),
            events: self.events.clone(),
        }))
    }

    fn create_pp(&self) -> Result<Arc<dyn PostProcessor>, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_pp += 1;
        Ok(Arc::new(HeadlessPp {
            id: PpId(inner.next_pp),
            events: self.events.clone(),
        }))
    }
}

impl HeadlessOutput {
    fn with_state<R>(&self, f: impl FnOnce(&mut OutputState) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .outputs
            .iter_mut()
            .find(|output| output.id == self.id)
            .unwrap();
        f(state)
    }
}

impl HwOutput for HeadlessOutput {
    fn id(&self) -> OutputId {
        self.id
    }
    fn connector_type(&self) -> ConnectorType {
        self.with_state(|s| s.connector)
    }
    fn is_primary(&self) -> bool {
        self.with_state(|s| s.primary)
    }
    fn connection(&self) -> ConnectionStatus {
        self.with_state(|s| s.connection)
    }
    fn modes(&self) -> Vec<OutputMode> {
        self.with_state(|s| s.modes.clone())
    }
    fn current_mode(&self) -> Option<OutputMode> {
        self.with_state(|s| s.current_mode)
    }
    fn set_mode(&self, mode: &OutputMode) -> Result<(), DeviceError> {
        self.with_state(|s| {
            s.current_mode = Some(*mode);
            Ok(())
        })
    }
    fn physical_size(&self) -> (u32, u32) {
        self.with_state(|s| s.physical)
    }
    fn transform(&self) -> Transform {
        Transform::Normal
    }
    fn dpms(&self) -> Dpms {
        self.with_state(|s| s.dpms)
    }
    fn set_dpms(&self, mode: Dpms) -> Result<(), DeviceError> {
        let id = self.id;
        self.with_state(|s| s.dpms = mode);
        self.events.send(HwEvent::DpmsChanged { output: id, mode });
        Ok(())
    }
    fn layers(&self) -> Vec<Arc<dyn HwLayer>> {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .filter(|layer| layer.output == self.id)
            .map(|layer| {
                Arc::new(HeadlessLayer {
                    id: layer.id,
                    inner: self.inner.clone(),
                    events: self.events.clone(),
                }) as Arc<dyn HwLayer>
            })
            .collect()
    }
    fn commit(&self) -> Result<CommitSeq, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let seq = CommitSeq(inner.next_seq);
        self.events.send(HwEvent::OutputCommitDone {
            output: self.id,
            seq,
        });
        Ok(seq)
    }
    fn request_vblank(&self) -> Result<(), DeviceError> {
        self.events.send(HwEvent::Vblank { output: self.id });
        Ok(())
    }
    fn displaying_surface(&self) -> Option<SurfaceId> {
        self.with_state(|s| s.displaying)
    }
}

impl HwLayer for HeadlessLayer {
    fn id(&self) -> LayerId {
        self.id
    }
    fn output(&self) -> OutputId {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .find(|layer| layer.id == self.id)
            .unwrap()
            .output
    }
    fn caps(&self) -> LayerCaps {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .find(|layer| layer.id == self.id)
            .unwrap()
            .caps
    }
    fn formats(&self) -> Vec<PixelFormat> {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .find(|layer| layer.id == self.id)
            .unwrap()
            .formats
            .clone()
    }
    fn zpos(&self) -> i32 {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .find(|layer| layer.id == self.id)
            .unwrap()
            .zpos
    }
    fn set_geometry(&self, _geometry: &LayerGeometry) -> Result<(), DeviceError> {
        Ok(())
    }
    fn set_surface(&self, surface: Option<SurfaceId>) -> Result<(), DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        let layer = inner
            .layers
            .iter_mut()
            .find(|layer| layer.id == self.id)
            .unwrap();
        layer.pending = Some(surface);
        Ok(())
    }
    fn commit(&self) -> Result<CommitSeq, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let seq = CommitSeq(inner.next_seq);
        let id = self.id;
        let layer = inner
            .layers
            .iter_mut()
            .find(|layer| layer.id == id)
            .unwrap();
        let displayed = layer.pending.take().unwrap_or(None);
        layer.displaying = displayed;
        self.events.send(HwEvent::LayerCommitDone {
            layer: id,
            displayed,
            seq,
        });
        Ok(seq)
    }
    fn set_property(&self, _name: &str, _value: i64) -> Result<(), DeviceError> {
        Ok(())
    }
    fn displaying_surface(&self) -> Option<SurfaceId> {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .find(|layer| layer.id == self.id)
            .unwrap()
            .displaying
    }
}

impl PostProcessor for HeadlessPp {
    fn id(&self) -> PpId {
        self.id
    }
    fn set_info(&self, _info: &PpInfo) -> Result<(), DeviceError> {
        Ok(())
    }
    fn convert(&self, src: SurfaceId, dst: SurfaceId) -> Result<(), DeviceError> {
        self.events.send(HwEvent::PpDone {
            pp: self.id,
            src,
            dst,
        });
        Ok(())
    }
    fn size_constraints(&self) -> PpSizeConstraints {
        PpSizeConstraints {
            min: Size::new(16, 16),
            max: Size::new(4096, 4096),
            align: 16,
        }
    }
}

impl CaptureSource for HeadlessCapture {
    fn id(&self) -> CaptureId {
        self.id
    }
    fn set_info(&self, _info: &CaptureInfo) -> Result<(), DeviceError> {
        Ok(())
    }
    fn oneshot(&self, dst: SurfaceId) -> Result<(), DeviceError> {
        self.events.send(HwEvent::CaptureDone {
            capture: self.id,
            dst,
        });
        Ok(())
    }
    fn attach(&self, dst: SurfaceId) -> Result<(), DeviceError> {
        self.events.send(HwEvent::CaptureDone {
            capture: self.id,
            dst,
        });
        Ok(())
    }
    fn start_stream(&self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn stop(&self) {}
}
