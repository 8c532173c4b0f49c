// SPDX-License-Identifier: GPL-3.0-only

//! In-memory display device for tests. Commits, conversions and captures are
//! recorded instead of executed; tests complete them explicitly and feed the
//! returned [`HwEvent`]s back into the managers, which makes every callback
//! interleaving reproducible.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use crate::backend::*;
use crate::utils::geometry::{Size, Transform};

struct OutputState {
    id: OutputId,
    connector: ConnectorType,
    primary: bool,
    connection: ConnectionStatus,
    modes: Vec<OutputMode>,
    current_mode: Option<OutputMode>,
    physical: (u32, u32),
    transform: Transform,
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
    geometry: Option<LayerGeometry>,
    properties: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Copy)]
struct LayerCommit {
    layer: LayerId,
    seq: CommitSeq,
    surface: Option<SurfaceId>,
}

struct Inner {
    outputs: Vec<OutputState>,
    layers: Vec<LayerState>,
    surfaces: HashMap<SurfaceId, HwSurface>,
    destroyed_surfaces: Vec<SurfaceId>,
    next_surface: u64,
    next_seq: u64,
    next_pp: u32,
    next_capture: u32,
    output_commits: VecDeque<(OutputId, CommitSeq)>,
    layer_commits: VecDeque<LayerCommit>,
    pp_jobs: VecDeque<(PpId, SurfaceId, SurfaceId)>,
    capture_jobs: VecDeque<(CaptureId, SurfaceId)>,
    vblank_requests: Vec<OutputId>,
    capture_caps: CaptureCaps,
    pp_align: i32,
    fail_layer_commit: bool,
    fail_output_commit: bool,
}

impl Default for Inner {
    fn default() -> Inner {
        Inner {
            outputs: Vec::new(),
            layers: Vec::new(),
            surfaces: HashMap::new(),
            destroyed_surfaces: Vec::new(),
            next_surface: 0,
            next_seq: 0,
            next_pp: 0,
            next_capture: 0,
            output_commits: VecDeque::new(),
            layer_commits: VecDeque::new(),
            pp_jobs: VecDeque::new(),
            capture_jobs: VecDeque::new(),
            vblank_requests: Vec::new(),
            capture_caps: CaptureCaps::empty(),
            pp_align: 0,
            fail_layer_commit: false,
            fail_output_commit: false,
        }
    }
}

#[derive(Clone)]
pub struct FakeDevice {
    inner: Arc<Mutex<Inner>>,
}

struct FakeOutput {
    id: OutputId,
    inner: Arc<Mutex<Inner>>,
}

struct FakeLayer {
    id: LayerId,
    inner: Arc<Mutex<Inner>>,
}

struct FakePp {
    id: PpId,
    inner: Arc<Mutex<Inner>>,
    info: Mutex<Option<PpInfo>>,
}

struct FakeCapture {
    id: CaptureId,
    inner: Arc<Mutex<Inner>>,
}

impl FakeDevice {
    /// A mobile-style panel (primary, DSI) plus one external HDMI connector,
    /// initially disconnected.
    pub fn new_dual_output() -> FakeDevice {
        let mut inner = Inner {
            next_surface: 1000,
            capture_caps: CaptureCaps::ONESHOT | CaptureCaps::STREAM,
            pp_align: 16,
            ..Inner::default()
        };
        inner.outputs.push(OutputState {
            id: OutputId(0),
            connector: ConnectorType::DSI,
            primary: true,
            connection: ConnectionStatus::Connected,
            modes: vec![OutputMode {
                size: Size::new(720, 1280),
                refresh: 60_000,
                preferred: true,
            }],
            current_mode: Some(OutputMode {
                size: Size::new(720, 1280),
                refresh: 60_000,
                preferred: true,
            }),
            physical: (68, 121),
            transform: Transform::Normal,
            dpms: Dpms::On,
            displaying: None,
        });
        inner.outputs.push(OutputState {
            id: OutputId(1),
            connector: ConnectorType::HDMIA,
            primary: false,
            connection: ConnectionStatus::Disconnected,
            modes: vec![
                OutputMode {
                    size: Size::new(1920, 1080),
                    refresh: 60_000,
                    preferred: true,
                },
                OutputMode {
                    size: Size::new(1280, 720),
                    refresh: 60_000,
                    preferred: false,
                },
            ],
            current_mode: None,
            physical: (509, 286),
            transform: Transform::Normal,
            dpms: Dpms::On,
            displaying: None,
        });
        let argb = vec![PixelFormat::Argb8888, PixelFormat::Xrgb8888];
        let mut yuv = argb.clone();
        yuv.extend([PixelFormat::Nv12, PixelFormat::Yuv420]);
        inner.layers.extend([
            LayerState {
                id: LayerId(0),
                output: OutputId(0),
                caps: LayerCaps::PRIMARY,
                formats: argb.clone(),
                zpos: 0,
                pending: None,
                displaying: None,
                geometry: None,
                properties: Vec::new(),
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
                geometry: None,
                properties: Vec::new(),
            },
            LayerState {
                id: LayerId(2),
                output: OutputId(0),
                caps: LayerCaps::OVERLAY | LayerCaps::SCALE,
                formats: argb.clone(),
                zpos: 2,
                pending: None,
                displaying: None,
                geometry: None,
                properties: Vec::new(),
            },
            LayerState {
                id: LayerId(10),
                output: OutputId(1),
                caps: LayerCaps::PRIMARY | LayerCaps::SCALE,
                formats: argb,
                zpos: 0,
                pending: None,
                displaying: None,
                geometry: None,
                properties: Vec::new(),
            },
        ]);
        FakeDevice {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn connect(&self, output: OutputId) -> HwEvent {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.outputs.iter_mut().find(|o| o.id == output).unwrap();
        state.connection = ConnectionStatus::Connected;
        HwEvent::OutputStatus {
            output,
            status: ConnectionStatus::Connected,
        }
    }

    pub fn disconnect(&self, output: OutputId) -> HwEvent {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.outputs.iter_mut().find(|o| o.id == output).unwrap();
        state.connection = ConnectionStatus::Disconnected;
        state.current_mode = None;
        HwEvent::OutputStatus {
            output,
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn set_dpms_state(&self, output: OutputId, mode: Dpms) -> HwEvent {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.outputs.iter_mut().find(|o| o.id == output).unwrap();
        state.dpms = mode;
        HwEvent::DpmsChanged { output, mode }
    }

    pub fn set_primary_displaying(&self, output: OutputId, surface: Option<SurfaceId>) {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.outputs.iter_mut().find(|o| o.id == output).unwrap();
        state.displaying = surface;
    }

    pub fn set_capture_caps(&self, caps: CaptureCaps) {
        self.inner.lock().unwrap().capture_caps = caps;
    }

    pub fn set_pp_align(&self, align: i32) {
        self.inner.lock().unwrap().pp_align = align;
    }

    pub fn set_fail_layer_commit(&self, fail: bool) {
        self.inner.lock().unwrap().fail_layer_commit = fail;
    }

    pub fn set_fail_output_commit(&self, fail: bool) {
        self.inner.lock().unwrap().fail_output_commit = fail;
    }

    /// Complete the oldest pending output commit, if any.
    pub fn complete_output_commit(&self, output: OutputId) -> Option<HwEvent> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.output_commits.iter().position(|(o, _)| *o == output)?;
        let (output, seq) = inner.output_commits.remove(pos).unwrap();
        Some(HwEvent::OutputCommitDone { output, seq })
    }

    /// Complete the oldest pending commit of `layer`, moving its committed
    /// surface to "displaying".
    pub fn complete_layer_commit(&self, layer: LayerId) -> Option<HwEvent> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.layer_commits.iter().position(|c| c.layer == layer)?;
        let commit = inner.layer_commits.remove(pos).unwrap();
        if let Some(state) = inner.layers.iter_mut().find(|l| l.id == layer) {
            state.displaying = commit.surface;
        }
        Some(HwEvent::LayerCommitDone {
            layer: commit.layer,
            displayed: commit.surface,
            seq: commit.seq,
        })
    }

    pub fn complete_pp(&self) -> Option<HwEvent> {
        let (pp, src, dst) = self.inner.lock().unwrap().pp_jobs.pop_front()?;
        Some(HwEvent::PpDone { pp, src, dst })
    }

    pub fn complete_capture(&self) -> Option<HwEvent> {
        let (capture, dst) = self.inner.lock().unwrap().capture_jobs.pop_front()?;
        Some(HwEvent::CaptureDone { capture, dst })
    }

    /// Consume one outstanding vblank request for `output` and produce the
    /// matching event.
    pub fn take_vblank(&self, output: OutputId) -> Option<HwEvent> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.vblank_requests.iter().position(|o| *o == output)?;
        inner.vblank_requests.remove(pos);
        Some(HwEvent::Vblank { output })
    }

    pub fn pending_output_commits(&self, output: OutputId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .output_commits
            .iter()
            .filter(|(o, _)| *o == output)
            .count()
    }

    pub fn pending_layer_commits(&self, layer: LayerId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .layer_commits
            .iter()
            .filter(|c| c.layer == layer)
            .count()
    }

    pub fn pending_pp_jobs(&self) -> usize {
        self.inner.lock().unwrap().pp_jobs.len()
    }

    pub fn pending_capture_jobs(&self) -> usize {
        self.inner.lock().unwrap().capture_jobs.len()
    }

    pub fn layer_surface(&self, layer: LayerId) -> Option<SurfaceId> {
        self.inner
            .lock()
            .unwrap()
            .layers
            .iter()
            .find(|l| l.id == layer)
            .and_then(|l| l.displaying)
    }

    pub fn layer_property(&self, layer: LayerId, name: &str) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .layers
            .iter()
            .find(|l| l.id == layer)
            .and_then(|l| {
                l.properties
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| *v)
            })
    }

    pub fn destroyed_surfaces(&self) -> Vec<SurfaceId> {
        self.inner.lock().unwrap().destroyed_surfaces.clone()
    }

    pub fn client_surface(&self, id: u64, size: Size<crate::utils::geometry::Buffer>, format: PixelFormat) -> HwSurface {
        HwSurface {
            id: SurfaceId(id),
            size,
            pitch: size.w as u32 * 4,
            format,
        }
    }
}

impl DisplayDevice for FakeDevice {
    fn outputs(&self) -> Vec<Arc<dyn HwOutput>> {
        let inner = self.inner.lock().unwrap();
        inner
            .outputs
            .iter()
            .map(|o| {
                Arc::new(FakeOutput {
                    id: o.id,
                    inner: self.inner.clone(),
                }) as Arc<dyn HwOutput>
            })
            .collect()
    }

    fn output(&self, id: OutputId) -> Option<Arc<dyn HwOutput>> {
        let inner = self.inner.lock().unwrap();
        inner.outputs.iter().find(|o| o.id == id).map(|o| {
            Arc::new(FakeOutput {
                id: o.id,
                inner: self.inner.clone(),
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
        let mut inner = self.inner.lock().unwrap();
        inner.surfaces.remove(&surface);
        inner.destroyed_surfaces.push(surface);
    }

    fn capture_caps(&self) -> CaptureCaps {
        self.inner.lock().unwrap().capture_caps
    }

    fn create_capture(&self, _output: OutputId) -> Result<Arc<dyn CaptureSource>, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.capture_caps.is_empty() {
            return Err(DeviceError::Busy);
        }
        inner.next_capture += 1;
        Ok(Arc::new(FakeCapture {
            id: CaptureId(inner.next_capture),
            inner: self.inner.clone(),
        }))
    }

    fn create_pp(&self) -> Result<Arc<dyn PostProcessor>, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_pp += 1;
        Ok(Arc::new(FakePp {
            id: PpId(inner.next_pp),
            inner: self.inner.clone(),
            info: Mutex::new(None),
        }))
    }
}

impl FakeOutput {
    fn with_state<R>(&self, f: impl FnOnce(&mut OutputState) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.outputs.iter_mut().find(|o| o.id == self.id).unwrap();
        f(state)
    }
}

impl HwOutput for FakeOutput {
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
            if s.connection == ConnectionStatus::Disconnected {
                return Err(DeviceError::OutputDisconnected(s.id));
            }
            s.current_mode = Some(*mode);
            Ok(())
        })
    }
    fn physical_size(&self) -> (u32, u32) {
        self.with_state(|s| s.physical)
    }
    fn transform(&self) -> Transform {
        self.with_state(|s| s.transform)
    }
    fn dpms(&self) -> Dpms {
        self.with_state(|s| s.dpms)
    }
    fn set_dpms(&self, mode: Dpms) -> Result<(), DeviceError> {
        self.with_state(|s| {
            s.dpms = mode;
            Ok(())
        })
    }
    fn layers(&self) -> Vec<Arc<dyn HwLayer>> {
        let inner = self.inner.lock().unwrap();
        inner
            .layers
            .iter()
            .filter(|l| l.output == self.id)
            .map(|l| {
                Arc::new(FakeLayer {
                    id: l.id,
                    inner: self.inner.clone(),
                }) as Arc<dyn HwLayer>
            })
            .collect()
    }
    fn commit(&self) -> Result<CommitSeq, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_output_commit {
            return Err(DeviceError::CommitFailed("output commit rejected"));
        }
        inner.next_seq += 1;
        let seq = CommitSeq(inner.next_seq);
        let id = self.id;
        inner.output_commits.push_back((id, seq));
        Ok(seq)
    }
    fn request_vblank(&self) -> Result<(), DeviceError> {
        self.inner.lock().unwrap().vblank_requests.push(self.id);
        Ok(())
    }
    fn displaying_surface(&self) -> Option<SurfaceId> {
        self.with_state(|s| s.displaying)
    }
}

impl FakeLayer {
    fn with_state<R>(&self, f: impl FnOnce(&mut LayerState) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.layers.iter_mut().find(|l| l.id == self.id).unwrap();
        f(state)
    }
}

impl HwLayer for FakeLayer {
    fn id(&self) -> LayerId {
        self.id
    }
    fn output(&self) -> OutputId {
        self.with_state(|s| s.output)
    }
    fn caps(&self) -> LayerCaps {
        self.with_state(|s| s.caps)
    }
    fn formats(&self) -> Vec<PixelFormat> {
        self.with_state(|s| s.formats.clone())
    }
    fn zpos(&self) -> i32 {
        self.with_state(|s| s.zpos)
    }
    fn set_geometry(&self, geometry: &LayerGeometry) -> Result<(), DeviceError> {
        self.with_state(|s| {
            s.geometry = Some(*geometry);
            Ok(())
        })
    }
    fn set_surface(&self, surface: Option<SurfaceId>) -> Result<(), DeviceError> {
        self.with_state(|s| {
            s.pending = Some(surface);
            Ok(())
        })
    }
    fn commit(&self) -> Result<CommitSeq, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_layer_commit {
            return Err(DeviceError::CommitFailed("layer commit rejected"));
        }
        inner.next_seq += 1;
        let seq = CommitSeq(inner.next_seq);
        let id = self.id;
        let surface = inner
            .layers
            .iter_mut()
            .find(|l| l.id == id)
            .and_then(|l| l.pending.take())
            .unwrap_or(None);
        inner.layer_commits.push_back(LayerCommit {
            layer: id,
            seq,
            surface,
        });
        Ok(seq)
    }
    fn set_property(&self, name: &str, value: i64) -> Result<(), DeviceError> {
        self.with_state(|s| {
            s.properties.push((name.to_string(), value));
            Ok(())
        })
    }
    fn displaying_surface(&self) -> Option<SurfaceId> {
        self.with_state(|s| s.displaying)
    }
}

impl PostProcessor for FakePp {
    fn id(&self) -> PpId {
        self.id
    }
    fn set_info(&self, info: &PpInfo) -> Result<(), DeviceError> {
        // the converter writes RGB only
        if info.dst_format.is_yuv() {
            return Err(DeviceError::UnsupportedFormat(info.dst_format));
        }
        *self.info.lock().unwrap() = Some(*info);
        Ok(())
    }
    fn convert(&self, src: SurfaceId, dst: SurfaceId) -> Result<(), DeviceError> {
        self.inner
            .lock()
            .unwrap()
            .pp_jobs
            .push_back((self.id, src, dst));
        Ok(())
    }
    fn size_constraints(&self) -> PpSizeConstraints {
        let align = self.inner.lock().unwrap().pp_align;
        PpSizeConstraints {
            min: Size::new(16, 16),
            max: Size::new(4096, 4096),
            align,
        }
    }
}

impl CaptureSource for FakeCapture {
    fn id(&self) -> CaptureId {
        self.id
    }
    fn set_info(&self, _info: &CaptureInfo) -> Result<(), DeviceError> {
        Ok(())
    }
    fn oneshot(&self, dst: SurfaceId) -> Result<(), DeviceError> {
        self.inner
            .lock()
            .unwrap()
            .capture_jobs
            .push_back((self.id, dst));
        Ok(())
    }
    fn attach(&self, dst: SurfaceId) -> Result<(), DeviceError> {
        self.inner
            .lock()
            .unwrap()
            .capture_jobs
            .push_back((self.id, dst));
        Ok(())
    }
    fn start_stream(&self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn stop(&self) {
        self.inner.lock().unwrap().capture_jobs.clear();
    }
}
