// SPDX-License-Identifier: GPL-3.0-only

//! Boundary to the display hardware driver.
//!
//! The driver is opaque: it enumerates outputs and their layers, accepts
//! commits and post-processing/capture jobs, and reports completions
//! asynchronously as [`HwEvent`]s on the main event loop. Nothing in here
//! blocks; every commit is fire-and-forget with its completion delivered
//! through the event queue.

use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::utils::geometry::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform};

pub mod buffer;
pub mod headless;
pub mod layers;
#[cfg(test)]
pub mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u32);

/// Identity of one underlying hardware surface (dmabuf/native buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PpId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitSeq(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Argb8888,
    Xrgb8888,
    Rgb565,
    Nv12,
    Nv21,
    Yuv420,
    Yvu420,
    Yuyv,
    Uyvy,
}

impl PixelFormat {
    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            PixelFormat::Nv12
                | PixelFormat::Nv21
                | PixelFormat::Yuv420
                | PixelFormat::Yvu420
                | PixelFormat::Yuyv
                | PixelFormat::Uyvy
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorType {
    Unknown,
    VGA,
    LVDS,
    HDMIA,
    HDMIB,
    DisplayPort,
    EDP,
    DSI,
    DPI,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dpms {
    On,
    Standby,
    Suspend,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub size: Size<Physical>,
    /// Refresh rate in mHz.
    pub refresh: u32,
    pub preferred: bool,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LayerCaps: u32 {
        const PRIMARY = 1 << 0;
        const OVERLAY = 1 << 1;
        const VIDEO = 1 << 2;
        const CURSOR = 1 << 3;
        const SCALE = 1 << 4;
        const TRANSFORM = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CaptureCaps: u32 {
        const ONESHOT = 1 << 0;
        const STREAM = 1 << 1;
    }
}

/// Descriptor of a hardware surface. The driver owns the storage; everything
/// above deals in descriptors and ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwSurface {
    pub id: SurfaceId,
    pub size: Size<BufferCoords>,
    pub pitch: u32,
    pub format: PixelFormat,
}

/// Source crop, destination placement and rotation of a layer, all in the
/// output's physical coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGeometry {
    pub src: Rectangle<BufferCoords>,
    pub dst: Rectangle<Physical>,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpInfo {
    pub src: Rectangle<BufferCoords>,
    pub src_format: PixelFormat,
    pub dst: Rectangle<BufferCoords>,
    pub dst_format: PixelFormat,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpSizeConstraints {
    pub min: Size<BufferCoords>,
    pub max: Size<BufferCoords>,
    /// Required width alignment in pixels, 0 if the driver reports none.
    pub align: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub dst: Rectangle<BufferCoords>,
    pub dst_format: PixelFormat,
    pub transform: Transform,
}

/// Completions and hot-plug notifications from the driver, drained on the
/// event loop thread between dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwEvent {
    OutputStatus {
        output: OutputId,
        status: ConnectionStatus,
    },
    OutputCommitDone {
        output: OutputId,
        seq: CommitSeq,
    },
    LayerCommitDone {
        layer: LayerId,
        displayed: Option<SurfaceId>,
        seq: CommitSeq,
    },
    Vblank {
        output: OutputId,
    },
    PpDone {
        pp: PpId,
        src: SurfaceId,
        dst: SurfaceId,
    },
    CaptureDone {
        capture: CaptureId,
        dst: SurfaceId,
    },
    DpmsChanged {
        output: OutputId,
        mode: Dpms,
    },
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("output {0:?} is disconnected")]
    OutputDisconnected(OutputId),
    #[error("hardware resource busy")]
    Busy,
    #[error("format {0:?} not supported")]
    UnsupportedFormat(PixelFormat),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("invalid buffer alignment")]
    InvalidAlign,
    #[error("buffer allocation failed")]
    AllocationFailed,
    #[error("commit failed: {0}")]
    CommitFailed(&'static str),
}

pub trait DisplayDevice: Send + Sync {
    fn outputs(&self) -> Vec<Arc<dyn HwOutput>>;
    fn output(&self, id: OutputId) -> Option<Arc<dyn HwOutput>>;
    fn allocate_surface(
        &self,
        size: Size<BufferCoords>,
        format: PixelFormat,
    ) -> Result<HwSurface, DeviceError>;
    fn destroy_surface(&self, surface: SurfaceId);
    fn capture_caps(&self) -> CaptureCaps;
    fn create_capture(&self, output: OutputId) -> Result<Arc<dyn CaptureSource>, DeviceError>;
    fn create_pp(&self) -> Result<Arc<dyn PostProcessor>, DeviceError>;
}

pub trait HwOutput: Send + Sync {
    fn id(&self) -> OutputId;
    fn connector_type(&self) -> ConnectorType;
    fn is_primary(&self) -> bool;
    fn connection(&self) -> ConnectionStatus;
    fn modes(&self) -> Vec<OutputMode>;
    fn current_mode(&self) -> Option<OutputMode>;
    fn set_mode(&self, mode: &OutputMode) -> Result<(), DeviceError>;
    /// Physical dimensions in millimeters.
    fn physical_size(&self) -> (u32, u32);
    /// Fixed panel rotation of this output.
    fn transform(&self) -> Transform;
    fn dpms(&self) -> Dpms;
    fn set_dpms(&self, mode: Dpms) -> Result<(), DeviceError>;
    fn layers(&self) -> Vec<Arc<dyn HwLayer>>;
    /// Commit pending layer state. Completion arrives as
    /// [`HwEvent::OutputCommitDone`].
    fn commit(&self) -> Result<CommitSeq, DeviceError>;
    fn request_vblank(&self) -> Result<(), DeviceError>;
    /// Surface currently scanned out on the primary plane, if any.
    fn displaying_surface(&self) -> Option<SurfaceId>;
}

pub trait HwLayer: Send + Sync {
    fn id(&self) -> LayerId;
    fn output(&self) -> OutputId;
    fn caps(&self) -> LayerCaps;
    fn formats(&self) -> Vec<PixelFormat>;
    fn zpos(&self) -> i32;
    fn set_geometry(&self, geometry: &LayerGeometry) -> Result<(), DeviceError>;
    fn set_surface(&self, surface: Option<SurfaceId>) -> Result<(), DeviceError>;
    /// Commit this layer's pending state. Completion arrives as
    /// [`HwEvent::LayerCommitDone`] carrying the displayed surface.
    fn commit(&self) -> Result<CommitSeq, DeviceError>;
    fn set_property(&self, name: &str, value: i64) -> Result<(), DeviceError>;
    fn displaying_surface(&self) -> Option<SurfaceId>;
}

pub trait PostProcessor: Send + Sync {
    fn id(&self) -> PpId;
    fn set_info(&self, info: &PpInfo) -> Result<(), DeviceError>;
    /// Convert `src` into `dst`. Completion arrives as [`HwEvent::PpDone`].
    fn convert(&self, src: SurfaceId, dst: SurfaceId) -> Result<(), DeviceError>;
    fn size_constraints(&self) -> PpSizeConstraints;
}

pub trait CaptureSource: Send + Sync {
    fn id(&self) -> CaptureId;
    fn set_info(&self, info: &CaptureInfo) -> Result<(), DeviceError>;
    /// Capture a single frame into `dst`, then the object is done.
    fn oneshot(&self, dst: SurfaceId) -> Result<(), DeviceError>;
    /// Queue `dst` to be filled by the running stream.
    fn attach(&self, dst: SurfaceId) -> Result<(), DeviceError>;
    fn start_stream(&self) -> Result<(), DeviceError>;
    fn stop(&self);
}

/// Pick the mode with the largest area footprint; ties favor the mode
/// enumerated first.
pub fn best_mode(modes: &[OutputMode]) -> Option<OutputMode> {
    let mut best: Option<OutputMode> = None;
    for mode in modes {
        let score = mode.size.w + mode.size.h;
        if best.map_or(true, |b| score > b.size.w + b.size.h) {
            best = Some(*mode);
        }
    }
    best
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn best_mode_maximizes_extent_ties_favor_first() {
        let modes = [
            OutputMode {
                size: Size::new(1280, 720),
                refresh: 60_000,
                preferred: false,
            },
            OutputMode {
                size: Size::new(1920, 1080),
                refresh: 60_000,
                preferred: false,
            },
            OutputMode {
                size: Size::new(1080, 1920),
                refresh: 90_000,
                preferred: true,
            },
        ];
        let best = best_mode(&modes).unwrap();
        assert_eq!(best.size, Size::new(1920, 1080));
        assert_eq!(best.refresh, 60_000);
        assert!(best_mode(&[]).is_none());
    }
}
