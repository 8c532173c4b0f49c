// SPDX-License-Identifier: GPL-3.0-only

//! Screen capture: streaming mirror sessions and one-shot screenshots.
//!
//! Hardware capture objects are preferred; when the device lacks them (or
//! their capacity is exhausted) a manual composition pass walks the layers
//! back-to-front through the converter. While the panel is off, a software
//! timer stands in for vblank so clients keep getting their buffers back at
//! a bounded rate instead of starving.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::backend::buffer::{BufferRef, BufferRegistry};
use crate::backend::layers::LayerDirectory;
use crate::backend::{
    CaptureCaps, CaptureId, CaptureInfo, CaptureSource, DisplayDevice, Dpms, HwSurface, OutputId,
    PixelFormat, PostProcessor, PpId, PpInfo, SurfaceId,
};
use crate::shell::ShellProxy;
use crate::utils::event::{ScheduledEvent, Scheduler, TimerToken};
use crate::utils::geometry::{Buffer as BufferCoords, Rectangle, Transform};
use crate::utils::id_gen;
use crate::viewport::fit_aspect;
use crate::wayland::protocols::screen_mirror::{
    ContentType, MirrorEvent, MirrorRequest, MirrorSessionId, ScreenMirrorHandler,
    ScreenshooterEvent, StretchMode,
};
use crate::wayland::protocols::{ClientId, ClientSink, PrivilegeChecker};

id_gen!(next_session_id);

/// Software pacing period substituting for vblank while the display is off.
pub const DPMS_PACE_INTERVAL: Duration = Duration::from_millis(1000 / 30);

const PRIVILEGE_MIRROR: &str = "screenmirror";
const PRIVILEGE_SCREENSHOT: &str = "screenshot";

struct FallbackJob {
    dst: SurfaceId,
    remaining: usize,
}

struct MirrorSession {
    id: MirrorSessionId,
    client: ClientId,
    sink: ClientSink<MirrorEvent>,
    stretch: StretchMode,
    started: bool,
    capture: Option<Arc<dyn CaptureSource>>,
    fallback_pp: Option<Arc<dyn PostProcessor>>,
    /// Queued by the client, not yet handed to the hardware.
    queue: VecDeque<BufferRef>,
    /// Handed to the hardware, waiting for a fill completion.
    pending: Vec<(SurfaceId, BufferRef)>,
    fallback_jobs: VecDeque<FallbackJob>,
    pace_timer: Option<TimerToken>,
}

struct Screenshot {
    #[allow(dead_code)]
    client: ClientId,
    dst: BufferRef,
    sink: ClientSink<ScreenshooterEvent>,
    capture: Option<Arc<dyn CaptureSource>>,
    fallback_pp: Option<Arc<dyn PostProcessor>>,
    remaining: usize,
}

pub struct CaptureManager {
    device: Arc<dyn DisplayDevice>,
    registry: BufferRegistry,
    layers: Arc<Mutex<LayerDirectory>>,
    shell: Arc<dyn ShellProxy>,
    scheduler: Arc<dyn Scheduler>,
    privilege: Arc<dyn PrivilegeChecker>,
    primary_output: OutputId,
    pace_interval: Duration,
    sessions: IndexMap<MirrorSessionId, MirrorSession>,
    shots: Vec<Screenshot>,
    blocked: bool,
    block_timer: Option<TimerToken>,
}

impl CaptureManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<dyn DisplayDevice>,
        registry: BufferRegistry,
        layers: Arc<Mutex<LayerDirectory>>,
        shell: Arc<dyn ShellProxy>,
        scheduler: Arc<dyn Scheduler>,
        privilege: Arc<dyn PrivilegeChecker>,
        primary_output: OutputId,
        pace_interval: Duration,
    ) -> CaptureManager {
        CaptureManager {
            device,
            registry,
            layers,
            shell,
            scheduler,
            privilege,
            primary_output,
            pace_interval,
            sessions: IndexMap::new(),
            shots: Vec::new(),
            blocked: false,
            block_timer: None,
        }
    }

    fn dpms_off(&self) -> bool {
        self.device
            .output(self.primary_output)
            .map_or(true, |output| output.dpms() != Dpms::On)
    }

    fn capture_rotation(&self) -> Transform {
        let output_angle = self
            .device
            .output(self.primary_output)
            .map(|output| output.transform().degrees())
            .unwrap_or(0);
        let angle = (self.shell.topmost_angle(self.primary_output) + output_angle) % 360;
        Transform::from_degrees(angle)
    }

    fn dst_rect(&self, stretch: StretchMode, dst: &BufferRef) -> Rectangle<BufferCoords> {
        let bounds = Rectangle::from_size(dst.surface().size);
        match stretch {
            StretchMode::Fully => bounds,
            StretchMode::KeepRatio => {
                let src_size = self
                    .device
                    .output(self.primary_output)
                    .and_then(|output| output.current_mode())
                    .map(|mode| mode.size)
                    .unwrap_or(bounds.size.retag());
                fit_aspect(src_size, bounds)
            }
        }
    }

    /// Sources for the manual composition path, bottom-most first. Falls
    /// back to the primary scanout surface when no layer reports content.
    fn composition_sources(&self) -> Vec<SurfaceId> {
        let layers = self.layers.lock().unwrap();
        let mut sources: Vec<SurfaceId> = layers
            .layers_of(self.primary_output)
            .into_iter()
            .filter_map(|layer| layer.displaying_surface())
            .collect();
        if sources.is_empty() {
            if let Some(surface) = self
                .device
                .output(self.primary_output)
                .and_then(|output| output.displaying_surface())
            {
                sources.push(surface);
            }
        }
        sources
    }

    fn submit(&mut self, session_id: MirrorSessionId, buffer: BufferRef) {
        if self.dpms_off() {
            let session = self.sessions.get_mut(&session_id).unwrap();
            session.queue.push_back(buffer);
            if session.pace_timer.is_none() {
                session.pace_timer = Some(
                    self.scheduler
                        .schedule(self.pace_interval, ScheduledEvent::CapturePace(session_id)),
                );
            }
            return;
        }

        let rotation = self.capture_rotation();
        let stretch = self.sessions.get(&session_id).unwrap().stretch;
        let dst_rect = self.dst_rect(stretch, &buffer);
        let session = self.sessions.get_mut(&session_id).unwrap();

        if let Some(capture) = session.capture.clone() {
            let info = CaptureInfo {
                dst: dst_rect,
                dst_format: buffer.surface().format,
                transform: rotation,
            };
            if capture
                .set_info(&info)
                .and_then(|()| capture.attach(buffer.id()))
                .is_ok()
            {
                session.pending.push((buffer.id(), buffer));
                return;
            }
            warn!(session = ?session_id, "Hardware capture rejected buffer, handing it back");
            session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
            return;
        }

        // manual composition: one conversion per populated layer
        let sources = self.composition_sources();
        let session = self.sessions.get_mut(&session_id).unwrap();
        if sources.is_empty() {
            // nothing on screen, skip the frame rather than stall the client
            session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
            return;
        }
        let Some(pp) = session.fallback_pp.clone() else {
            session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
            return;
        };
        let src_size = self
            .device
            .output(self.primary_output)
            .and_then(|output| output.current_mode())
            .map(|mode| mode.size)
            .unwrap_or_else(|| buffer.surface().size.retag());
        let mut issued = 0;
        for source in &sources {
            let info = PpInfo {
                src: Rectangle::from_size(src_size.retag()),
                src_format: PixelFormat::Argb8888,
                dst: dst_rect,
                dst_format: buffer.surface().format,
                transform: rotation,
            };
            if pp
                .set_info(&info)
                .and_then(|()| pp.convert(*source, buffer.id()))
                .is_ok()
            {
                issued += 1;
            }
        }
        let session = self.sessions.get_mut(&session_id).unwrap();
        if issued == 0 {
            session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
            return;
        }
        session.fallback_jobs.push_back(FallbackJob {
            dst: buffer.id(),
            remaining: issued,
        });
        session.pending.push((buffer.id(), buffer));
    }

    /// Hardware capture completion; false if the object is not ours.
    pub fn on_capture_done(&mut self, capture: CaptureId, dst: SurfaceId) -> bool {
        if let Some(session) = self
            .sessions
            .values_mut()
            .find(|session| session.capture.as_ref().map(|c| c.id()) == Some(capture))
        {
            if let Some(position) = session.pending.iter().position(|(id, _)| *id == dst) {
                let (id, buffer) = session.pending.remove(position);
                session.sink.emit(MirrorEvent::Dequeued(id));
                drop(buffer);
            }
            return true;
        }
        if let Some(position) = self
            .shots
            .iter()
            .position(|shot| shot.capture.as_ref().map(|c| c.id()) == Some(capture))
        {
            let shot = self.shots.remove(position);
            shot.sink.emit(ScreenshooterEvent::Done(shot.dst.id()));
            return true;
        }
        false
    }

    /// Converter completion for the composition fallback; false if the
    /// converter is not ours.
    pub fn on_pp_done(&mut self, pp: PpId, _src: SurfaceId, dst: SurfaceId) -> bool {
        if let Some(session) = self
            .sessions
            .values_mut()
            .find(|session| session.fallback_pp.as_ref().map(|p| p.id()) == Some(pp))
        {
            if let Some(job) = session
                .fallback_jobs
                .iter_mut()
                .find(|job| job.dst == dst)
            {
                job.remaining = job.remaining.saturating_sub(1);
                if job.remaining == 0 {
                    session.fallback_jobs.retain(|job| job.dst != dst);
                    if let Some(position) =
                        session.pending.iter().position(|(id, _)| *id == dst)
                    {
                        let (id, buffer) = session.pending.remove(position);
                        session.sink.emit(MirrorEvent::Dequeued(id));
                        drop(buffer);
                    }
                }
            }
            return true;
        }
        if let Some(position) = self
            .shots
            .iter()
            .position(|shot| shot.fallback_pp.as_ref().map(|p| p.id()) == Some(pp))
        {
            let shot = &mut self.shots[position];
            shot.remaining = shot.remaining.saturating_sub(1);
            if shot.remaining == 0 {
                let shot = self.shots.remove(position);
                shot.sink.emit(ScreenshooterEvent::Done(shot.dst.id()));
            }
            return true;
        }
        false
    }

    /// Software vblank substitute while the panel is off: hand back exactly
    /// one buffer per tick.
    pub fn on_pace_tick(&mut self, session_id: MirrorSessionId) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.pace_timer = None;
        if !session.started {
            return;
        }
        if let Some(buffer) = session.queue.pop_front() {
            session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
            drop(buffer);
        }
        if !session.queue.is_empty() {
            session.pace_timer = Some(
                self.scheduler
                    .schedule(self.pace_interval, ScheduledEvent::CapturePace(session_id)),
            );
        }
    }

    pub fn on_dpms_changed(&mut self, output: OutputId, mode: Dpms) {
        if output != self.primary_output {
            return;
        }
        let session_ids: Vec<_> = self.sessions.keys().copied().collect();
        for session_id in session_ids {
            let session = self.sessions.get_mut(&session_id).unwrap();
            if !session.started {
                continue;
            }
            match mode {
                Dpms::On => {
                    if let Some(token) = session.pace_timer.take() {
                        self.scheduler.cancel(token);
                    }
                    let backlog: Vec<BufferRef> = session.queue.drain(..).collect();
                    for buffer in backlog {
                        self.submit(session_id, buffer);
                    }
                }
                _ => {
                    if let Some(capture) = session.capture.as_ref() {
                        capture.stop();
                    }
                    // unfulfilled hardware fills move back to the paced queue
                    let pending: Vec<_> = session.pending.drain(..).collect();
                    for (_, buffer) in pending {
                        session.queue.push_back(buffer);
                    }
                    if !session.queue.is_empty() && session.pace_timer.is_none() {
                        session.pace_timer = Some(self.scheduler.schedule(
                            self.pace_interval,
                            ScheduledEvent::CapturePace(session_id),
                        ));
                    }
                }
            }
        }
    }

    /// Privileged: temporarily block every capture path.
    pub fn block_capture(&mut self, client: ClientId, duration: Duration) {
        if !self.privilege.check_privilege(client, PRIVILEGE_SCREENSHOT) {
            warn!(?client, "Capture block denied");
            return;
        }
        info!(?duration, "Blocking capture");
        self.blocked = true;
        if let Some(token) = self.block_timer.take() {
            self.scheduler.cancel(token);
        }
        self.block_timer = Some(
            self.scheduler
                .schedule(duration, ScheduledEvent::CaptureUnblock),
        );
    }

    pub fn on_capture_unblock(&mut self) {
        self.blocked = false;
        self.block_timer = None;
    }

    /// Session teardown shared by stop, destroy and client disconnect:
    /// every tracked buffer gets its terminal dequeued event, then its
    /// destroy side effects, before the session itself goes.
    fn wind_down(&mut self, session_id: MirrorSessionId, emit_stop: bool) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if let Some(token) = session.pace_timer.take() {
            self.scheduler.cancel(token);
        }
        if let Some(capture) = session.capture.take() {
            capture.stop();
        }
        session.fallback_pp = None;
        session.fallback_jobs.clear();
        let pending: Vec<_> = session.pending.drain(..).collect();
        for (id, buffer) in pending {
            session.sink.emit(MirrorEvent::Dequeued(id));
            drop(buffer);
        }
        let queued: Vec<_> = session.queue.drain(..).collect();
        for buffer in queued {
            session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
            drop(buffer);
        }
        session.started = false;
        if emit_stop {
            session.sink.emit(MirrorEvent::Stop);
        }
    }

    /// The protocol connection died; sessions go away with their side
    /// effects executed first.
    pub fn client_disconnected(&mut self, client: ClientId) {
        let session_ids: Vec<_> = self
            .sessions
            .values()
            .filter(|session| session.client == client)
            .map(|session| session.id)
            .collect();
        for session_id in session_ids {
            self.wind_down(session_id, false);
            self.sessions.shift_remove(&session_id);
        }
        self.shots.retain(|shot| shot.client != client);
    }

    pub fn shutdown(&mut self) {
        let session_ids: Vec<_> = self.sessions.keys().copied().collect();
        for session_id in session_ids {
            self.wind_down(session_id, true);
        }
        self.sessions.clear();
        self.shots.clear();
        if let Some(token) = self.block_timer.take() {
            self.scheduler.cancel(token);
        }
    }
}

impl ScreenMirrorHandler for CaptureManager {
    fn mirror_create(&mut self, client: ClientId, sink: ClientSink<MirrorEvent>) -> MirrorSessionId {
        let id = MirrorSessionId(next_session_id());
        debug!(?id, ?client, "New mirror session");
        // advertise what the frames will contain
        let content = {
            let layers = self.layers.lock().unwrap();
            let video_active = layers
                .layers_of(self.primary_output)
                .iter()
                .any(|layer| {
                    layer.caps().contains(crate::backend::LayerCaps::VIDEO)
                        && !layers.is_usable(layer.id())
                });
            if video_active {
                ContentType::Video
            } else {
                ContentType::None
            }
        };
        sink.emit(MirrorEvent::Content(content));
        self.sessions.insert(
            id,
            MirrorSession {
                id,
                client,
                sink,
                stretch: StretchMode::default(),
                started: false,
                capture: None,
                fallback_pp: None,
                queue: VecDeque::new(),
                pending: Vec::new(),
                fallback_jobs: VecDeque::new(),
                pace_timer: None,
            },
        );
        id
    }

    fn mirror_request(&mut self, session_id: MirrorSessionId, request: MirrorRequest) {
        if !self.sessions.contains_key(&session_id) {
            return;
        }
        match request {
            MirrorRequest::SetStretch(stretch) => {
                self.sessions.get_mut(&session_id).unwrap().stretch = stretch;
            }
            MirrorRequest::Queue(surface) => {
                let buffer = self.registry.acquire(surface);
                let started = self.sessions.get(&session_id).unwrap().started;
                if started {
                    self.submit(session_id, buffer);
                } else {
                    self.sessions
                        .get_mut(&session_id)
                        .unwrap()
                        .queue
                        .push_back(buffer);
                }
            }
            MirrorRequest::Dequeue(surface_id) => {
                let session = self.sessions.get_mut(&session_id).unwrap();
                if let Some(position) = session
                    .queue
                    .iter()
                    .position(|buffer| buffer.id() == surface_id)
                {
                    let buffer = session.queue.remove(position).unwrap();
                    session.sink.emit(MirrorEvent::Dequeued(buffer.id()));
                    drop(buffer);
                }
            }
            MirrorRequest::Start => {
                let client = self.sessions.get(&session_id).unwrap().client;
                if self.blocked || !self.privilege.check_privilege(client, PRIVILEGE_MIRROR) {
                    warn!(?client, "Mirror start denied");
                    self.sessions
                        .get(&session_id)
                        .unwrap()
                        .sink
                        .emit(MirrorEvent::Stop);
                    return;
                }
                let use_hw = self.device.capture_caps().contains(CaptureCaps::STREAM);
                let session = self.sessions.get_mut(&session_id).unwrap();
                if session.started {
                    return;
                }
                session.started = true;
                if use_hw {
                    match self.device.create_capture(self.primary_output) {
                        Ok(capture) => {
                            let _ = capture.start_stream();
                            session.capture = Some(capture);
                        }
                        Err(err) => {
                            warn!(?err, "Hardware capture unavailable, composing manually");
                        }
                    }
                }
                if session.capture.is_none() {
                    match self.device.create_pp() {
                        Ok(pp) => session.fallback_pp = Some(pp),
                        Err(err) => {
                            warn!(?err, "No composition path either, session will pace only");
                        }
                    }
                }
                let backlog: Vec<BufferRef> = {
                    let session = self.sessions.get_mut(&session_id).unwrap();
                    session.queue.drain(..).collect()
                };
                for buffer in backlog {
                    self.submit(session_id, buffer);
                }
            }
            MirrorRequest::Stop => {
                self.wind_down(session_id, true);
            }
        }
    }

    fn mirror_destroy(&mut self, session_id: MirrorSessionId) {
        self.wind_down(session_id, false);
        self.sessions.shift_remove(&session_id);
    }

    fn screenshoot(
        &mut self,
        client: ClientId,
        dst: HwSurface,
        sink: ClientSink<ScreenshooterEvent>,
    ) {
        if self.blocked || !self.privilege.check_privilege(client, PRIVILEGE_SCREENSHOT) {
            warn!(?client, "Screenshot denied");
            sink.emit(ScreenshooterEvent::Done(dst.id));
            return;
        }
        let buffer = self.registry.acquire(dst);
        let rotation = self.capture_rotation();
        let dst_rect = Rectangle::from_size(buffer.surface().size);
        if self.device.capture_caps().contains(CaptureCaps::ONESHOT) {
            if let Ok(capture) = self.device.create_capture(self.primary_output) {
                let info = CaptureInfo {
                    dst: dst_rect,
                    dst_format: buffer.surface().format,
                    transform: rotation,
                };
                if capture
                    .set_info(&info)
                    .and_then(|()| capture.oneshot(buffer.id()))
                    .is_ok()
                {
                    self.shots.push(Screenshot {
                        client,
                        dst: buffer,
                        sink,
                        capture: Some(capture),
                        fallback_pp: None,
                        remaining: 1,
                    });
                    return;
                }
            }
        }
        // one-shot composition fallback
        let sources = self.composition_sources();
        let Ok(pp) = self.device.create_pp() else {
            sink.emit(ScreenshooterEvent::Done(dst.id));
            return;
        };
        let mut issued = 0;
        let src_size = self
            .device
            .output(self.primary_output)
            .and_then(|output| output.current_mode())
            .map(|mode| mode.size)
            .unwrap_or_else(|| buffer.surface().size.retag());
        for source in &sources {
            let info = PpInfo {
                src: Rectangle::from_size(src_size.retag()),
                src_format: PixelFormat::Argb8888,
                dst: dst_rect,
                dst_format: buffer.surface().format,
                transform: rotation,
            };
            if pp
                .set_info(&info)
                .and_then(|()| pp.convert(*source, buffer.id()))
                .is_ok()
            {
                issued += 1;
            }
        }
        if issued == 0 {
            sink.emit(ScreenshooterEvent::Done(dst.id));
            return;
        }
        self.shots.push(Screenshot {
            client,
            dst: buffer,
            sink,
            capture: None,
            fallback_pp: Some(pp),
            remaining: issued,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::testing::FakeDevice;
    use crate::backend::HwSurface;
    use crate::shell::StubShell;
    use crate::utils::event::TestScheduler;
    use crate::utils::geometry::Size;
    use crate::wayland::protocols::AllowAll;

    struct DenyAll;
    impl PrivilegeChecker for DenyAll {
        fn check_privilege(&self, _client: ClientId, _rule: &str) -> bool {
            false
        }
    }

    struct Fixture {
        device: FakeDevice,
        registry: BufferRegistry,
        scheduler: Arc<TestScheduler>,
        manager: CaptureManager,
    }

    fn fixture_with(privilege: Arc<dyn PrivilegeChecker>) -> Fixture {
        let device = FakeDevice::new_dual_output();
        let registry = BufferRegistry::new();
        let scheduler = TestScheduler::new();
        let layers = Arc::new(Mutex::new(LayerDirectory::new()));
        for output in crate::backend::DisplayDevice::outputs(&device) {
            layers.lock().unwrap().register_output(&*output);
        }
        let manager = CaptureManager::new(
            Arc::new(device.clone()),
            registry.clone(),
            layers,
            Arc::new(StubShell::new(Rectangle::new(0, 0, 720, 1280))),
            scheduler.clone(),
            privilege,
            OutputId(0),
            DPMS_PACE_INTERVAL,
        );
        Fixture {
            device,
            registry,
            scheduler,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(AllowAll))
    }

    fn client_buffer(fixture: &Fixture, id: u64) -> HwSurface {
        fixture
            .device
            .client_surface(id, Size::new(1280, 720), PixelFormat::Argb8888)
    }

    fn dequeued_ids(sink: &ClientSink<MirrorEvent>) -> Vec<SurfaceId> {
        sink.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                MirrorEvent::Dequeued(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn hardware_stream_fills_and_dequeues() {
        let mut fixture = fixture();
        let sink = ClientSink::new();
        let session = fixture.manager.mirror_create(ClientId(1), sink.clone());
        fixture.manager.mirror_request(session, MirrorRequest::Start);
        let surface = client_buffer(&fixture, 1);
        fixture
            .manager
            .mirror_request(session, MirrorRequest::Queue(surface));
        assert_eq!(fixture.device.pending_capture_jobs(), 1);

        let done = fixture.device.complete_capture().unwrap();
        if let crate::backend::HwEvent::CaptureDone { capture, dst } = done {
            assert!(fixture.manager.on_capture_done(capture, dst));
        }
        assert_eq!(dequeued_ids(&sink), vec![surface.id]);
    }

    #[test]
    fn dpms_off_paces_dequeues_through_timer() {
        let mut fixture = fixture();
        fixture.device.set_dpms_state(OutputId(0), Dpms::Off);
        let sink = ClientSink::new();
        let session = fixture.manager.mirror_create(ClientId(1), sink.clone());
        fixture.manager.mirror_request(session, MirrorRequest::Start);
        for id in 1..=3 {
            let surface = client_buffer(&fixture, id);
            fixture
                .manager
                .mirror_request(session, MirrorRequest::Queue(surface));
        }
        // nothing reaches the hardware while the panel is off
        assert_eq!(fixture.device.pending_capture_jobs(), 0);
        assert!(dequeued_ids(&sink).is_empty());

        let mut fired = 0;
        while let Some((after, event)) = fixture.scheduler.pop() {
            assert_eq!(after, DPMS_PACE_INTERVAL);
            let ScheduledEvent::CapturePace(id) = event else {
                panic!("unexpected scheduled event");
            };
            fixture.manager.on_pace_tick(id);
            fired += 1;
            assert_eq!(dequeued_ids(&sink).len(), fired);
        }
        assert_eq!(fired, 3, "one paced tick per queued buffer");
        assert_eq!(
            dequeued_ids(&sink),
            vec![SurfaceId(1), SurfaceId(2), SurfaceId(3)]
        );
    }

    #[test]
    fn composition_fallback_without_hardware_capture() {
        let mut fixture = fixture();
        fixture.device.set_capture_caps(CaptureCaps::empty());
        fixture
            .device
            .set_primary_displaying(OutputId(0), Some(SurfaceId(400)));
        let sink = ClientSink::new();
        let session = fixture.manager.mirror_create(ClientId(1), sink.clone());
        fixture.manager.mirror_request(session, MirrorRequest::Start);
        let surface = client_buffer(&fixture, 1);
        fixture
            .manager
            .mirror_request(session, MirrorRequest::Queue(surface));
        assert_eq!(fixture.device.pending_pp_jobs(), 1);

        let done = fixture.device.complete_pp().unwrap();
        if let crate::backend::HwEvent::PpDone { pp, src, dst } = done {
            assert!(fixture.manager.on_pp_done(pp, src, dst));
        }
        assert_eq!(dequeued_ids(&sink), vec![surface.id]);
    }

    #[test]
    fn denied_start_gets_terminal_stop() {
        let mut fixture = fixture_with(Arc::new(DenyAll));
        let sink = ClientSink::new();
        let session = fixture.manager.mirror_create(ClientId(1), sink.clone());
        fixture.manager.mirror_request(session, MirrorRequest::Start);
        assert!(sink
            .snapshot()
            .into_iter()
            .any(|event| matches!(event, MirrorEvent::Stop)));
        assert_eq!(fixture.device.pending_capture_jobs(), 0);
    }

    #[test]
    fn disconnect_hands_back_every_buffer_before_teardown() {
        let mut fixture = fixture();
        fixture.device.set_dpms_state(OutputId(0), Dpms::Off);
        let sink = ClientSink::new();
        let session = fixture.manager.mirror_create(ClientId(1), sink.clone());
        fixture.manager.mirror_request(session, MirrorRequest::Start);
        for id in 1..=2 {
            let surface = client_buffer(&fixture, id);
            fixture
                .manager
                .mirror_request(session, MirrorRequest::Queue(surface));
        }
        fixture.manager.client_disconnected(ClientId(1));
        assert_eq!(dequeued_ids(&sink).len(), 2);
        // buffers are gone from the registry, their side effects ran
        assert!(fixture.registry.is_empty());
        assert!(fixture.scheduler.pending().is_empty(), "timer left armed");
    }

    #[test]
    fn oneshot_screenshot_done_exactly_once() {
        let mut fixture = fixture();
        let sink = ClientSink::new();
        let surface = client_buffer(&fixture, 9);
        fixture
            .manager
            .screenshoot(ClientId(1), surface, sink.clone());
        assert_eq!(fixture.device.pending_capture_jobs(), 1);
        let done = fixture.device.complete_capture().unwrap();
        if let crate::backend::HwEvent::CaptureDone { capture, dst } = done {
            assert!(fixture.manager.on_capture_done(capture, dst));
        }
        assert_eq!(sink.snapshot(), vec![ScreenshooterEvent::Done(surface.id)]);
    }

    #[test]
    fn blocked_capture_denies_until_timeout() {
        let mut fixture = fixture();
        fixture
            .manager
            .block_capture(ClientId(1), Duration::from_secs(5));
        let sink = ClientSink::new();
        let surface = client_buffer(&fixture, 9);
        fixture
            .manager
            .screenshoot(ClientId(2), surface, sink.clone());
        // denied: terminal done without any hardware job
        assert_eq!(fixture.device.pending_capture_jobs(), 0);
        assert_eq!(sink.drain().len(), 1);

        let (_, event) = fixture.scheduler.pop().unwrap();
        assert_eq!(event, ScheduledEvent::CaptureUnblock);
        fixture.manager.on_capture_unblock();
        fixture
            .manager
            .screenshoot(ClientId(2), surface, sink.clone());
        assert_eq!(fixture.device.pending_capture_jobs(), 1);
    }
}
