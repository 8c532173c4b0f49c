// SPDX-License-Identifier: GPL-3.0-only

use std::sync::{Arc, Mutex};

use calloop::{LoopHandle, LoopSignal};
use tracing::warn;

use crate::backend::buffer::BufferRegistry;
use crate::backend::layers::LayerDirectory;
use crate::backend::{DisplayDevice, HwEvent, OutputId};
use crate::capture::CaptureManager;
use crate::config::Config;
use crate::eom::EomManager;
use crate::shell::ShellProxy;
use crate::utils::event::{EventQueue, ScheduledEvent, Scheduler};
use crate::video::VideoManager;
use crate::viewport::ViewportEngine;
use crate::wayland::protocols::PrivilegeChecker;

pub struct State {
    pub common: Common,
    pub eom: EomManager,
    pub video: VideoManager,
    pub capture: CaptureManager,
    pub viewports: ViewportEngine,
}

pub struct Common {
    pub config: Config,
    pub device: Arc<dyn DisplayDevice>,
    pub registry: BufferRegistry,
    pub layers: Arc<Mutex<LayerDirectory>>,
    pub shell: Arc<dyn ShellProxy>,
    pub privilege: Arc<dyn PrivilegeChecker>,
    pub scheduler: Arc<dyn Scheduler>,
    pub hw_events: EventQueue<HwEvent>,
    pub primary_output: OutputId,

    pub event_loop_handle: LoopHandle<'static, State>,
    pub event_loop_signal: LoopSignal,
    pub should_stop: bool,
}

impl State {
    pub fn new(
        config: Config,
        device: Arc<dyn DisplayDevice>,
        shell: Arc<dyn ShellProxy>,
        privilege: Arc<dyn PrivilegeChecker>,
        scheduler: Arc<dyn Scheduler>,
        hw_events: EventQueue<HwEvent>,
        event_loop_handle: LoopHandle<'static, State>,
        event_loop_signal: LoopSignal,
    ) -> State {
        let registry = BufferRegistry::new();
        let layers = Arc::new(Mutex::new(LayerDirectory::new()));
        let mut primary_output = OutputId(0);
        {
            let mut directory = layers.lock().unwrap();
            for output in device.outputs() {
                if output.is_primary() {
                    primary_output = output.id();
                }
                directory.register_output(&*output);
            }
        }

        let eom = EomManager::new(
            device.clone(),
            registry.clone(),
            shell.clone(),
            scheduler.clone(),
            config.eom_delay(),
        );
        let video = VideoManager::new(
            device.clone(),
            registry.clone(),
            layers.clone(),
            shell.clone(),
            primary_output,
        );
        let capture = CaptureManager::new(
            device.clone(),
            registry.clone(),
            layers.clone(),
            shell.clone(),
            scheduler.clone(),
            privilege.clone(),
            primary_output,
            config.pace_interval(),
        );

        State {
            common: Common {
                config,
                device,
                registry,
                layers,
                shell,
                privilege,
                scheduler,
                hw_events,
                primary_output,
                event_loop_handle,
                event_loop_signal,
                should_stop: false,
            },
            eom,
            video,
            capture,
            viewports: ViewportEngine::new(),
        }
    }

    /// Drain and route everything the driver reported since the last
    /// dispatch.
    #[profiling::function]
    pub fn dispatch_hw_events(&mut self) {
        for event in self.common.hw_events.drain() {
            self.on_hw_event(event);
        }
    }

    pub fn on_hw_event(&mut self, event: HwEvent) {
        match event {
            HwEvent::OutputStatus { output, status } => {
                self.eom.on_output_status(output, status);
            }
            HwEvent::OutputCommitDone { output, .. } => {
                self.eom.on_output_commit_done(output);
            }
            HwEvent::LayerCommitDone {
                layer, displayed, ..
            } => {
                self.video.on_layer_commit_done(layer, displayed);
            }
            HwEvent::Vblank { output } => {
                self.video.on_vblank(output);
            }
            HwEvent::PpDone { pp, src, dst } => {
                let handled = self.video.on_pp_done(pp, src, dst)
                    || self.eom.on_pp_done(pp, src, dst)
                    || self.capture.on_pp_done(pp, src, dst);
                if !handled {
                    warn!(?pp, "Conversion completion with no owner");
                }
            }
            HwEvent::CaptureDone { capture, dst } => {
                if !self.capture.on_capture_done(capture, dst) {
                    warn!(?capture, "Capture completion with no owner");
                }
            }
            HwEvent::DpmsChanged { output, mode } => {
                self.eom.on_dpms_changed(output, mode);
                self.video.on_dpms_changed(output, mode);
                self.capture.on_dpms_changed(output, mode);
            }
        }
    }

    /// A timer armed through the [`Scheduler`] fired.
    pub fn on_scheduled(&mut self, event: ScheduledEvent) {
        match event {
            ScheduledEvent::EomPresentationDelay(output) => {
                self.eom.on_presentation_delay(output);
            }
            ScheduledEvent::CapturePace(session) => {
                self.capture.on_pace_tick(session);
            }
            ScheduledEvent::CaptureUnblock => {
                self.capture.on_capture_unblock();
            }
        }
    }

    /// Module teardown: flush every pipeline and cancel every timer before
    /// the event loop goes away.
    pub fn shutdown(&mut self) {
        self.eom.shutdown();
        self.capture.shutdown();
    }
}
