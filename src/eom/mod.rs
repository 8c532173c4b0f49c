// SPDX-License-Identifier: GPL-3.0-only

//! External-output management.
//!
//! Every connector beyond the primary panel gets an [`EomOutput`] at device
//! discovery; hot-plug only flips its state. An output either mirrors the
//! primary screen or presents a client's dedicated window; ownership of the
//! presentation slot follows a strict attribute priority.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::backend::buffer::BufferRegistry;
use crate::backend::{
    best_mode, ConnectionStatus, DisplayDevice, Dpms, HwOutput, HwSurface, LayerCaps,
    LayerGeometry, OutputId, PpId, SurfaceId,
};
use crate::shell::{ShellProxy, WindowHandle};
use crate::utils::event::{ScheduledEvent, Scheduler, TimerToken};
use crate::utils::geometry::{Physical, Rectangle, Size, Transform};
use crate::wayland::protocols::eom::{
    EomAttribute, EomAttributeState, EomError, EomEvent, EomHandler, EomMode, EomRequest,
    OutputInfo,
};
use crate::wayland::protocols::{ClientId, ClientSink};

pub mod mirror;
pub mod pipeline;

use mirror::MirrorPath;
use pipeline::OutputPipeline;

/// Grace period before an idle wait-presentation output falls back to
/// mirroring.
pub const EOM_DELAY_CHECK_TIMEOUT: Duration = Duration::from_secs(4);

/// The attribute priority lattice: may `requested` displace `held`?
fn attribute_allowed(held: EomAttribute, requested: EomAttribute) -> bool {
    use EomAttribute::*;
    match held {
        None => true,
        Normal => matches!(requested, Normal | ExclusiveShare | Exclusive),
        ExclusiveShare => matches!(requested, ExclusiveShare | Exclusive),
        Exclusive => false,
    }
}

struct EomClient {
    sink: ClientSink<EomEvent>,
}

struct EomOutput {
    id: OutputId,
    hw: Arc<dyn HwOutput>,
    mode: EomMode,
    attribute: EomAttribute,
    attribute_state: EomAttributeState,
    owner: Option<ClientId>,
    window: Option<(ClientId, WindowHandle)>,
    size: Size<Physical>,
    pipeline: Option<OutputPipeline>,
    mirror: Option<MirrorPath>,
    delay_timer: Option<TimerToken>,
}

impl EomOutput {
    fn info(&self) -> OutputInfo {
        OutputInfo {
            output: self.id,
            connector: self.hw.connector_type(),
            mode: self.mode,
            w: self.size.w,
            h: self.size.h,
            phys_w: self.hw.physical_size().0,
            phys_h: self.hw.physical_size().1,
            connection: self.hw.connection(),
            skip: false,
            attribute: self.attribute,
            attribute_state: self.attribute_state,
            error: EomError::None,
        }
    }
}

pub struct EomManager {
    device: Arc<dyn DisplayDevice>,
    registry: BufferRegistry,
    shell: Arc<dyn ShellProxy>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    primary: Arc<dyn HwOutput>,
    outputs: IndexMap<OutputId, EomOutput>,
    clients: IndexMap<ClientId, EomClient>,
}

impl EomManager {
    pub fn new(
        device: Arc<dyn DisplayDevice>,
        registry: BufferRegistry,
        shell: Arc<dyn ShellProxy>,
        scheduler: Arc<dyn Scheduler>,
        delay: Duration,
    ) -> EomManager {
        let all = device.outputs();
        let primary = all
            .iter()
            .find(|output| output.is_primary())
            .cloned()
            .expect("display device has no primary output");
        let mut manager = EomManager {
            device,
            registry,
            shell,
            scheduler,
            delay,
            primary,
            outputs: IndexMap::new(),
            clients: IndexMap::new(),
        };
        for hw in all.into_iter().filter(|output| !output.is_primary()) {
            let id = hw.id();
            info!(output = ?id, connector = ?hw.connector_type(), "Tracking external output");
            manager.outputs.insert(
                id,
                EomOutput {
                    id,
                    hw,
                    mode: EomMode::None,
                    attribute: EomAttribute::None,
                    attribute_state: EomAttributeState::None,
                    owner: None,
                    window: None,
                    size: Size::default(),
                    pipeline: None,
                    mirror: None,
                    delay_timer: None,
                },
            );
            if manager.outputs[&id].hw.connection() == ConnectionStatus::Connected {
                manager.handle_connect(id);
            }
        }
        manager
    }

    fn broadcast(&self, event: EomEvent) {
        for client in self.clients.values() {
            client.sink.emit(event.clone());
        }
    }

    fn emit_to(&self, client: ClientId, event: EomEvent) {
        if let Some(client) = self.clients.get(&client) {
            client.sink.emit(event);
        }
    }

    /// Hot-plug state change reported by the driver.
    pub fn on_output_status(&mut self, output: OutputId, status: ConnectionStatus) {
        if !self.outputs.contains_key(&output) {
            return;
        }
        match status {
            ConnectionStatus::Connected => self.handle_connect(output),
            ConnectionStatus::Disconnected => self.handle_disconnect(output),
        }
    }

    fn handle_connect(&mut self, id: OutputId) {
        let state = self.outputs.get_mut(&id).unwrap();
        if state.pipeline.is_some() {
            return;
        }
        let modes = state.hw.modes();
        let Some(mode) = best_mode(&modes) else {
            warn!(output = ?id, "Connected output reports no modes");
            return;
        };
        if let Err(err) = state.hw.set_mode(&mode) {
            warn!(?err, output = ?id, "Failed to set mode");
            return;
        }
        info!(output = ?id, size = ?mode.size, "External output connected");
        state.size = mode.size;

        let Some(layer) = state
            .hw
            .layers()
            .into_iter()
            .find(|layer| layer.caps().contains(LayerCaps::PRIMARY))
        else {
            warn!(output = ?id, "Output has no primary layer");
            return;
        };
        let _ = layer.set_geometry(&LayerGeometry {
            src: Rectangle::from_size(mode.size.retag()),
            dst: Rectangle::from_size(mode.size),
            transform: Transform::Normal,
        });
        state.pipeline = Some(OutputPipeline::new(state.hw.clone(), layer));

        let has_waiting_client = state.owner.is_some();
        if has_waiting_client {
            self.enter_wait_presentation(id);
        } else {
            self.start_mirror(id);
        }
        let state = self.outputs.get(&id).unwrap();
        self.broadcast(EomEvent::OutputType {
            output: id,
            connector: state.hw.connector_type(),
            connection: ConnectionStatus::Connected,
        });
        self.broadcast(EomEvent::OutputInfo(state.info()));
    }

    fn handle_disconnect(&mut self, id: OutputId) {
        let state = self.outputs.get_mut(&id).unwrap();
        if let Some(token) = state.delay_timer.take() {
            self.scheduler.cancel(token);
        }
        if let Some(mut mirror) = state.mirror.take() {
            mirror.stop();
        }
        if let Some(mut pipeline) = state.pipeline.take() {
            pipeline.clear();
        }
        state.mode = EomMode::None;
        state.attribute = EomAttribute::None;
        state.attribute_state = EomAttributeState::None;
        state.owner = None;
        state.size = Size::default();
        if let Some((_, window)) = state.window.take() {
            self.shell.set_redirected(window, true);
        }
        info!(output = ?id, "External output disconnected");
        let state = self.outputs.get(&id).unwrap();
        self.broadcast(EomEvent::OutputType {
            output: id,
            connector: state.hw.connector_type(),
            connection: ConnectionStatus::Disconnected,
        });
        self.broadcast(EomEvent::OutputInfo(state.info()));
    }

    fn start_mirror(&mut self, id: OutputId) {
        let state = self.outputs.get_mut(&id).unwrap();
        if let Some(token) = state.delay_timer.take() {
            self.scheduler.cancel(token);
        }
        state.mode = EomMode::Mirror;
        match MirrorPath::start(&self.device, &self.registry, self.primary.clone(), state.size)
        {
            Ok(mirror) => state.mirror = Some(mirror),
            Err(err) => {
                // stay in mirror mode without frames rather than going dark
                warn!(?err, output = ?id, "Failed to start mirroring");
            }
        }
        self.broadcast(EomEvent::OutputMode {
            output: id,
            mode: EomMode::Mirror,
        });
    }

    fn enter_wait_presentation(&mut self, id: OutputId) {
        let state = self.outputs.get_mut(&id).unwrap();
        state.mode = EomMode::WaitPresentation;
        if let Some(token) = state.delay_timer.take() {
            self.scheduler.cancel(token);
        }
        state.delay_timer = Some(
            self.scheduler
                .schedule(self.delay, ScheduledEvent::EomPresentationDelay(id)),
        );
        self.broadcast(EomEvent::OutputMode {
            output: id,
            mode: EomMode::WaitPresentation,
        });
    }

    /// The wait-presentation grace period elapsed without a client buffer.
    pub fn on_presentation_delay(&mut self, id: OutputId) {
        let Some(state) = self.outputs.get_mut(&id) else {
            return;
        };
        state.delay_timer = None;
        if state.mode == EomMode::WaitPresentation {
            debug!(output = ?id, "No presentation buffer arrived, mirroring");
            self.start_mirror(id);
        }
    }

    fn set_attribute(&mut self, client: ClientId, id: OutputId, requested: EomAttribute) {
        let Some(state) = self.outputs.get_mut(&id) else {
            self.emit_to(
                client,
                EomEvent::OutputAttribute {
                    output: id,
                    attribute: requested,
                    attribute_state: EomAttributeState::None,
                    error: EomError::NoOutput,
                },
            );
            return;
        };

        if requested == EomAttribute::None {
            let was_owner = state.owner == Some(client);
            if was_owner {
                state.owner = None;
                state.attribute = EomAttribute::None;
                state.attribute_state = EomAttributeState::None;
            }
            self.emit_to(
                client,
                EomEvent::OutputAttribute {
                    output: id,
                    attribute: EomAttribute::None,
                    attribute_state: EomAttributeState::None,
                    error: EomError::None,
                },
            );
            let fallback = {
                let state = self.outputs.get(&id).unwrap();
                was_owner
                    && state.hw.connection() == ConnectionStatus::Connected
                    && state.mode != EomMode::Mirror
            };
            if fallback {
                self.start_mirror(id);
            }
            return;
        }

        let held = state.attribute;
        let is_self = state.owner == Some(client);
        if !is_self && !attribute_allowed(held, requested) {
            self.emit_to(
                client,
                EomEvent::OutputAttribute {
                    output: id,
                    attribute: requested,
                    attribute_state: EomAttributeState::None,
                    error: EomError::OutputOccupied,
                },
            );
            return;
        }

        let previous = state.owner.replace(client);
        state.attribute = requested;
        state.attribute_state = EomAttributeState::Active;
        self.emit_to(
            client,
            EomEvent::OutputAttribute {
                output: id,
                attribute: requested,
                attribute_state: EomAttributeState::Active,
                error: EomError::None,
            },
        );

        if let Some(previous) = previous.filter(|previous| *previous != client) {
            debug!(?previous, new = ?client, output = ?id, "Presentation ownership moved");
            self.emit_to(
                previous,
                EomEvent::OutputAttribute {
                    output: id,
                    attribute: requested,
                    attribute_state: EomAttributeState::Lost,
                    error: EomError::None,
                },
            );
            let state = self.outputs.get_mut(&id).unwrap();
            // unblock the previous client: its buffers are released now,
            // not when the hardware eventually lets go of them
            if let Some(pipeline) = state.pipeline.as_mut() {
                pipeline.clear();
            }
            if let Some((owner, window)) = state.window.take() {
                if owner == previous {
                    self.shell.set_redirected(window, true);
                } else {
                    state.window = Some((owner, window));
                }
            }
            let takeover_while_presenting = state.hw.connection() == ConnectionStatus::Connected
                && state.mode == EomMode::Presentation;
            if takeover_while_presenting {
                self.enter_wait_presentation(id);
            }
        }
    }

    fn set_window(&mut self, client: ClientId, id: OutputId, window: WindowHandle) {
        let error = match self.outputs.get(&id) {
            None => EomError::NoOutput,
            Some(state) if state.hw.connection() == ConnectionStatus::Disconnected => {
                EomError::NoOutput
            }
            Some(state) if state.owner != Some(client) => EomError::OutputOccupied,
            Some(_) => EomError::None,
        };
        if error != EomError::None {
            self.emit_to(client, EomEvent::OutputSetWindow { output: id, error });
            return;
        }
        let state = self.outputs.get_mut(&id).unwrap();
        // the window leaves the primary compositing path and resizes to the
        // external mode
        self.shell.set_redirected(window, false);
        self.shell
            .send_reconfigure(window, state.size.retag());
        state.window = Some((client, window));
        self.emit_to(
            client,
            EomEvent::OutputSetWindow {
                output: id,
                error: EomError::None,
            },
        );
    }

    /// A client committed a buffer on a window attached to an external
    /// output.
    pub fn window_commit(&mut self, client: ClientId, window: WindowHandle, surface: HwSurface) {
        let Some(id) = self
            .outputs
            .values()
            .find(|state| state.window == Some((client, window)))
            .map(|state| state.id)
        else {
            return;
        };
        let entered_presentation = {
            let state = self.outputs.get_mut(&id).unwrap();
            if state.owner != Some(client)
                || state.hw.connection() == ConnectionStatus::Disconnected
            {
                return;
            }
            if let Some(token) = state.delay_timer.take() {
                self.scheduler.cancel(token);
            }
            if state.mode != EomMode::Presentation {
                if let Some(mut mirror) = state.mirror.take() {
                    mirror.stop();
                }
                state.mode = EomMode::Presentation;
                true
            } else {
                false
            }
        };
        if entered_presentation {
            self.broadcast(EomEvent::OutputMode {
                output: id,
                mode: EomMode::Presentation,
            });
        }
        let buffer = self.registry.acquire(surface);
        let state = self.outputs.get_mut(&id).unwrap();
        if let Some(pipeline) = state.pipeline.as_mut() {
            if let Err(err) = pipeline.show(buffer) {
                warn!(?err, output = ?id, "Presentation commit failed, dropping buffer");
            }
        }
    }

    /// Commit completion from the driver for an external output.
    pub fn on_output_commit_done(&mut self, id: OutputId) {
        let Some(state) = self.outputs.get_mut(&id) else {
            return;
        };
        let retired = state
            .pipeline
            .as_mut()
            .and_then(|pipeline| pipeline.on_commit_done());
        if let (Some(retired), Some(mirror)) = (retired, state.mirror.as_mut()) {
            mirror.requeue(&retired);
        }
    }

    /// Mirror conversion completed; returns false if the converter is not
    /// one of ours.
    pub fn on_pp_done(&mut self, pp: PpId, _src: SurfaceId, dst: SurfaceId) -> bool {
        let Some(id) = self
            .outputs
            .values()
            .find(|state| state.mirror.as_ref().map(|m| m.pp_id()) == Some(pp))
            .map(|state| state.id)
        else {
            return false;
        };
        let state = self.outputs.get_mut(&id).unwrap();
        let Some(slot) = state.mirror.as_ref().and_then(|mirror| mirror.slot_for(dst)) else {
            return true;
        };
        if let Some(pipeline) = state.pipeline.as_mut() {
            if let Err(err) = pipeline.show(slot) {
                warn!(?err, output = ?id, "Mirror frame commit failed");
            }
        }
        true
    }

    pub fn on_dpms_changed(&mut self, id: OutputId, mode: Dpms) {
        let Some(state) = self.outputs.get_mut(&id) else {
            return;
        };
        match mode {
            Dpms::On => {
                if let Some(mirror) = state.mirror.as_mut() {
                    mirror.resume();
                }
            }
            _ => {
                if let Some(pipeline) = state.pipeline.as_mut() {
                    pipeline.clear();
                }
            }
        }
    }

    /// Module teardown: every timer cancelled, every buffer dropped.
    pub fn shutdown(&mut self) {
        for state in self.outputs.values_mut() {
            if let Some(token) = state.delay_timer.take() {
                self.scheduler.cancel(token);
            }
            if let Some(mut mirror) = state.mirror.take() {
                mirror.stop();
            }
            if let Some(mut pipeline) = state.pipeline.take() {
                pipeline.clear();
            }
        }
        self.outputs.clear();
        self.clients.clear();
    }

    #[cfg(test)]
    fn output_state(&self, id: OutputId) -> (EomMode, EomAttribute, Option<ClientId>) {
        let state = self.outputs.get(&id).unwrap();
        (state.mode, state.attribute, state.owner)
    }
}

impl EomHandler for EomManager {
    fn eom_bind(&mut self, client: ClientId, sink: ClientSink<EomEvent>) {
        sink.emit(EomEvent::OutputCount {
            count: self.outputs.len() as u32,
        });
        for state in self.outputs.values() {
            sink.emit(EomEvent::OutputInfo(state.info()));
        }
        self.clients.insert(client, EomClient { sink });
    }

    fn eom_unbind(&mut self, client: ClientId) {
        let owned: Vec<OutputId> = self
            .outputs
            .values()
            .filter(|state| state.owner == Some(client))
            .map(|state| state.id)
            .collect();
        for id in owned {
            let fallback = {
                let state = self.outputs.get_mut(&id).unwrap();
                state.owner = None;
                state.attribute = EomAttribute::None;
                state.attribute_state = EomAttributeState::None;
                if let Some((owner, window)) = state.window.take() {
                    if owner == client {
                        self.shell.set_redirected(window, true);
                    } else {
                        state.window = Some((owner, window));
                    }
                }
                state.hw.connection() == ConnectionStatus::Connected
                    && state.delay_timer.is_none()
                    && state.mode != EomMode::Mirror
            };
            if fallback {
                self.start_mirror(id);
            }
        }
        self.clients.shift_remove(&client);
    }

    fn eom_request(&mut self, client: ClientId, request: EomRequest) {
        match request {
            EomRequest::SetAttribute { output, attribute } => {
                self.set_attribute(client, output, attribute);
            }
            EomRequest::SetXdgWindow { output, window }
            | EomRequest::SetShellWindow { output, window } => {
                self.set_window(client, output, window);
            }
            EomRequest::GetOutputInfo { output } => match self.outputs.get(&output) {
                Some(state) => {
                    self.emit_to(client, EomEvent::OutputInfo(state.info()));
                }
                None => {
                    self.emit_to(
                        client,
                        EomEvent::OutputInfo(OutputInfo {
                            output,
                            connector: crate::backend::ConnectorType::Unknown,
                            mode: EomMode::None,
                            w: 0,
                            h: 0,
                            phys_w: 0,
                            phys_h: 0,
                            connection: ConnectionStatus::Disconnected,
                            skip: false,
                            attribute: EomAttribute::None,
                            attribute_state: EomAttributeState::None,
                            error: EomError::NoOutput,
                        }),
                    );
                }
            },
        }
    }
}
