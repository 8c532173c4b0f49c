// SPDX-License-Identifier: GPL-3.0-only

//! External-output management protocol surface.

use crate::backend::{ConnectionStatus, ConnectorType, OutputId};
use crate::shell::WindowHandle;
use crate::wayland::protocols::{ClientId, ClientSink};

/// Presentation ownership level a client can request on an external output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EomAttribute {
    #[default]
    None,
    Normal,
    ExclusiveShare,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EomAttributeState {
    #[default]
    None,
    Active,
    Inactive,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EomMode {
    #[default]
    None,
    Mirror,
    Presentation,
    WaitPresentation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EomError {
    #[default]
    None,
    NoOutput,
    NoAttribute,
    OutputOccupied,
}

#[derive(Debug, Clone)]
pub enum EomRequest {
    SetAttribute {
        output: OutputId,
        attribute: EomAttribute,
    },
    /// Attach an xdg toplevel to the output.
    SetXdgWindow {
        output: OutputId,
        window: WindowHandle,
    },
    /// Attach a legacy wl_shell surface to the output.
    SetShellWindow {
        output: OutputId,
        window: WindowHandle,
    },
    GetOutputInfo {
        output: OutputId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub output: OutputId,
    pub connector: ConnectorType,
    pub mode: EomMode,
    pub w: i32,
    pub h: i32,
    pub phys_w: u32,
    pub phys_h: u32,
    pub connection: ConnectionStatus,
    /// Outputs hidden from clients (e.g. the mirror source) are skipped.
    pub skip: bool,
    pub attribute: EomAttribute,
    pub attribute_state: EomAttributeState,
    pub error: EomError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EomEvent {
    OutputCount {
        count: u32,
    },
    OutputInfo(OutputInfo),
    OutputType {
        output: OutputId,
        connector: ConnectorType,
        connection: ConnectionStatus,
    },
    OutputMode {
        output: OutputId,
        mode: EomMode,
    },
    OutputAttribute {
        output: OutputId,
        attribute: EomAttribute,
        attribute_state: EomAttributeState,
        error: EomError,
    },
    OutputSetWindow {
        output: OutputId,
        error: EomError,
    },
}

/// Implemented by the external-output manager.
pub trait EomHandler {
    fn eom_bind(&mut self, client: ClientId, sink: ClientSink<EomEvent>);
    fn eom_unbind(&mut self, client: ClientId);
    fn eom_request(&mut self, client: ClientId, request: EomRequest);
}
