// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Operator control interface.

use crate::{
    hab,
    logger,
    monitor::{Applet, Monitor},
    platform::Platform,
};
use alloc::{format, string::ToString, vec::Vec};
use log::{error, info};
use trusted_os_api::{
    control::{ControlCommand, ControlResponse},
    firmware::Component,
    rpc::{Configuration, FirmwareUpdate},
};

/// A command received from the operator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlRequest {
    /// Command code, see [`ControlCommand`].
    pub command: u8,
    /// Message body.
    pub payload: Vec<u8>,
}

/// The USB device carrying the control interface.
pub trait ControlTransport {
    /// Returns the USB controller interrupt number.
    fn irq(&self) -> u32;

    /// Services the USB controller, returning the next complete request, if any.
    fn service_interrupts(&mut self) -> Option<ControlRequest>;

    /// Sends the response to the last request.
    fn respond(&mut self, response: &[u8]);
}

impl<P: Platform> Monitor<P> {
    /// Answers every pending control request.
    pub(crate) fn service_control(&mut self, mut applet: Option<&mut Applet>) {
        while let Some(request) = self.control.service_interrupts() {
            let response = self.handle_control(applet.as_deref_mut(), request);
            self.control.respond(&response.encode());
        }
    }

    /// Handles one control request.
    pub fn handle_control(
        &mut self,
        applet: Option<&mut Applet>,
        request: ControlRequest,
    ) -> ControlResponse {
        let Ok(command) = ControlCommand::try_from(request.command) else {
            return ControlResponse::error(format!("unknown command {:#04x}", request.command));
        };
        let payload = &request.payload;

        match command {
            ControlCommand::Status => match serde_json::to_vec(&self.status()) {
                Ok(status) => ControlResponse::ok(status),
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::Config => match serde_json::from_slice::<Configuration>(payload) {
                Ok(config) => {
                    self.applet_config = Some(config);
                    if let Some(applet) = applet {
                        info!("SM received configuration update, restarting applet");
                        applet.ctx.stop();
                    }
                    ControlResponse::ok(Vec::new())
                }
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::AppletUpdate => self.control_update(Component::TrustedApplet, payload),
            ControlCommand::OsUpdate => self.control_update(Component::TrustedOs, payload),
            ControlCommand::Hab => match hab::activate(&mut self.soc, payload) {
                Ok(()) => ControlResponse::ok(Vec::new()),
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::ConsoleLog => ControlResponse::ok(logger::history().into_bytes()),
            ControlCommand::CrashLog => ControlResponse::ok(self.saved_crash_log()),
        }
    }

    fn control_update(&mut self, component: Component, payload: &[u8]) -> ControlResponse {
        let update = match serde_json::from_slice::<FirmwareUpdate>(payload) {
            Ok(update) => update,
            Err(e) => return ControlResponse::error(e.to_string()),
        };
        match self.receive_update(component, update) {
            Ok(()) => ControlResponse::ok(Vec::new()),
            Err(e) => {
                error!("SM {component} update failed, {e}");
                ControlResponse::error(e.to_string())
            }
        }
    }
}
