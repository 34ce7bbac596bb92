// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Operator control interface.
//!
//! Commands travel over vendor specific U2F HID commands; the framing belongs to the USB stack and
//! only the command codes and message bodies are defined here.

use alloc::{string::String, vec::Vec};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// USB vendor ID (pid.codes).
pub const VENDOR_ID: u16 = 0x1209;
/// USB product ID.
pub const PRODUCT_ID: u16 = 0x2702;
/// Maximum message size of a U2F HID transaction.
pub const MAX_MESSAGE_SIZE: usize = 7609;

/// A control interface command, numbered from the first U2F HID vendor command.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlCommand {
    /// Returns the JSON encoded [`Status`](crate::status::Status).
    Status = 0xc0,
    /// Pushes a JSON encoded [`Configuration`](crate::rpc::Configuration).
    Config = 0xc1,
    /// Pushes a JSON encoded [`FirmwareUpdate`](crate::rpc::FirmwareUpdate) for the applet.
    AppletUpdate = 0xc2,
    /// Pushes a JSON encoded [`FirmwareUpdate`](crate::rpc::FirmwareUpdate) for the monitor.
    OsUpdate = 0xc3,
    /// Activates secure boot with the SRK hash carried as the raw message body.
    Hab = 0xc4,
    /// Returns the monitor log.
    ConsoleLog = 0xc5,
    /// Returns the console output captured when the applet last exited.
    CrashLog = 0xc6,
}

/// The response to any control command.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ControlResponse {
    /// Error message, if the command failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Command specific payload.
    #[serde(default, with = "crate::base64_bytes")]
    pub payload: Vec<u8>,
}

impl ControlResponse {
    /// A successful response carrying `payload`.
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            error: None,
            payload,
        }
    }

    /// A failed response.
    pub fn error(message: String) -> Self {
        Self {
            error: Some(message),
            payload: Vec::new(),
        }
    }

    /// Encodes the response for the transport, truncating the payload so the message fits in
    /// [`MAX_MESSAGE_SIZE`].
    pub fn encode(mut self) -> Vec<u8> {
        loop {
            // Serialising plain strings and bytes cannot fail.
            let encoded = serde_json::to_vec(&self).unwrap_or_default();
            if encoded.len() <= MAX_MESSAGE_SIZE || self.payload.is_empty() {
                return encoded;
            }
            let excess = encoded.len() - MAX_MESSAGE_SIZE;
            // Base64 expands by 4/3, so dropping this many raw bytes from the front is enough.
            let drop = (excess * 3).div_ceil(4) + 3;
            self.payload.drain(..drop.min(self.payload.len()));
        }
    }

    /// Decodes a response received from the device.
    pub fn decode(buf: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(buf)
    }
}
