// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RPC calls from the applet to the secure monitor.
//!
//! A call is encoded as JSON, copied into applet memory and submitted with
//! [`Syscall::RpcRequest`](crate::syscall::Syscall::RpcRequest); the reply is fetched with
//! [`Syscall::RpcResponse`](crate::syscall::Syscall::RpcResponse).

use crate::{
    Version,
    firmware::ProofBundle,
    status::{Status, WitnessStatus},
};
use alloc::{string::String, vec::Vec};
use serde::{Deserialize, Serialize};

/// An applet task which the monitor wakes after servicing an interrupt on its behalf.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Handler {
    /// Address of the task to resume.
    pub g: u32,
    /// Address of its parameter block.
    pub p: u32,
}

/// A LED state change.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LedStatus {
    /// LED name, e.g. `blue`.
    pub name: String,
    /// Whether the LED should be lit.
    pub on: bool,
}

/// Raw block write to the storage card.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct WriteBlocks {
    /// First logical block to write.
    pub lba: u64,
    /// Data, padded up to whole blocks by the monitor.
    pub data: Vec<u8>,
}

/// Raw read from the storage card.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Read {
    /// Byte offset, must be block aligned.
    pub offset: u64,
    /// Number of bytes to read.
    pub size: u64,
}

/// Storage media information.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CardInfo {
    /// Block size in bytes.
    pub block_size: u32,
    /// Number of addressable blocks.
    pub blocks: u64,
    /// Whether the card is an eMMC, which is required for RPMB.
    pub mmc: bool,
}

/// An authenticated transfer to or from the applet's replay-protected area.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RpmbTransfer {
    /// Sector within the applet area.
    pub offset: u16,
    /// Data to write, or a buffer sized to the number of bytes to read. At most 256 bytes.
    pub data: Vec<u8>,
}

/// Network configuration for the applet.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Configuration {
    /// Ethernet MAC address, `aa:bb:cc:dd:ee:ff`.
    pub mac: String,
    /// Whether to use DHCP instead of the static addresses below.
    pub dhcp: bool,
    /// Static IP address.
    pub ip: String,
    /// Static netmask.
    pub netmask: String,
    /// Default gateway.
    pub gateway: String,
    /// DNS resolver.
    pub resolver: String,
    /// NTP server.
    pub ntp_server: String,
}

/// One chunk of a firmware update.
///
/// Sequence 0 opens a transfer and carries `total`, the sequence number of the final chunk. The
/// proof bundle may accompany any chunk, the last one received is used.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FirmwareUpdate {
    /// Position of this chunk in the transfer.
    pub sequence: u32,
    /// Sequence number of the final chunk.
    pub total: u32,
    /// Firmware bytes carried by this chunk.
    pub image: Vec<u8>,
    /// Transparency proof for the complete image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofBundle>,
}

/// Versions of the installed firmware.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstalledVersions {
    /// Version of the running secure monitor.
    pub os: Version,
    /// Version of the running applet.
    pub applet: Version,
}

/// An RPC request from the applet.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Returns the monitor status.
    Status,
    /// Stores the applet network configuration, returning the previous one.
    Config(Configuration),
    /// Registers the task to wake after interrupts.
    Register(Handler),
    /// Reports the applet version for rollback protection.
    Version(String),
    /// Changes a LED state.
    Led(LedStatus),
    /// Returns storage media information.
    CardInfo,
    /// Writes raw blocks to storage.
    WriteBlocks(WriteBlocks),
    /// Reads raw bytes from storage.
    Read(Read),
    /// Authenticated write to the applet's replay-protected area.
    WriteRpmb(RpmbTransfer),
    /// Authenticated read from the applet's replay-protected area.
    ReadRpmb(RpmbTransfer),
    /// Derives a hardware unique key from a one block diversifier.
    DeriveKey(Vec<u8>),
    /// Irreversibly activates secure boot with the given SRK hash.
    Hab(Vec<u8>),
    /// Submits a chunk of a secure monitor update.
    InstallOs(FirmwareUpdate),
    /// Submits a chunk of an applet update.
    InstallApplet(FirmwareUpdate),
    /// Returns the installed firmware versions.
    GetInstalledVersions,
    /// Reports the witness status, included in the status report.
    SetWitnessStatus(WitnessStatus),
    /// Resets the device.
    Reboot,
}

/// A successful RPC response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum Response {
    /// The request completed and returns no data.
    Ack,
    /// Monitor status.
    Status(Status),
    /// The configuration in place before the call, if any.
    Config(Option<Configuration>),
    /// Storage media information.
    CardInfo(CardInfo),
    /// Raw data.
    Data(Vec<u8>),
    /// Replay-protected data and the write counter.
    Rpmb {
        /// Data read, empty for writes.
        data: Vec<u8>,
        /// Authenticated write counter after the operation.
        counter: u32,
    },
    /// A derived key.
    Key(Vec<u8>),
    /// Installed firmware versions.
    InstalledVersions(InstalledVersions),
}

/// An encoded request with its correlation id.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Call {
    /// Identifier echoed in the [`Reply`].
    pub id: u64,
    /// The request.
    pub request: Request,
}

/// The outcome of a [`Call`]. Errors are carried as their message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Reply {
    /// Identifier of the call this replies to.
    pub id: u64,
    /// Response or error message.
    pub result: Result<Response, String>,
}

impl Call {
    /// Encodes the call for submission.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a call submitted by the applet.
    pub fn decode(buf: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(buf)
    }
}

impl Reply {
    /// Encodes the reply for the applet.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a reply fetched from the monitor.
    pub fn decode(buf: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(buf)
    }
}
