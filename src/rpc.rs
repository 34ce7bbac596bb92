// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RPC calls from the applet.
//!
//! The applet copies a JSON encoded [`Call`] to its memory and passes it with `SYS_RPC_REQ`. The
//! monitor serves it immediately and keeps the encoded [`Reply`] until the applet fetches it with
//! `SYS_RPC_RES`.

use crate::{
    context::{AppletMemory, ExecContext, MemoryError, MemoryRegion},
    exceptions::SyscallError,
    hab::{self, HabError},
    monitor::{Applet, Monitor},
    ota::UpdateError,
    platform::{Platform, Soc, SocError},
    rollback::{APPLET_USER, APPLET_VERSION},
    rpmb::RpmbError,
    storage::{Card, StorageError},
    task::Led,
};
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use log::{debug, error, info};
use sha2::{Digest, Sha256};
use thiserror::Error;
use trusted_os_api::{
    Version,
    firmware::Component,
    rpc::{Call, Handler, InstalledVersions, Reply, Request, Response},
};

/// Largest call or read accepted from the applet.
pub const MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;

/// An RPC failure, returned to the applet as its message.
#[derive(Debug, Error)]
pub enum RpcError {
    /// An argument is out of range, e.g. a handler outside the applet region.
    #[error("invalid argument")]
    InvalidArgument,
    /// The applet tried to drive a LED reserved to the monitor.
    #[error("LED is secure only")]
    SecureLed,
    /// The key derivation IV is not one AES block.
    #[error("diversifier must be exactly 16 long")]
    InvalidDiversifier,
    /// RPMB access needs rollback protection, which needs SNVS.
    #[error("rollback protection not available")]
    RollbackUnavailable,
    /// The call or requested data exceeds [`MAX_MESSAGE_LENGTH`].
    #[error("message too large")]
    TooLarge,
    /// The call is not a valid [`Call`].
    #[error("invalid request, {0}")]
    Decode(serde_json::Error),
    /// The reply could not be encoded.
    #[error("invalid response, {0}")]
    Encode(serde_json::Error),
    /// A storage operation failed.
    #[error("{0}")]
    Storage(#[from] StorageError),
    /// An RPMB operation failed.
    #[error("{0}")]
    Rpmb(#[from] RpmbError),
    /// The SoC refused the operation.
    #[error("{0}")]
    Soc(#[from] SocError),
    /// Secure boot activation failed.
    #[error("{0}")]
    Hab(#[from] HabError),
    /// A firmware update chunk was refused.
    #[error("{0}")]
    Update(#[from] UpdateError),
}

/// The RPC state of one loaded applet.
pub struct Dispatcher {
    diversifier: [u8; 32],
    region: MemoryRegion,
    reply: Option<Vec<u8>>,
}

impl Dispatcher {
    /// Creates the dispatcher for the applet `image` running in `region`.
    pub fn new(image: &[u8], region: MemoryRegion) -> Self {
        Self {
            diversifier: Sha256::digest(image).into(),
            region,
            reply: None,
        }
    }

    /// Returns the key derivation diversifier, unique to the applet image.
    pub fn diversifier(&self) -> &[u8; 32] {
        &self.diversifier
    }

    /// Checks that both addresses of `handler` lie in the applet region.
    pub fn check_handler(&self, handler: Handler) -> Result<Handler, RpcError> {
        let valid = |addr: u32| addr != 0 && self.region.contains(addr);
        if valid(handler.g) && valid(handler.p) {
            Ok(handler)
        } else {
            Err(RpcError::InvalidArgument)
        }
    }

    /// Encodes `reply` and keeps it for the next `SYS_RPC_RES`, replacing any unfetched one.
    pub fn set_reply(&mut self, reply: &Reply) -> Result<(), RpcError> {
        self.reply = Some(reply.encode().map_err(RpcError::Encode)?);
        Ok(())
    }

    /// Serves `SYS_RPC_RES`: copies the pending reply to the `r2` byte buffer at `r1`, returning
    /// its length in `r0`, or 0 if none is pending.
    ///
    /// A reply which does not fit is kept, so the applet can retry with the returned length.
    pub fn write_reply<M: AppletMemory + ?Sized>(
        &mut self,
        ctx: &mut ExecContext,
        memory: &mut M,
    ) -> Result<(), MemoryError> {
        let Some(reply) = &self.reply else {
            ctx.ret(0);
            return Ok(());
        };

        let len = reply.len();
        if len <= ctx.a2() as usize {
            ctx.write_memory(memory, ctx.a1(), reply)?;
            self.reply = None;
        }
        // Bounded by MAX_MESSAGE_LENGTH.
        ctx.ret(len as u32);
        Ok(())
    }
}

impl<P: Platform> Monitor<P> {
    /// Serves `SYS_RPC_REQ`: decodes the call at `r1`, of `r2` bytes, and serves it.
    pub(crate) fn rpc_request(&mut self, applet: &mut Applet) -> Result<(), SyscallError> {
        let (addr, len) = (applet.ctx.a1(), applet.ctx.a2() as usize);

        let reply = if len > MAX_MESSAGE_LENGTH {
            Reply {
                id: 0,
                result: Err(RpcError::TooLarge.to_string()),
            }
        } else {
            let buf = applet.ctx.read_memory(&self.cpu, addr, len)?;
            match Call::decode(&buf) {
                Ok(call) => Reply {
                    id: call.id,
                    result: self.serve(applet, call.request).map_err(|e| {
                        debug!("SM RPC call {} failed, {e}", call.id);
                        e.to_string()
                    }),
                },
                Err(e) => Reply {
                    id: 0,
                    result: Err(RpcError::Decode(e).to_string()),
                },
            }
        };

        applet.rpc.set_reply(&reply)?;
        Ok(())
    }

    /// Serves one request of `applet`.
    pub fn serve(&mut self, applet: &mut Applet, request: Request) -> Result<Response, RpcError> {
        match request {
            Request::Status => Ok(Response::Status(self.status())),
            Request::Config(config) => {
                let mac = config.mac.clone();
                let previous = self.applet_config.replace(config);
                if previous.is_none()
                    && !self.net.started()
                    && let Err(e) = self.net.start(&mac)
                {
                    error!("SM could not start network, {e}");
                }
                Ok(Response::Config(previous))
            }
            Request::Register(handler) => {
                let handler = applet.rpc.check_handler(handler)?;
                debug!("SM applet handler g:{:#x} p:{:#x}", handler.g, handler.p);
                applet.ctx.set_handler(handler);
                Ok(Response::Ack)
            }
            Request::Version(version) => {
                let version: Version = version.parse().map_err(|_| RpcError::InvalidArgument)?;
                info!("SM applet reported version {version}");
                if let Some(rollback) = &self.rollback
                    && let Err(e) = rollback.check_version(
                        &mut self.card,
                        &mut self.rng,
                        APPLET_VERSION,
                        &version,
                    )
                {
                    error!("SM applet version check failed, {e}");
                    applet.ctx.stop();
                }
                Ok(Response::Ack)
            }
            Request::Led(status) => match Led::from_name(&status.name) {
                Some(Led::Blue) => {
                    self.soc.set_led(Led::Blue, status.on);
                    Ok(Response::Ack)
                }
                Some(Led::White) => Err(RpcError::SecureLed),
                None => Err(RpcError::InvalidArgument),
            },
            Request::CardInfo => Ok(Response::CardInfo(self.card.info())),
            Request::WriteBlocks(write) => {
                self.card.write_blocks(write.lba, &write.data)?;
                Ok(Response::Ack)
            }
            Request::Read(read) => {
                let size = usize::try_from(read.size)
                    .ok()
                    .filter(|&size| size <= MAX_MESSAGE_LENGTH)
                    .ok_or(RpcError::TooLarge)?;
                Ok(Response::Data(self.card.read(read.offset, size)?))
            }
            Request::WriteRpmb(transfer) => {
                let rollback = self.rollback.as_ref().ok_or(RpcError::RollbackUnavailable)?;
                if transfer.offset != 0 {
                    return Err(RpcError::InvalidArgument);
                }
                let counter =
                    rollback
                        .rpmb()
                        .write(&mut self.card, &mut self.rng, APPLET_USER, &transfer.data)?;
                Ok(Response::Rpmb {
                    data: Vec::new(),
                    counter,
                })
            }
            Request::ReadRpmb(transfer) => {
                let rollback = self.rollback.as_ref().ok_or(RpcError::RollbackUnavailable)?;
                if transfer.offset != 0 {
                    return Err(RpcError::InvalidArgument);
                }
                let rpmb = rollback.rpmb();
                let mut data = vec![0; transfer.data.len()];
                rpmb.read(&mut self.card, &mut self.rng, APPLET_USER, &mut data)?;
                let counter = rpmb.counter(&mut self.card, &mut self.rng, true)?;
                Ok(Response::Rpmb { data, counter })
            }
            Request::DeriveKey(iv) => {
                if !self.soc.snvs_available() {
                    return Err(SocError::SnvsUnavailable.into());
                }
                let iv: &[u8; 16] = iv
                    .as_slice()
                    .try_into()
                    .map_err(|_| RpcError::InvalidDiversifier)?;
                Ok(Response::Key(
                    self.soc.derive_key(applet.rpc.diversifier(), iv)?,
                ))
            }
            Request::Hab(srk_hash) => {
                hab::activate(&mut self.soc, &srk_hash)?;
                Ok(Response::Ack)
            }
            Request::InstallOs(update) => {
                self.receive_update(Component::TrustedOs, update)?;
                Ok(Response::Ack)
            }
            Request::InstallApplet(update) => {
                self.receive_update(Component::TrustedApplet, update)?;
                Ok(Response::Ack)
            }
            Request::GetInstalledVersions => Ok(Response::InstalledVersions(InstalledVersions {
                os: self.config.version.parse().unwrap_or_default(),
                applet: applet.release.git_tag_name.clone(),
            })),
            Request::SetWitnessStatus(status) => {
                self.witness = Some(status);
                Ok(Response::Ack)
            }
            Request::Reboot => {
                info!("SM rebooting");
                self.soc.reset()
            }
        }
    }
}

/// Returns `bytes` as upper case hex.
pub(crate) fn hex(bytes: &[u8]) -> String {
    use core::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // Writing to a `String` cannot fail.
        let _ = write!(out, "{b:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bundle::fixture,
        config::MonitorConfig,
        platform::test::{self, RESET_MAGIC, TestPlatform, expect_reset},
    };
    use trusted_os_api::{
        rpc::{Configuration, LedStatus, Read, RpmbTransfer, WriteBlocks},
        status::WitnessStatus,
        syscall::{SYS_RPC_REQ, SYS_RPC_RES},
    };

    const IV: [u8; 16] = [7; 16];

    fn setup() -> (Monitor<TestPlatform>, Applet) {
        let (board, _) = TestPlatform::board();
        let config = MonitorConfig {
            trust: fixture::anchors(),
            ..MonitorConfig::default()
        };
        (Monitor::new(board, config), test::applet(b"applet image"))
    }

    fn error(result: Result<Response, RpcError>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn register_requires_applet_addresses() {
        let (mut monitor, mut applet) = setup();
        for (g, p) in [(0, 0x9000_0100), (0x9000_0100, 0), (0x8000_0000, 0x9000_0100)] {
            assert_eq!(
                error(monitor.serve(&mut applet, Request::Register(Handler { g, p }))),
                "invalid argument"
            );
        }
        assert_eq!(
            error(monitor.serve(
                &mut applet,
                Request::Register(Handler {
                    g: 0x9000_0100,
                    p: 0xa000_0000
                })
            )),
            "invalid argument"
        );
        assert_eq!(applet.ctx.handler(), None);

        let handler = Handler {
            g: 0x9000_0100,
            p: 0x9fff_fff0,
        };
        monitor
            .serve(&mut applet, Request::Register(handler))
            .unwrap();
        assert_eq!(applet.ctx.handler(), Some(handler));
    }

    #[test]
    fn white_led_is_secure() {
        let (mut monitor, mut applet) = setup();
        let led = |name: &str| {
            Request::Led(LedStatus {
                name: name.into(),
                on: true,
            })
        };
        assert_eq!(
            error(monitor.serve(&mut applet, led("white"))),
            "LED is secure only"
        );
        assert_eq!(
            error(monitor.serve(&mut applet, led("red"))),
            "invalid argument"
        );
        monitor.serve(&mut applet, led("Blue")).unwrap();
        assert!(monitor.soc.led(Led::Blue));
        assert!(!monitor.soc.led(Led::White));
    }

    #[test]
    fn derive_key_is_bound_to_applet_image() {
        let (mut monitor, mut applet) = setup();

        assert_eq!(
            error(monitor.serve(&mut applet, Request::DeriveKey(vec![0; 15]))),
            "diversifier must be exactly 16 long"
        );

        let Response::Key(key) = monitor
            .serve(&mut applet, Request::DeriveKey(IV.to_vec()))
            .unwrap()
        else {
            panic!("unexpected response");
        };
        let expected = monitor
            .soc
            .derive_key(&Sha256::digest(b"applet image"), &IV)
            .unwrap();
        assert_eq!(key, expected);

        let mut other = test::applet(b"other applet image");
        let Response::Key(other_key) = monitor
            .serve(&mut other, Request::DeriveKey(IV.to_vec()))
            .unwrap()
        else {
            panic!("unexpected response");
        };
        assert_ne!(key, other_key);

        monitor.soc.set_snvs_available(false);
        assert_eq!(
            error(monitor.serve(&mut applet, Request::DeriveKey(IV.to_vec()))),
            "SNVS not available"
        );
    }

    #[test]
    fn config_returns_previous() {
        let (mut monitor, mut applet) = setup();
        let first = Configuration {
            mac: "02:00:00:00:00:01".into(),
            dhcp: true,
            ..Configuration::default()
        };
        assert_eq!(
            monitor.serve(&mut applet, Request::Config(first.clone())).unwrap(),
            Response::Config(None)
        );
        assert_eq!(monitor.net.device().mac(), Some([2, 0, 0, 0, 0, 1]));

        let second = Configuration {
            mac: "02:00:00:00:00:02".into(),
            ..Configuration::default()
        };
        assert_eq!(
            monitor.serve(&mut applet, Request::Config(second.clone())).unwrap(),
            Response::Config(Some(first))
        );
        assert_eq!(monitor.net.device().mac(), Some([2, 0, 0, 0, 0, 1]));

        let third = Configuration {
            mac: "02:00:00:00:00:03".into(),
            ..Configuration::default()
        };
        assert_eq!(
            monitor.serve(&mut applet, Request::Config(third.clone())).unwrap(),
            Response::Config(Some(second))
        );
        assert_eq!(monitor.applet_config, Some(third));
        assert_eq!(monitor.net.device().mac(), Some([2, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn storage_access() {
        let (mut monitor, mut applet) = setup();
        monitor.boot().unwrap();

        let Response::CardInfo(info) = monitor.serve(&mut applet, Request::CardInfo).unwrap() else {
            panic!("unexpected response");
        };
        assert_eq!(info.block_size, 512);

        monitor
            .serve(
                &mut applet,
                Request::WriteBlocks(WriteBlocks {
                    lba: 100,
                    data: vec![0xab; 512],
                }),
            )
            .unwrap();
        assert_eq!(
            monitor
                .serve(
                    &mut applet,
                    Request::Read(Read {
                        offset: 100 * 512,
                        size: 4
                    })
                )
                .unwrap(),
            Response::Data(vec![0xab; 4])
        );
        assert_eq!(
            error(monitor.serve(
                &mut applet,
                Request::WriteBlocks(WriteBlocks {
                    lba: 100,
                    data: vec![0; 100],
                })
            )),
            StorageError::Unaligned.to_string()
        );
    }

    #[test]
    fn rpmb_user_area() {
        let (mut monitor, mut applet) = setup();
        let transfer = |offset, data: &[u8]| RpmbTransfer {
            offset,
            data: data.to_vec(),
        };
        assert_eq!(
            error(monitor.serve(&mut applet, Request::WriteRpmb(transfer(0, b"x")))),
            "rollback protection not available"
        );

        monitor.boot().unwrap();
        let Response::Rpmb { counter, .. } = monitor
            .serve(&mut applet, Request::WriteRpmb(transfer(0, b"secret")))
            .unwrap()
        else {
            panic!("unexpected response");
        };
        assert_eq!(counter, monitor.card.rpmb_counter());

        assert_eq!(
            monitor
                .serve(&mut applet, Request::ReadRpmb(transfer(0, &[0; 6])))
                .unwrap(),
            Response::Rpmb {
                data: b"secret".to_vec(),
                counter
            }
        );
        assert_eq!(
            error(monitor.serve(&mut applet, Request::ReadRpmb(transfer(1, &[0; 6])))),
            "invalid argument"
        );
        assert_eq!(
            error(monitor.serve(&mut applet, Request::WriteRpmb(transfer(0, &[0; 257])))),
            RpmbError::TransferTooLarge.to_string()
        );
    }

    #[test]
    fn older_applet_version_stops_applet() {
        let (mut monitor, mut applet) = setup();
        monitor.boot().unwrap();

        monitor
            .serve(&mut applet, Request::Version("2.0.0".into()))
            .unwrap();
        assert!(!applet.ctx.stop_requested());

        monitor
            .serve(&mut applet, Request::Version("1.9.9".into()))
            .unwrap();
        assert!(applet.ctx.stop_requested());

        assert_eq!(
            error(monitor.serve(&mut applet, Request::Version("v1".into()))),
            "invalid argument"
        );
    }

    #[test]
    fn installed_versions_and_witness_status() {
        let (mut monitor, mut applet) = setup();
        let Response::InstalledVersions(versions) = monitor
            .serve(&mut applet, Request::GetInstalledVersions)
            .unwrap()
        else {
            panic!("unexpected response");
        };
        assert_eq!(versions.applet, applet.release.git_tag_name);
        assert_eq!(versions.os.to_string(), monitor.config.version);

        let witness = WitnessStatus {
            identity: "witness+1234+AQ".into(),
            ip: "10.0.0.2".into(),
            ..WitnessStatus::default()
        };
        monitor
            .serve(&mut applet, Request::SetWitnessStatus(witness.clone()))
            .unwrap();
        let Response::Status(status) = monitor.serve(&mut applet, Request::Status).unwrap() else {
            panic!("unexpected response");
        };
        assert_eq!(status.witness, Some(witness));
    }

    #[test]
    fn applet_update_chunks_are_sequenced() {
        let (mut monitor, mut applet) = setup();
        let chunk = |sequence| {
            Request::InstallApplet(trusted_os_api::rpc::FirmwareUpdate {
                sequence,
                total: 3,
                image: vec![1; 8],
                proof: None,
            })
        };
        monitor.serve(&mut applet, chunk(0)).unwrap();
        monitor.serve(&mut applet, chunk(1)).unwrap();
        assert_eq!(
            error(monitor.serve(&mut applet, chunk(3))),
            "invalid firmware update sequence"
        );
        assert_eq!(monitor.ota.lock().in_progress(), None);
    }

    #[test]
    fn reboot_resets() {
        let (mut monitor, mut applet) = setup();
        let message = expect_reset(|| {
            let _ = monitor.serve(&mut applet, Request::Reboot);
        });
        assert_eq!(message, RESET_MAGIC);
    }

    fn submit(monitor: &mut Monitor<TestPlatform>, applet: &mut Applet, call: &[u8]) {
        monitor.cpu.memory_mut().write(0x9000_4000, call);
        applet.ctx.r[..3].copy_from_slice(&[SYS_RPC_REQ, 0x9000_4000, call.len() as u32]);
        assert_eq!(monitor.rpc_request(applet).ok(), Some(()));
    }

    fn fetch(monitor: &mut Monitor<TestPlatform>, applet: &mut Applet, cap: u32) -> u32 {
        applet.ctx.r[..3].copy_from_slice(&[SYS_RPC_RES, 0x9000_8000, cap]);
        applet
            .rpc
            .write_reply(&mut applet.ctx, &mut monitor.cpu)
            .unwrap();
        applet.ctx.a0()
    }

    #[test]
    fn call_and_reply_through_applet_memory() {
        let (mut monitor, mut applet) = setup();
        let call = Call {
            id: 42,
            request: Request::Led(LedStatus {
                name: "white".into(),
                on: true,
            }),
        };
        submit(&mut monitor, &mut applet, &call.encode().unwrap());

        // Too small a buffer returns the length and keeps the reply.
        let len = fetch(&mut monitor, &mut applet, 4);
        assert!(len > 4);
        assert_eq!(fetch(&mut monitor, &mut applet, len), len);

        let encoded = monitor.cpu.memory().read_vec(0x9000_8000, len as usize);
        assert_eq!(
            Reply::decode(&encoded).unwrap(),
            Reply {
                id: 42,
                result: Err("LED is secure only".into())
            }
        );
        assert_eq!(fetch(&mut monitor, &mut applet, 4096), 0);
    }

    #[test]
    fn malformed_call() {
        let (mut monitor, mut applet) = setup();
        submit(&mut monitor, &mut applet, br#"{"id":1,"request":{"method":"Shell"}}"#);
        let len = fetch(&mut monitor, &mut applet, 4096);
        let reply =
            Reply::decode(&monitor.cpu.memory().read_vec(0x9000_8000, len as usize)).unwrap();
        assert_eq!(reply.id, 0);
        assert!(reply.result.unwrap_err().starts_with("invalid request"));
    }

    #[test]
    fn call_outside_region_terminates() {
        let (mut monitor, mut applet) = setup();
        applet.ctx.r[..3].copy_from_slice(&[SYS_RPC_REQ, 0x8000_0000, 16]);
        assert!(matches!(
            monitor.rpc_request(&mut applet),
            Err(SyscallError::Memory(_))
        ));
    }

    #[test]
    fn hex_is_upper_case() {
        assert_eq!(hex(&[0x01, 0xab, 0xff]), "01ABFF");
        assert_eq!(hex(&[]), "");
    }
}
