// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Ethernet packet handoff between the network controller and the applet.

use crate::context::{AppletMemory, ExecContext, MemoryError};
use alloc::{collections::VecDeque, vec::Vec};
use log::{info, trace};
use thiserror::Error;

/// Maximum number of received frames waiting for the applet.
pub const RX_QUEUE_SIZE: usize = 1000;

/// An error configuring the network.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NetError {
    /// The MAC address is not six colon separated hex bytes.
    #[error("invalid MAC")]
    InvalidMac,
}

/// An Ethernet controller.
pub trait Network {
    /// Returns the receive interrupt number.
    fn irq(&self) -> u32;

    /// Sets the MAC address, enables the receive interrupt and starts the controller.
    fn start(&mut self, mac: [u8; 6]);

    /// Returns the next received frame, if any, acknowledging the receive interrupt once empty.
    fn receive(&mut self) -> Option<Vec<u8>>;

    /// Transmits a frame.
    fn transmit(&mut self, frame: &[u8]);

    /// Returns whether the PHY reports the link up.
    fn link(&self) -> bool;
}

/// Parses a MAC address in `aa:bb:cc:dd:ee:ff` notation.
pub fn parse_mac(mac: &str) -> Result<[u8; 6], NetError> {
    let mut out = [0; 6];
    let mut parts = mac.split([':', '-']);
    for byte in &mut out {
        let part = parts.next().ok_or(NetError::InvalidMac)?;
        if part.len() != 2 {
            return Err(NetError::InvalidMac);
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| NetError::InvalidMac)?;
    }
    if parts.next().is_some() {
        return Err(NetError::InvalidMac);
    }
    Ok(out)
}

/// The network controller and the frames received on behalf of the applet.
pub struct Net<N: Network> {
    device: N,
    rx: VecDeque<Vec<u8>>,
    started: bool,
}

impl<N: Network> Net<N> {
    /// Wraps a stopped controller.
    pub fn new(device: N) -> Self {
        Self {
            device,
            rx: VecDeque::new(),
            started: false,
        }
    }

    /// Returns the controller.
    pub fn device(&self) -> &N {
        &self.device
    }

    /// Returns the controller, mutably.
    pub fn device_mut(&mut self) -> &mut N {
        &mut self.device
    }

    /// Returns whether the controller was started.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Starts the controller with the given MAC address, once.
    pub fn start(&mut self, mac: &str) -> Result<(), NetError> {
        if self.started {
            return Ok(());
        }
        let address = parse_mac(mac)?;
        info!("SM starting network MAC:{mac}");
        self.device.start(address);
        self.started = true;
        Ok(())
    }

    /// Returns the number of frames waiting for the applet.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Moves every frame received by the controller to the queue, dropping frames which do not
    /// fit.
    pub fn drain(&mut self) {
        while let Some(frame) = self.device.receive() {
            if self.rx.len() < RX_QUEUE_SIZE {
                self.rx.push_back(frame);
            } else {
                trace!("RX queue full, dropping frame");
            }
        }
    }

    /// Serves `RX`: copies the oldest frame to the buffer at `r1`, returning its length in `r0`,
    /// or 0 if none is waiting.
    pub fn rx_syscall<M: AppletMemory + ?Sized>(
        &mut self,
        ctx: &mut ExecContext,
        memory: &mut M,
    ) -> Result<(), MemoryError> {
        let mut len = 0;
        if let Some(frame) = self.rx.pop_front() {
            ctx.write_memory(memory, ctx.a1(), &frame)?;
            len = frame.len() as u32;
        }
        ctx.ret(len);
        Ok(())
    }

    /// Serves `TX`: transmits the `r2` bytes at `r1`.
    pub fn tx_syscall<M: AppletMemory + ?Sized>(
        &mut self,
        ctx: &ExecContext,
        memory: &M,
    ) -> Result<(), MemoryError> {
        let frame = ctx.read_memory(memory, ctx.a1(), ctx.a2() as usize)?;
        self.device.transmit(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::MemoryRegion,
        platform::test::{FakeNetwork, SparseMemory},
    };
    use trusted_os_api::syscall::{RX, TX};

    const REGION: MemoryRegion = MemoryRegion::new(0x9000_0000, 0x1000_0000);

    fn ctx(syscall: u32, addr: u32, len: u32) -> ExecContext {
        let mut ctx = ExecContext::new(REGION, REGION.start, false);
        ctx.r[..3].copy_from_slice(&[syscall, addr, len]);
        ctx
    }

    #[test]
    fn mac_parsing() {
        assert_eq!(
            parse_mac("1a:2B:3c:4d:5e:6f"),
            Ok([0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f])
        );
        assert_eq!(parse_mac("1a:2b:3c:4d:5e"), Err(NetError::InvalidMac));
        assert_eq!(parse_mac("1a:2b:3c:4d:5e:6f:70"), Err(NetError::InvalidMac));
        assert_eq!(parse_mac("1a:2b:3c:4d:5e:zz"), Err(NetError::InvalidMac));
        assert_eq!(parse_mac(""), Err(NetError::InvalidMac));
    }

    #[test]
    fn start_once() {
        let mut net = Net::new(FakeNetwork::default());
        assert_eq!(net.start("bad"), Err(NetError::InvalidMac));
        assert!(!net.started());

        net.start("02:00:00:00:00:01").unwrap();
        net.start("02:00:00:00:00:02").unwrap();
        assert_eq!(net.device().mac(), Some([2, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn rx_delivers_oldest_frame() {
        let mut net = Net::new(FakeNetwork::default());
        let mut memory = SparseMemory::default();
        net.device.inject(b"first");
        net.device.inject(b"second");
        net.drain();
        assert_eq!(net.pending(), 2);

        let mut ctx = ctx(RX, 0x9000_1000, 1514);
        net.rx_syscall(&mut ctx, &mut memory).unwrap();
        assert_eq!(ctx.a0(), 5);
        assert_eq!(ctx.read_memory(&memory, 0x9000_1000, 5).unwrap(), b"first");

        net.rx_syscall(&mut ctx, &mut memory).unwrap();
        assert_eq!(ctx.a0(), 6);

        net.rx_syscall(&mut ctx, &mut memory).unwrap();
        assert_eq!(ctx.a0(), 0);
    }

    #[test]
    fn rx_queue_is_bounded() {
        let mut net = Net::new(FakeNetwork::default());
        for i in 0..RX_QUEUE_SIZE + 5 {
            net.device.inject(&(i as u32).to_le_bytes());
        }
        net.drain();
        assert_eq!(net.pending(), RX_QUEUE_SIZE);
        assert_eq!(net.rx.back(), Some(&((RX_QUEUE_SIZE - 1) as u32).to_le_bytes().to_vec()));
    }

    #[test]
    fn out_of_region_buffers() {
        let mut net = Net::new(FakeNetwork::default());
        let mut memory = SparseMemory::default();
        net.device.inject(b"frame");
        net.drain();

        let mut rx = ctx(RX, 0x8000_0000, 1514);
        assert_eq!(
            net.rx_syscall(&mut rx, &mut memory)
                .unwrap_err()
                .to_string(),
            "invalid offset"
        );

        let tx = ctx(TX, 0x9fff_fffe, 4);
        assert!(net.tx_syscall(&tx, &memory).is_err());
        assert!(net.device().transmitted().is_empty());
    }

    #[test]
    fn tx_copies_from_applet() {
        let mut net = Net::new(FakeNetwork::default());
        let mut memory = SparseMemory::default();
        memory.write(0x9000_2000, b"outgoing");

        net.tx_syscall(&ctx(TX, 0x9000_2000, 8), &memory).unwrap();
        assert_eq!(net.device().transmitted(), [b"outgoing".to_vec()]);
    }
}
