// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RPMB data frame layout, JESD84-B51 section 6.6.22.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16, U32},
};

/// Size of a data frame in bytes.
pub const FRAME_LENGTH: usize = 512;

/// Number of trailing frame bytes covered by the MAC, from the data field onwards.
pub const MAC_OFFSET: usize = 284;

/// Size of the data field.
pub const DATA_LENGTH: usize = 256;

/// Request and response message types.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    /// Programs the authentication key, once per card.
    AuthenticationKeyProgramming = 1,
    /// Reads the write counter.
    WriteCounterRead = 2,
    /// Authenticated write of one sector.
    AuthenticatedDataWrite = 3,
    /// Authenticated read of one sector.
    AuthenticatedDataRead = 4,
    /// Fetches the result of the previous write.
    ResultRead = 5,
    /// Authenticated device configuration write.
    AuthenticatedDeviceConfigurationWrite = 6,
    /// Authenticated device configuration read.
    AuthenticatedDeviceConfigurationRead = 7,
}

impl FrameType {
    /// Returns whether requests of this type must use reliable write.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::AuthenticationKeyProgramming
                | Self::AuthenticatedDataWrite
                | Self::AuthenticatedDeviceConfigurationWrite
        )
    }
}

/// Operation results.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u16)]
pub enum OperationResult {
    /// Success.
    Ok = 0,
    /// General failure.
    GeneralFailure = 1,
    /// MAC comparison failed.
    AuthenticationFailure = 2,
    /// Write counter comparison failed.
    CounterFailure = 3,
    /// Address out of range.
    AddressFailure = 4,
    /// Write failure.
    WriteFailure = 5,
    /// Read failure.
    ReadFailure = 6,
    /// The authentication key has not been programmed yet.
    AuthenticationKeyNotYetProgrammed = 7,
}

/// A request or response frame.
#[derive(Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DataFrame {
    /// Padding.
    pub stuff_bytes: [u8; 196],
    /// MAC of the trailing [`MAC_OFFSET`] bytes, or the key when programming it.
    pub key_mac: [u8; 32],
    /// Sector data.
    pub data: [u8; DATA_LENGTH],
    /// Random value echoed by the card.
    pub nonce: [u8; 16],
    /// Authenticated write counter.
    pub write_counter: U32<BigEndian>,
    /// Half sector address.
    pub address: U16<BigEndian>,
    /// Number of half sectors transferred.
    pub block_count: U16<BigEndian>,
    /// Operation result.
    pub result: U16<BigEndian>,
    /// Response type.
    pub resp: u8,
    /// Request type.
    pub req: u8,
}

impl DataFrame {
    /// Returns a zeroed request frame of the given type.
    pub fn request(kind: FrameType) -> Self {
        let mut frame = Self::new_zeroed();
        frame.req = kind.into();
        frame
    }

    /// Returns the bytes covered by the frame MAC.
    pub fn mac_input(&self) -> &[u8] {
        &self.as_bytes()[FRAME_LENGTH - MAC_OFFSET..]
    }

    /// Returns the write counter.
    pub fn counter(&self) -> u32 {
        self.write_counter.get()
    }
}
