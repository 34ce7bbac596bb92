// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Device status report.

use crate::{
    config::{BUILD, REVISION, RUNTIME},
    hab,
    monitor::Monitor,
    net::Network,
    platform::{Platform, Soc},
    rpc::hex,
};
use alloc::string::String;
use log::warn;
use trusted_os_api::status::{NO_STATUS, Status};

impl<P: Platform> Monitor<P> {
    /// Returns the device status, with placeholders for whatever cannot be read.
    pub fn status(&self) -> Status {
        let srk_hash = match hab::srk_hash(&self.soc) {
            Ok(hash) => hex(&hash),
            Err(e) => {
                warn!("SM could not read SRK hash, {e}");
                NO_STATUS.into()
            }
        };

        Status {
            serial: hex(&self.soc.unique_id()),
            hab: self.soc.snvs_available(),
            srk_hash,
            revision: REVISION.into(),
            build: BUILD.into(),
            version: self.config.version.clone(),
            runtime: String::from(RUNTIME),
            link: self.net.device().link(),
            identity_counter: self.identity_counter,
            witness: self.witness.clone(),
        }
    }
}
