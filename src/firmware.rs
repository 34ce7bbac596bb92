// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware flash layout and A/B slot selection.
//!
//! Each component has two slots. A slot is a configuration record followed by the firmware
//! image, and the record is always written after the image it describes.

use crate::{
    bundle::BundleVerifier,
    storage::{self, Card, StorageError},
};
use alloc::vec::Vec;
use log::{info, warn};
use thiserror::Error;
use trusted_os_api::firmware::{
    CONFIG_MAX_LENGTH, Component, ConfigError, ConfigRecord, FirmwareRelease, ProofBundle,
};

/// Block size the flash layout is expressed in.
const LAYOUT_BLOCK_SIZE: u64 = 512;
/// Blocks reserved for the configuration record ahead of the firmware.
const CONFIG_BLOCKS: u64 = CONFIG_MAX_LENGTH as u64 / LAYOUT_BLOCK_SIZE;
/// Distance between the A and B slots, in blocks.
pub const SLOT_STRIDE: u64 = 0x10000;
/// Configuration block of applet slot A.
pub const APPLET_CONFIG: u64 = 2_097_152;
/// Configuration block of secure monitor slot A.
pub const OS_CONFIG: u64 = 0x5000;
/// Largest image a slot can hold, in bytes.
pub const SLOT_CAPACITY: usize = ((SLOT_STRIDE - CONFIG_BLOCKS) * LAYOUT_BLOCK_SIZE) as usize;

/// An error reading or writing firmware slots.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FirmwareError {
    /// The card access failed.
    #[error("{0}")]
    Storage(#[from] StorageError),
    /// The configuration record is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// The image does not fit in a slot.
    #[error("firmware size {0} exceeds slot capacity")]
    TooLarge(u64),
    /// The configuration record points outside its slot.
    #[error("firmware offset {0} outside slot")]
    OffsetMismatch(u64),
    /// Neither slot holds firmware which verifies.
    #[error("no valid {0} firmware")]
    NoValidFirmware(Component),
}

/// One of the two firmware slots of a component.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotId {
    /// The first slot.
    A,
    /// The second slot.
    B,
}

impl SlotId {
    /// Returns the other slot.
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn index(self) -> u64 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// Location of the slots of a component.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    config: u64,
}

impl Layout {
    /// Returns the layout of `component`.
    pub const fn of(component: Component) -> Self {
        match component {
            Component::TrustedOs => Self { config: OS_CONFIG },
            Component::TrustedApplet => Self {
                config: APPLET_CONFIG,
            },
        }
    }

    /// Returns the first block of the configuration record of `slot`.
    pub fn config_lba(&self, slot: SlotId) -> u64 {
        self.config + slot.index() * SLOT_STRIDE
    }

    /// Returns the first block of the firmware image of `slot`.
    pub fn firmware_lba(&self, slot: SlotId) -> u64 {
        self.config_lba(slot) + CONFIG_BLOCKS
    }
}

/// Firmware read from a slot and verified.
#[derive(Debug)]
pub struct SelectedFirmware {
    /// Slot the firmware was read from.
    pub slot: SlotId,
    /// Configuration record of the slot.
    pub record: ConfigRecord,
    /// Verified release manifest.
    pub release: FirmwareRelease,
    /// Firmware image.
    pub image: Vec<u8>,
}

/// Reads the configuration record of `slot`.
pub fn read_config<C: Card + ?Sized>(
    card: &mut C,
    component: Component,
    slot: SlotId,
) -> Result<ConfigRecord, FirmwareError> {
    let layout = Layout::of(component);
    let buf = storage::read_blocks(card, layout.config_lba(slot), CONFIG_BLOCKS)?;
    let record = ConfigRecord::decode(&buf)?;

    if record.offset != layout.firmware_lba(slot) {
        return Err(FirmwareError::OffsetMismatch(record.offset));
    }
    if record.size > SLOT_CAPACITY as u64 {
        return Err(FirmwareError::TooLarge(record.size));
    }

    Ok(record)
}

/// Reads the configuration record and firmware image of `slot`.
pub fn read_slot<C: Card + ?Sized>(
    card: &mut C,
    component: Component,
    slot: SlotId,
) -> Result<(ConfigRecord, Vec<u8>), FirmwareError> {
    let record = read_config(card, component, slot)?;

    let block_size = u64::from(card.info().block_size);
    let blocks = record.size.div_ceil(block_size);
    let mut image = storage::read_blocks(card, record.offset, blocks)?;
    // Bounded by SLOT_CAPACITY.
    image.truncate(record.size as usize);

    Ok((record, image))
}

/// Returns the newest slot of `component` whose firmware verifies, falling back to the other
/// slot.
pub fn select<C: Card + ?Sized>(
    card: &mut C,
    component: Component,
    verifier: &BundleVerifier,
) -> Result<SelectedFirmware, FirmwareError> {
    let mut candidates = Vec::new();
    for slot in [SlotId::A, SlotId::B] {
        match read_slot(card, component, slot) {
            Ok((record, image)) => candidates.push((slot, record, image)),
            Err(FirmwareError::Config(ConfigError::InvalidMagic)) => {}
            Err(e) => warn!("SM {component} slot {slot:?}: {e}"),
        }
    }
    candidates.sort_by(|(_, a, _), (_, b, _)| b.generation.cmp(&a.generation));

    for (slot, mut record, image) in candidates {
        match verifier.verify(&mut record.bundle, component, &image) {
            Ok(release) => {
                info!(
                    "SM {component} {} selected from slot {slot:?}, generation {}",
                    release.git_tag_name, record.generation
                );
                return Ok(SelectedFirmware {
                    slot,
                    record,
                    release,
                    image,
                });
            }
            Err(e) => warn!("SM {component} slot {slot:?} failed verification: {e}"),
        }
    }

    Err(FirmwareError::NoValidFirmware(component))
}

/// Returns the slot the next update of `component` should be written to, which is the one not
/// holding the newest configuration, and the generation it should be written with.
pub fn next_target<C: Card + ?Sized>(card: &mut C, component: Component) -> (SlotId, u64) {
    let newest = [SlotId::A, SlotId::B]
        .into_iter()
        .filter_map(|slot| {
            read_config(card, component, slot)
                .ok()
                .map(|record| (slot, record.generation))
        })
        .max_by_key(|&(_, generation)| generation);

    match newest {
        Some((slot, generation)) => (slot.other(), generation.saturating_add(1)),
        None => (SlotId::A, 1),
    }
}

/// Writes `image` and its configuration record to `slot`, firmware first.
///
/// `progress` is called after every batch of blocks written.
pub fn install<C: Card + ?Sized>(
    card: &mut C,
    component: Component,
    image: &[u8],
    bundle: ProofBundle,
    generation: u64,
    slot: SlotId,
    mut progress: impl FnMut(),
) -> Result<ConfigRecord, FirmwareError> {
    if image.len() > SLOT_CAPACITY {
        return Err(FirmwareError::TooLarge(image.len() as u64));
    }

    let layout = Layout::of(component);
    let record = ConfigRecord {
        offset: layout.firmware_lba(slot),
        size: image.len() as u64,
        signatures: Vec::new(),
        bundle,
        generation,
    };
    let config = record.encode()?;

    info!(
        "SM flashing {component} ({} bytes) to slot {slot:?} at block {}",
        image.len(),
        record.offset
    );
    storage::flash(card, image, record.offset, &mut progress)?;
    storage::flash(card, &config, layout.config_lba(slot), &mut progress)?;
    info!("SM flashed {component} generation {generation}");

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bundle::fixture, platform::test::MemCard};

    const CARD_BLOCKS: u64 = APPLET_CONFIG + 2 * SLOT_STRIDE;

    fn install_release(card: &mut MemCard, image: &[u8], version: &str) -> SlotId {
        let (slot, generation) = next_target(card, Component::TrustedApplet);
        install(
            card,
            Component::TrustedApplet,
            image,
            fixture::bundle(Component::TrustedApplet, version, image),
            generation,
            slot,
            || {},
        )
        .unwrap();
        slot
    }

    #[test]
    fn layout() {
        let applet = Layout::of(Component::TrustedApplet);
        assert_eq!(applet.config_lba(SlotId::A), 2_097_152);
        assert_eq!(applet.firmware_lba(SlotId::A), 2_097_232);
        assert_eq!(applet.config_lba(SlotId::B), 2_162_688);

        let os = Layout::of(Component::TrustedOs);
        assert_eq!(os.config_lba(SlotId::B), 0x15000);
        assert_eq!(os.firmware_lba(SlotId::A), 0x5050);
    }

    #[test]
    fn empty_card() {
        let mut card = MemCard::new(CARD_BLOCKS);
        assert_eq!(
            select(&mut card, Component::TrustedApplet, &fixture::verifier()).err(),
            Some(FirmwareError::NoValidFirmware(Component::TrustedApplet))
        );
        assert_eq!(
            next_target(&mut card, Component::TrustedApplet),
            (SlotId::A, 1)
        );
    }

    #[test]
    fn updates_alternate_slots() {
        let mut card = MemCard::new(CARD_BLOCKS);
        let verifier = fixture::verifier();

        assert_eq!(install_release(&mut card, b"applet v1", "1.0.0"), SlotId::A);
        assert_eq!(install_release(&mut card, b"applet v2", "1.1.0"), SlotId::B);
        assert_eq!(install_release(&mut card, b"applet v3", "1.2.0"), SlotId::A);

        let selected = select(&mut card, Component::TrustedApplet, &verifier).unwrap();
        assert_eq!(selected.slot, SlotId::A);
        assert_eq!(selected.image, b"applet v3");
        assert_eq!(selected.record.generation, 3);
        assert_eq!(selected.release.git_tag_name.to_string(), "1.2.0");
    }

    #[test]
    fn firmware_written_before_config() {
        let mut card = MemCard::new(CARD_BLOCKS);
        let image = vec![0xa5; 100 * 512];
        install(
            &mut card,
            Component::TrustedApplet,
            &image,
            fixture::bundle(Component::TrustedApplet, "1.0.0", &image),
            1,
            SlotId::B,
            || {},
        )
        .unwrap();

        let layout = Layout::of(Component::TrustedApplet);
        let writes = card.writes();
        assert_eq!(writes[0], (layout.firmware_lba(SlotId::B), 64));
        assert_eq!(writes[1], (layout.firmware_lba(SlotId::B) + 64, 36));
        assert_eq!(writes.last().unwrap().0, layout.config_lba(SlotId::B));
    }

    #[test]
    fn interrupted_update_keeps_previous_firmware() {
        let mut card = MemCard::new(CARD_BLOCKS);
        let verifier = fixture::verifier();
        install_release(&mut card, b"applet v1", "1.0.0");

        // Power is lost after the firmware, but before the configuration, is written.
        let image = vec![0x5a; 1000];
        card.fail_writes_after(1);
        assert!(
            install(
                &mut card,
                Component::TrustedApplet,
                &image,
                fixture::bundle(Component::TrustedApplet, "2.0.0", &image),
                2,
                SlotId::B,
                || {},
            )
            .is_err()
        );

        let selected = select(&mut card, Component::TrustedApplet, &verifier).unwrap();
        assert_eq!(selected.slot, SlotId::A);
        assert_eq!(selected.image, b"applet v1");
    }

    #[test]
    fn corrupt_newest_slot_falls_back() {
        let mut card = MemCard::new(CARD_BLOCKS);
        let verifier = fixture::verifier();
        install_release(&mut card, b"applet v1", "1.0.0");
        let slot = install_release(&mut card, b"applet v2", "1.1.0");

        let firmware = Layout::of(Component::TrustedApplet).firmware_lba(slot);
        card.write_blocks(firmware, &[0; 512]).unwrap();

        let selected = select(&mut card, Component::TrustedApplet, &verifier).unwrap();
        assert_eq!(selected.slot, slot.other());
        assert_eq!(selected.image, b"applet v1");
    }

    #[test]
    fn misplaced_offset() {
        let mut card = MemCard::new(CARD_BLOCKS);
        install_release(&mut card, b"applet v1", "1.0.0");

        let layout = Layout::of(Component::TrustedApplet);
        let mut record = read_config(&mut card, Component::TrustedApplet, SlotId::A).unwrap();
        record.offset = layout.firmware_lba(SlotId::B);
        storage::flash(
            &mut card,
            &record.encode().unwrap(),
            layout.config_lba(SlotId::A),
            || {},
        )
        .unwrap();

        assert_eq!(
            read_config(&mut card, Component::TrustedApplet, SlotId::A),
            Err(FirmwareError::OffsetMismatch(layout.firmware_lba(SlotId::B)))
        );
    }

    #[test]
    fn oversized_image() {
        let mut card = MemCard::new(CARD_BLOCKS);
        let image = vec![0; SLOT_CAPACITY + 1];
        assert_eq!(
            install(
                &mut card,
                Component::TrustedApplet,
                &image,
                ProofBundle::default(),
                1,
                SlotId::A,
                || {},
            )
            .err(),
            Some(FirmwareError::TooLarge(SLOT_CAPACITY as u64 + 1))
        );
        assert!(card.writes().is_empty());
    }
}
