// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Applet ELF loading.

use crate::context::{AppletMemory, MemoryRegion};
use alloc::{string::String, vec, vec::Vec};
use log::{debug, info};
use thiserror::Error;
use xmas_elf::{
    ElfFile,
    header::{Class, Machine},
    program::Type,
    sections::{SectionData, ShType},
    symbol_table::{self, Entry},
};

/// An error loading an applet image.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LoadError {
    /// The image is not a valid ELF file.
    #[error("invalid ELF, {0}")]
    Malformed(&'static str),
    /// The image is not a 32-bit ARM executable.
    #[error("unsupported ELF class or machine")]
    Unsupported,
    /// The image has nothing to load.
    #[error("no loadable segments")]
    Empty,
    /// A segment does not fit in the applet region.
    #[error("segment {addr:#x} ({size} bytes) outside applet region")]
    SegmentOutsideRegion {
        /// Physical load address.
        addr: u64,
        /// Size in memory.
        size: u64,
    },
    /// The entry point is outside the applet region.
    #[error("entry point {0:#x} outside applet region")]
    EntryOutsideRegion(u64),
}

/// A function symbol of the loaded image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Symbol {
    /// Symbol name.
    pub name: String,
    /// First address.
    pub start: u32,
    /// Size in bytes, 0 if unknown.
    pub size: u32,
}

/// An image copied into applet memory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedImage {
    /// Entry point.
    pub entry: u32,
    /// Span of the executable segments.
    pub text: MemoryRegion,
    /// Function symbols sorted by address, empty for stripped images.
    pub symbols: Vec<Symbol>,
}

impl LoadedImage {
    /// Returns the function containing `addr` and the offset of `addr` within it.
    pub fn symbol_at(&self, addr: u32) -> Option<(&str, u32)> {
        let index = self.symbols.partition_point(|symbol| symbol.start <= addr);
        let symbol = self.symbols[..index].last()?;
        let offset = addr - symbol.start;
        if symbol.size == 0 || offset < symbol.size {
            Some((symbol.name.as_str(), offset))
        } else {
            None
        }
    }
}

/// Copies every `PT_LOAD` segment of `elf` to its physical address in `memory`, zero filling
/// the part of each segment not backed by the file.
///
/// Nothing is written unless every segment and the entry point lie within `region`.
pub fn load<M: AppletMemory + ?Sized>(
    elf: &[u8],
    region: MemoryRegion,
    memory: &mut M,
) -> Result<LoadedImage, LoadError> {
    let file = ElfFile::new(elf).map_err(LoadError::Malformed)?;

    if file.header.pt1.class() != Class::ThirtyTwo
        || file.header.pt2.machine().as_machine() != Machine::Arm
    {
        return Err(LoadError::Unsupported);
    }

    let mut segments = Vec::new();
    let mut text: Option<(u64, u64)> = None;

    for header in file.program_iter() {
        if header.get_type() != Ok(Type::Load) {
            continue;
        }

        let addr = header.physical_addr();
        let mem_size = header.mem_size();
        let file_size = header.file_size();
        let offset = header.offset();

        if file_size > mem_size {
            return Err(LoadError::Malformed("segment file size exceeds memory size"));
        }
        if !fits(region, addr, mem_size) {
            return Err(LoadError::SegmentOutsideRegion {
                addr,
                size: mem_size,
            });
        }
        let data = offset
            .checked_add(file_size)
            .and_then(|end| elf.get(usize::try_from(offset).ok()?..usize::try_from(end).ok()?))
            .ok_or(LoadError::Malformed("segment outside file"))?;

        if header.flags().is_execute() {
            let end = addr + mem_size;
            text = Some(match text {
                Some((start, previous_end)) => (start.min(addr), previous_end.max(end)),
                None => (addr, end),
            });
        }

        segments.push((addr, mem_size, data));
    }

    if segments.is_empty() {
        return Err(LoadError::Empty);
    }

    let entry = file.header.pt2.entry_point();
    if !fits(region, entry, 1) {
        return Err(LoadError::EntryOutsideRegion(entry));
    }

    // Every address was checked against the 32-bit region above.
    for (addr, mem_size, data) in segments {
        debug!("loading {mem_size} bytes at {addr:#x}");
        memory.write(addr as u32, data);
        let bss = (mem_size - data.len() as u64) as usize;
        if bss > 0 {
            memory.write(addr as u32 + data.len() as u32, &vec![0; bss]);
        }
    }

    let text = text.map_or(MemoryRegion::new(entry as u32, 0), |(start, end)| {
        MemoryRegion::new(start as u32, (end - start) as u32)
    });
    let symbols = symbols(&file);
    info!(
        "SM loaded applet entry:{entry:#x} text:{:#x}-{:#x} symbols:{}",
        text.start,
        text.end(),
        symbols.len()
    );

    Ok(LoadedImage {
        entry: entry as u32,
        text,
        symbols,
    })
}

fn fits(region: MemoryRegion, addr: u64, size: u64) -> bool {
    addr >= u64::from(region.start)
        && addr
            .checked_add(size)
            .is_some_and(|end| end <= region.end())
}

/// Returns the function symbols of `file`, or none if it has no usable symbol table.
fn symbols(file: &ElfFile) -> Vec<Symbol> {
    let mut symbols = Vec::new();

    for section in file.section_iter() {
        if section.get_type() != Ok(ShType::SymTab) {
            continue;
        }
        let Ok(SectionData::SymbolTable32(entries)) = section.get_data(file) else {
            continue;
        };
        for entry in entries {
            if entry.get_type() != Ok(symbol_table::Type::Func) {
                continue;
            }
            let Ok(name) = entry.get_name(file) else {
                continue;
            };
            symbols.push(Symbol {
                name: name.into(),
                start: entry.value() as u32,
                size: entry.size() as u32,
            });
        }
    }

    symbols.sort_by_key(|symbol| symbol.start);
    symbols
}
