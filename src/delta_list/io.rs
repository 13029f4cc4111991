// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{DeltaEntry, DeltaIndex};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Terminates a zone's delta payload on disk, matching the "trailing guard
/// delta list" described in SPEC_FULL.md §4.2.
pub const GUARD_MARKER: u32 = u32::MAX;

pub fn save_zone<W: Write>(index: &DeltaIndex, zone: u32, writer: &mut W) -> Result<()> {
    let first = index.first_list_in_zone(zone);
    let count = index.list_count_in_zone(zone);

    for list in first..first + count {
        let entries = index.entries_in_list(list);
        writer.write_u32::<LittleEndian>(entries.len() as u32)?;

        for entry in entries {
            writer.write_u32::<LittleEndian>(entry.address)?;
            writer.write_u32::<LittleEndian>(entry.value)?;
            writer.write_all(&entry.name.0)?;
        }
    }

    writer.write_u32::<LittleEndian>(GUARD_MARKER)?;

    Ok(())
}

pub fn restore_zone<R: Read>(index: &mut DeltaIndex, zone: u32, reader: &mut R) -> Result<()> {
    let first = index.first_list_in_zone(zone);
    let count = index.list_count_in_zone(zone);

    for list in first..first + count {
        let entry_count = reader.read_u32::<LittleEndian>()?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let address = reader.read_u32::<LittleEndian>()?;
            let value = reader.read_u32::<LittleEndian>()?;

            let mut buf = [0u8; 16];
            reader.read_exact(&mut buf)?;
            let name = Fingerprint::new(buf);

            entries.push(DeltaEntry { address, value, name });
        }

        index.lists_mut()[list as usize] = entries;
    }

    let guard = reader.read_u32::<LittleEndian>()?;
    if guard != GUARD_MARKER {
        return Err(Error::CorruptData(format!(
            "expected guard delta list marker 0x{GUARD_MARKER:08x}, got 0x{guard:08x}",
        )));
    }

    Ok(())
}
