//! Parser for the `resource.map` index files used by SCI-era games.
//!
//! A map file tells the loader, for every (type, number) resource id, which
//! numbered volume file holds its bytes and at what offset. Four historical
//! binary layouts exist and none of them carries a version field, so the
//! layout has to be inferred from structure before the records can be walked.

use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::MmapOptions;
use serde::Serialize;
use thiserror::Error;

use crate::restype::ResourceType;

pub const SCI0_RECORD_SIZE: usize = 6;
pub const SCI1_RECORD_SIZE: usize = 6;
pub const SCI11_RECORD_SIZE: usize = 5;

/// Directory entry size in SCI1+ maps: a type marker byte plus a 16-bit
/// offset into the map file.
const DIRECTORY_SLOT_SIZE: usize = 3;
const DIRECTORY_TERMINATOR: u8 = 0xFF;

/// An all-ones offset field ends an old-format map; maps cut short by a
/// failed install can carry it before the file-size-predicted record count.
const SCI0_SENTINEL: u32 = 0xFFFF_FFFF;

/// Loading a resource map either succeeds completely or fails with one of
/// these. `status_code` gives the numeric code the original interpreter's
/// error table assigned to the same condition.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("resource map file not found: {0}")]
    ResmapNotFound(String),
    #[error("resource map entry is invalid: {0}")]
    InvalidEntry(String),
    #[error("no resource files found: {0}")]
    NoResourceFiles(String),
}

impl MapError {
    pub fn status_code(&self) -> i32 {
        match self {
            MapError::InvalidEntry(_) => 3,
            MapError::ResmapNotFound(_) => 4,
            MapError::NoResourceFiles(_) => 5,
        }
    }
}

/// The four map layouts, distinguished by record width and field packing.
/// `Sci0Alt` is the "odd" SCI01 variant that moves two volume-number bits
/// into the offset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MapFormat {
    Sci0,
    Sci0Alt,
    Sci1,
    Sci11,
}

impl MapFormat {
    pub fn record_size(self) -> usize {
        match self {
            MapFormat::Sci11 => SCI11_RECORD_SIZE,
            _ => SCI0_RECORD_SIZE,
        }
    }

    pub fn is_old(self) -> bool {
        matches!(self, MapFormat::Sci0 | MapFormat::Sci0Alt)
    }

    /// Widest volume number the format's bit layout can express. Anything
    /// above it in a scanned record means the map is corrupt.
    pub fn max_volume(self) -> u8 {
        match self {
            MapFormat::Sci0 => 63,
            MapFormat::Sci0Alt | MapFormat::Sci1 => 15,
            MapFormat::Sci11 => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MapFormat::Sci0 => "SCI0",
            MapFormat::Sci0Alt => "SCI01 (odd)",
            MapFormat::Sci1 => "SCI1",
            MapFormat::Sci11 => "SCI1.1",
        }
    }
}

/// Composite resource id: asset category plus number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceId {
    pub rtype: ResourceType,
    pub number: u16,
}

impl ResourceId {
    pub fn new(rtype: ResourceType, number: u16) -> Self {
        ResourceId { rtype, number }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.rtype.name(), self.number)
    }
}

/// One (volume, byte offset) location for a resource's packed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapSource {
    pub volume: u8,
    pub offset: u32,
}

/// A deduplicated map entry. `sources[0]` is the first location the scan
/// encountered; later duplicates of the same id land behind it as alternate
/// sources, the way patch volumes shadow base-game data.
#[derive(Debug, Clone, Serialize)]
pub struct MapEntry {
    pub id: ResourceId,
    pub sources: Vec<MapSource>,
}

impl MapEntry {
    pub fn primary(&self) -> MapSource {
        self.sources[0]
    }
}

/// The parsed map. `records_read` versus `records_expected` exposes early
/// sentinel stops and trailing partial records in old-format maps; callers
/// that care report it, the parse itself is still a success.
#[derive(Debug, Serialize)]
pub struct ResourceMap {
    pub format: MapFormat,
    pub entries: Vec<MapEntry>,
    pub records_read: usize,
    pub records_expected: usize,
}

impl ResourceMap {
    pub fn truncated(&self) -> bool {
        self.records_read < self.records_expected
    }

    pub fn find(&self, id: ResourceId) -> Option<&MapEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

/// Answers whether a numbered volume file (`resource.003` style) can be
/// resolved. The prober uses it to tell the two old layouts apart and the
/// scanner uses it to reject maps whose volumes are missing; injecting it
/// keeps that environment probe deterministic in tests.
pub trait VolumeResolver {
    fn has_volume(&self, number: u8) -> bool;
}

struct RawRecord {
    id: ResourceId,
    volume: u8,
    offset: u32,
}

/// Opens, probes and scans a resource map, returning the descriptor list by
/// value. `hint` is the in/out version hint: a caller that already knows the
/// layout skips detection, and the result reports back what was used.
pub fn read_resource_map(
    path: &Path,
    volumes: &dyn VolumeResolver,
    hint: Option<MapFormat>,
) -> Result<ResourceMap, MapError> {
    let file = File::open(path)
        .map_err(|err| MapError::ResmapNotFound(format!("{}: {err}", path.display())))?;
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .map_err(|err| MapError::ResmapNotFound(format!("{}: {err}", path.display())))?;
    parse_resource_map(&mmap, volumes, hint)
}

/// In-memory entry point behind [`read_resource_map`].
pub fn parse_resource_map(
    bytes: &[u8],
    volumes: &dyn VolumeResolver,
    hint: Option<MapFormat>,
) -> Result<ResourceMap, MapError> {
    let format = match hint {
        Some(format) => format,
        None => detect_map_format(bytes, volumes)?,
    };

    let (entries, records_read, records_expected) = if format.is_old() {
        scan_flat(bytes, format, volumes)?
    } else {
        scan_directory(bytes, format, volumes)?
    };

    if entries.is_empty() {
        return Err(MapError::InvalidEntry("map describes no resources".into()));
    }
    for entry in &entries {
        for source in &entry.sources {
            if source.volume > format.max_volume() {
                return Err(MapError::InvalidEntry(format!(
                    "{} names volume {} but {} maps cannot address past volume {}",
                    entry.id,
                    source.volume,
                    format.label(),
                    format.max_volume()
                )));
            }
        }
    }

    Ok(ResourceMap {
        format,
        entries,
        records_read,
        records_expected,
    })
}

/// Infers the map layout. Old-format maps end in an all-ones sentinel; the
/// two old variants are then told apart by decoding every record with the
/// standard bit split and probing whether the named volume exists. Newer
/// maps open with a type directory, and their two record widths are told
/// apart by which of 5 or 6 evenly divides a directory block.
pub fn detect_map_format(
    bytes: &[u8],
    volumes: &dyn VolumeResolver,
) -> Result<MapFormat, MapError> {
    if bytes.len() < SCI0_RECORD_SIZE {
        return Err(MapError::InvalidEntry(format!(
            "map file is only {} bytes",
            bytes.len()
        )));
    }

    let tail = read_u32_le(&bytes[bytes.len() - 4..]);
    if tail == SCI0_SENTINEL {
        return Ok(detect_old_variant(bytes, volumes));
    }

    let directory = parse_directory(bytes)?;
    detect_new_record_size(&directory, bytes.len())
}

/// Oddness probe over an old-format map. Every record but the trailing one
/// is decoded with the standard SCI0 split; the first volume number that
/// does not resolve on disk reclassifies the whole map as the shifted
/// variant. A map whose volumes all resolve is the standard layout, so a
/// probe that cannot find anything degrades to "not odd".
fn detect_old_variant(bytes: &[u8], volumes: &dyn VolumeResolver) -> MapFormat {
    let records = bytes.len() / SCI0_RECORD_SIZE;
    for index in 0..records.saturating_sub(1) {
        let record = &bytes[index * SCI0_RECORD_SIZE..(index + 1) * SCI0_RECORD_SIZE];
        if record[0] == 0xFF && record[1] == 0xFF && record[2] == 0xFF {
            break;
        }
        let packed = read_u32_le(&record[2..6]);
        if !volumes.has_volume((packed >> 26) as u8) {
            return MapFormat::Sci0Alt;
        }
    }
    MapFormat::Sci0
}

/// Walks the leading (marker, offset) directory of a SCI1+ map. The list is
/// terminated by a 0xFF marker whose offset must equal the file size.
fn parse_directory(bytes: &[u8]) -> Result<Vec<(u8, u16)>, MapError> {
    let mut cursor = Cursor::new(bytes);
    let mut slots = Vec::new();

    loop {
        let marker = cursor
            .read_u8()
            .map_err(|_| MapError::InvalidEntry("type directory is unterminated".into()))?;
        let offset = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| MapError::InvalidEntry("type directory is unterminated".into()))?;

        if marker == DIRECTORY_TERMINATOR {
            if offset as usize != bytes.len() {
                return Err(MapError::InvalidEntry(format!(
                    "directory terminator points at {offset:#06x}, not end of file"
                )));
            }
            if slots.is_empty() {
                return Err(MapError::InvalidEntry("type directory is empty".into()));
            }
            return Ok(slots);
        }

        if marker & 0x80 == 0 || marker & 0x7F > 0x20 {
            return Err(MapError::InvalidEntry(format!(
                "implausible directory marker {marker:#04x}"
            )));
        }
        if offset as usize > bytes.len() {
            return Err(MapError::InvalidEntry(format!(
                "directory offset {offset:#06x} lies beyond end of file"
            )));
        }

        slots.push((marker & 0x1F, offset));
    }
}

/// Adjacent directory offsets (the terminator bounds the last block at end
/// of file) differ by a whole number of records. The first delta that only
/// one candidate width divides decides the variant; a map where no delta is
/// conclusive stays undetected and the load fails. The original interpreter
/// silently guessed SCI1 here; no known map file needs the guess, so a
/// deliberate error is safer than a wrong record width.
fn detect_new_record_size(slots: &[(u8, u16)], file_len: usize) -> Result<MapFormat, MapError> {
    let mut offsets: Vec<usize> = slots.iter().map(|&(_, offset)| offset as usize).collect();
    offsets.push(file_len);

    for pair in offsets.windows(2) {
        let delta = pair[1].saturating_sub(pair[0]);
        if delta == 0 {
            continue;
        }
        match (delta % SCI1_RECORD_SIZE == 0, delta % SCI11_RECORD_SIZE == 0) {
            (true, false) => return Ok(MapFormat::Sci1),
            (false, true) => return Ok(MapFormat::Sci11),
            _ => {}
        }
    }

    Err(MapError::NoResourceFiles(
        "directory blocks divide evenly by both candidate record sizes; map layout undetected"
            .into(),
    ))
}

/// A map that opens with something shaped like a type directory is not an
/// old-format map no matter what follows: marker byte at position zero, a
/// second marker where the next slot would sit, and a first offset landing
/// on a whole number of directory slots.
fn looks_like_directory_start(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let is_marker = |byte: u8| byte & 0x80 != 0 && byte & 0x7F <= 0x20;
    let first_offset = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
    is_marker(bytes[0])
        && (bytes[3] == DIRECTORY_TERMINATOR || is_marker(bytes[3]))
        && first_offset % DIRECTORY_SLOT_SIZE == 0
        && first_offset <= bytes.len()
}

/// Scans an old-format map: a flat run of 6-byte records from the start of
/// the file. The sentinel stops the walk cleanly; so does a trailing
/// partial record, with the shortfall reported through the record counts.
fn scan_flat(
    bytes: &[u8],
    format: MapFormat,
    volumes: &dyn VolumeResolver,
) -> Result<(Vec<MapEntry>, usize, usize), MapError> {
    if looks_like_directory_start(bytes) {
        return Err(MapError::InvalidEntry(
            "map opens with a newer-format type directory".into(),
        ));
    }

    let record_size = format.record_size();
    let records_expected = bytes.len().div_ceil(record_size);
    let mut entries: Vec<MapEntry> = Vec::new();
    let mut records_read = 0usize;

    for record in bytes.chunks_exact(record_size) {
        match decode_old_record(format, record)? {
            None => {
                records_read += 1;
                break;
            }
            Some(raw) => {
                records_read += 1;
                fold_record(&mut entries, raw, volumes)?;
            }
        }
    }

    Ok((entries, records_read, records_expected))
}

fn decode_old_record(format: MapFormat, record: &[u8]) -> Result<Option<RawRecord>, MapError> {
    let mut cursor = Cursor::new(record);
    let id = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| MapError::InvalidEntry("truncated map record".into()))?;
    let packed = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| MapError::InvalidEntry("truncated map record".into()))?;

    if packed == SCI0_SENTINEL {
        return Ok(None);
    }

    let type_code = (id >> 11) as u8;
    let rtype = ResourceType::from_raw(type_code).ok_or_else(|| {
        MapError::InvalidEntry(format!("record carries unknown type code {type_code}"))
    })?;
    let number = id & 0x07FF;

    let (volume, offset) = match format {
        MapFormat::Sci0 => ((packed >> 26) as u8, packed & 0x03FF_FFFF),
        MapFormat::Sci0Alt => ((packed >> 28) as u8, packed & 0x0FFF_FFFF),
        _ => unreachable!("old-record decode is only dispatched for old formats"),
    };

    Ok(Some(RawRecord {
        id: ResourceId::new(rtype, number),
        volume,
        offset,
    }))
}

/// Scans a SCI1/SCI1.1 map: per-type record blocks located by the leading
/// directory, each block running to the next directory offset in file
/// order.
fn scan_directory(
    bytes: &[u8],
    format: MapFormat,
    volumes: &dyn VolumeResolver,
) -> Result<(Vec<MapEntry>, usize, usize), MapError> {
    let slots = parse_directory(bytes)?;
    let record_size = format.record_size();

    let mut bounds: Vec<usize> = slots.iter().map(|&(_, offset)| offset as usize).collect();
    bounds.push(bytes.len());

    let mut blocks: Vec<(ResourceType, usize, usize)> = Vec::new();
    for (index, &(code, offset)) in slots.iter().enumerate() {
        let start = offset as usize;
        let end = bounds[index + 1];
        if end < start {
            return Err(MapError::InvalidEntry(
                "directory offsets are not ascending".into(),
            ));
        }
        let span = end - start;
        if span % record_size != 0 {
            return Err(MapError::InvalidEntry(format!(
                "type block at {start:#06x} is not a whole number of {record_size}-byte records"
            )));
        }
        let rtype = ResourceType::from_raw(code).ok_or_else(|| {
            MapError::InvalidEntry(format!("directory names unknown type code {code}"))
        })?;
        blocks.push((rtype, start, span / record_size));
    }

    let mut entries: Vec<MapEntry> = Vec::new();
    let mut records_read = 0usize;
    let records_expected = blocks.iter().map(|&(_, _, count)| count).sum();

    for (rtype, start, count) in blocks {
        for index in 0..count {
            let base = start + index * record_size;
            let raw = decode_new_record(format, &bytes[base..base + record_size], rtype)?;
            fold_record(&mut entries, raw, volumes)?;
            records_read += 1;
        }
    }

    Ok((entries, records_read, records_expected))
}

fn decode_new_record(
    format: MapFormat,
    record: &[u8],
    rtype: ResourceType,
) -> Result<RawRecord, MapError> {
    let mut cursor = Cursor::new(record);
    let number = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| MapError::InvalidEntry("truncated map record".into()))?;

    let (volume, offset) = match format {
        MapFormat::Sci1 => {
            let packed = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| MapError::InvalidEntry("truncated map record".into()))?;
            ((packed >> 28) as u8, packed & 0x0FFF_FFFF)
        }
        MapFormat::Sci11 => {
            // Offset stored in three bytes, in units of two; everything
            // lives in a single volume.
            let low = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| MapError::InvalidEntry("truncated map record".into()))?;
            let high = cursor
                .read_u8()
                .map_err(|_| MapError::InvalidEntry("truncated map record".into()))?;
            (0, (((high as u32) << 16) | low as u32) << 1)
        }
        _ => unreachable!("new-record decode is only dispatched for directory formats"),
    };

    Ok(RawRecord {
        id: ResourceId::new(rtype, number),
        volume,
        offset,
    })
}

/// Folds one record into the descriptor list. Duplicate ids append their
/// location as an alternate source instead of a second descriptor; an exact
/// duplicate location is recorded once. The linear scan is deliberate:
/// real maps top out at a few thousand records.
fn fold_record(
    entries: &mut Vec<MapEntry>,
    raw: RawRecord,
    volumes: &dyn VolumeResolver,
) -> Result<(), MapError> {
    if !volumes.has_volume(raw.volume) {
        return Err(MapError::NoResourceFiles(format!(
            "{} names volume {} but no such resource file exists",
            raw.id, raw.volume
        )));
    }

    let source = MapSource {
        volume: raw.volume,
        offset: raw.offset,
    };
    match entries.iter_mut().find(|entry| entry.id == raw.id) {
        Some(entry) => {
            if !entry.sources.contains(&source) {
                entry.sources.push(source);
            }
        }
        None => entries.push(MapEntry {
            id: raw.id,
            sources: vec![source],
        }),
    }
    Ok(())
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().unwrap())
}
