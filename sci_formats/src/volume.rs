//! Resource volume files (`resource.000`, `resource.001`, ...): naming,
//! directory discovery, format detection and record headers.
//!
//! Volumes are a flat run of `[header][packed payload]` records. Like the
//! map file, they carry no version field; the header width and the packed
//! size bias changed across interpreter generations, so the layout is found
//! by trial-walking the records until one layout survives.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use byteorder::{LittleEndian, ReadBytesExt};

use crate::resmap::{ResourceId, VolumeResolver};
use crate::restype::ResourceType;

/// Probing more than this much of a volume never changes the verdict.
const DETECT_PROBE_LIMIT: usize = 0x10_0000;

/// File name for a numbered volume.
pub fn volume_file_name(number: u8) -> String {
    format!("resource.{number:03}")
}

/// Parses `resource.NNN` into its volume number. Case-insensitive; the
/// suffix must be exactly three digits with a leading zero, which is the
/// shape every known game uses.
pub fn parse_volume_number(name: &str) -> Option<u8> {
    let (stem, suffix) = name.rsplit_once('.')?;
    if !stem.eq_ignore_ascii_case("resource") {
        return None;
    }
    if suffix.len() != 3 || !suffix.starts_with('0') || !suffix.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    suffix.parse().ok()
}

/// The volume set actually present in a game directory, built once from a
/// directory listing. Implements the parser's existence probe and resolves
/// numbers back to the on-disk paths (whatever their letter case).
#[derive(Debug)]
pub struct DirectoryVolumes {
    dir: PathBuf,
    names: BTreeMap<u8, String>,
}

impl DirectoryVolumes {
    pub fn scan<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }

        let mut names = BTreeMap::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("reading game directory {}", dir.display()))?
            .filter_map(|entry| entry.ok())
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(number) = parse_volume_number(name) {
                    names.insert(number, name.to_string());
                }
            }
        }

        Ok(DirectoryVolumes {
            dir: dir.to_path_buf(),
            names,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn numbers(&self) -> impl Iterator<Item = u8> + '_ {
        self.names.keys().copied()
    }

    pub fn path_for(&self, number: u8) -> Option<PathBuf> {
        self.names.get(&number).map(|name| self.dir.join(name))
    }
}

impl VolumeResolver for DirectoryVolumes {
    fn has_volume(&self, number: u8) -> bool {
        self.names.contains_key(&number)
    }
}

/// Volume record-header generations. SCI0 has no leading type byte and
/// biases the packed size by four; SCI1 adds the type byte; SCI1.1 drops
/// the bias (and later interpreters word-align records, which only matters
/// while probing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    Sci0,
    Sci1,
    Sci11,
}

impl VolumeFormat {
    fn header_size(self) -> usize {
        match self {
            VolumeFormat::Sci0 => 8,
            VolumeFormat::Sci1 | VolumeFormat::Sci11 => 9,
        }
    }

    fn packed_bias(self) -> u32 {
        match self {
            VolumeFormat::Sci0 | VolumeFormat::Sci1 => 4,
            VolumeFormat::Sci11 => 0,
        }
    }

    fn max_compression(self) -> u16 {
        match self {
            VolumeFormat::Sci0 => 4,
            VolumeFormat::Sci1 | VolumeFormat::Sci11 => 20,
        }
    }
}

/// One record header inside a volume, with the payload located for the
/// caller to slice.
#[derive(Debug, Clone)]
pub struct VolumeRecord {
    pub id: ResourceId,
    pub packed_size: u32,
    pub unpacked_size: u16,
    pub compression: u16,
    pub payload: Range<usize>,
}

/// Classifies a volume by trial-walking its records with each candidate
/// layout, oldest first; the first implausible header moves on to the next
/// candidate. Returns `None` when every layout fails.
pub fn detect_volume_format(bytes: &[u8]) -> Option<VolumeFormat> {
    let candidates = [
        (VolumeFormat::Sci0, false),
        (VolumeFormat::Sci1, false),
        (VolumeFormat::Sci11, false),
        (VolumeFormat::Sci11, true),
    ];
    for (format, word_align) in candidates {
        if walk_volume(bytes, format, word_align) {
            return Some(format);
        }
    }
    None
}

fn walk_volume(bytes: &[u8], format: VolumeFormat, word_align: bool) -> bool {
    let limit = bytes.len().min(DETECT_PROBE_LIMIT);
    let mut position = 0usize;

    while position < limit {
        let record = match parse_volume_record(bytes, position, format) {
            Ok(record) => record,
            // A header cut off by end of file is how a clean walk ends.
            Err(_) if bytes.len() - position < format.header_size() => return true,
            Err(_) => return false,
        };
        let mut next = record.payload.end;
        if word_align && (next - position) % 2 == 1 {
            next += 1;
        }
        position = next;
    }
    true
}

/// Reads and sanity-checks one record header at `offset`. The plausibility
/// rules are the ones the walk-based detector relies on: a compression
/// method within the generation's range, and packed/unpacked sizes that
/// agree when the record is stored flat.
pub fn parse_volume_record(
    bytes: &[u8],
    offset: usize,
    format: VolumeFormat,
) -> Result<VolumeRecord> {
    ensure!(offset <= bytes.len(), "offset {offset:#x} beyond volume end");
    let mut cursor = Cursor::new(&bytes[offset..]);

    let id = match format {
        VolumeFormat::Sci0 => {
            let packed_id = cursor.read_u16::<LittleEndian>().context("record id")?;
            let code = (packed_id >> 11) as u8;
            let rtype = ResourceType::from_raw(code)
                .with_context(|| format!("unknown resource type code {code}"))?;
            ResourceId::new(rtype, packed_id & 0x07FF)
        }
        VolumeFormat::Sci1 | VolumeFormat::Sci11 => {
            let code = cursor.read_u8().context("record type byte")? & 0x7F;
            let rtype = ResourceType::from_raw(code)
                .with_context(|| format!("unknown resource type code {code}"))?;
            let number = cursor.read_u16::<LittleEndian>().context("record number")?;
            ResourceId::new(rtype, number)
        }
    };

    let packed_size = cursor.read_u16::<LittleEndian>().context("packed size")? as u32;
    let unpacked_size = cursor.read_u16::<LittleEndian>().context("unpacked size")?;
    let compression = cursor.read_u16::<LittleEndian>().context("compression")?;

    let bias = format.packed_bias();
    ensure!(
        packed_size >= bias,
        "{id}: packed size {packed_size} below header bias"
    );
    let payload_len = (packed_size - bias) as usize;

    ensure!(
        compression <= format.max_compression(),
        "{id}: compression method {compression} out of range"
    );
    if compression == 0 {
        ensure!(
            payload_len == unpacked_size as usize,
            "{id}: stored flat but packed {payload_len} != unpacked {unpacked_size}"
        );
    } else {
        ensure!(
            unpacked_size as usize >= payload_len,
            "{id}: compressed payload larger than unpacked size"
        );
    }

    let start = offset + format.header_size();
    let end = start
        .checked_add(payload_len)
        .context("payload length overflow")?;
    ensure!(end <= bytes.len(), "{id}: payload extends beyond volume end");

    Ok(VolumeRecord {
        id,
        packed_size,
        unpacked_size,
        compression,
        payload: start..end,
    })
}
