//! Loose patch files: single resources shipped next to the volumes that
//! override whatever the map says. Two naming schemes exist, both carried
//! here: the early `view.001` (type name, numeric extension) and the later
//! `123.v56` (number, type suffix).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};

use crate::resmap::ResourceId;
use crate::restype::ResourceType;

/// Parses a file name in either patch scheme into the resource id it
/// claims to replace. Names that fit neither scheme are simply not patch
/// files.
pub fn parse_patch_name(name: &str) -> Option<ResourceId> {
    let (stem, suffix) = name.rsplit_once('.')?;
    if stem.is_empty() || suffix.is_empty() {
        return None;
    }

    if stem.chars().next()?.is_ascii_digit() {
        let number: u16 = stem.parse().ok()?;
        let rtype = ResourceType::from_patch_suffix(suffix)?;
        Some(ResourceId::new(rtype, number))
    } else {
        let rtype = ResourceType::from_name(stem)?;
        if suffix.len() != 3 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u16 = suffix.parse().ok()?;
        Some(ResourceId::new(rtype, number))
    }
}

/// The validated two-byte patch preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchHeader {
    /// Extra header bytes between the preamble and the payload.
    pub header_size: u8,
    pub payload_len: usize,
}

impl PatchHeader {
    pub fn payload_start(&self) -> usize {
        self.header_size as usize + 2
    }
}

/// Validates a patch file's preamble against the type its name claims.
/// Byte 0 carries the type code (the interpreter sets the top bit when
/// writing these); byte 1 is the extra-header size, with a handful of
/// flagged special cases that old tools emitted.
pub fn parse_patch_header(rtype: ResourceType, bytes: &[u8]) -> Result<PatchHeader> {
    ensure!(bytes.len() >= 3, "patch file is only {} bytes", bytes.len());

    let code = bytes[0] & 0x7F;
    ensure!(
        code == rtype.raw(),
        "patch type byte {:#04x} does not match {}",
        bytes[0],
        rtype.name()
    );

    let mut header_size = bytes[1];
    if header_size & 0x80 != 0 {
        header_size = match header_size & 0x7F {
            0 => 24,
            1 => 2,
            4 => 8,
            other => bail!("unsupported patch header flag {other:#04x}"),
        };
    }

    let start = header_size as usize + 2;
    ensure!(
        start < bytes.len(),
        "patch payload would start at byte {start} in a {}-byte file",
        bytes.len()
    );

    Ok(PatchHeader {
        header_size,
        payload_len: bytes.len() - start,
    })
}

/// Scans a game directory for loose patch files. Only the name is checked
/// here; preamble validation happens when a patch is actually read, so one
/// corrupt file cannot block startup.
pub fn scan_patch_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<(ResourceId, PathBuf)>> {
    let dir = dir.as_ref();
    let mut patches = Vec::new();

    for entry in fs::read_dir(dir)
        .with_context(|| format!("reading patch directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            if let Some(id) = parse_patch_name(name) {
                patches.push((id, path));
            }
        }
    }

    patches.sort_by_key(|(id, _)| (id.rtype, id.number));
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn parses_both_naming_schemes() {
        assert_eq!(
            parse_patch_name("view.001"),
            Some(ResourceId::new(ResourceType::View, 1))
        );
        assert_eq!(
            parse_patch_name("123.v56"),
            Some(ResourceId::new(ResourceType::View, 123))
        );
        assert_eq!(
            parse_patch_name("FONT.009"),
            Some(ResourceId::new(ResourceType::Font, 9))
        );
        assert_eq!(
            parse_patch_name("7.MSG"),
            Some(ResourceId::new(ResourceType::Message, 7))
        );
    }

    #[test]
    fn ignores_non_patch_names() {
        assert_eq!(parse_patch_name("resource.map"), None);
        assert_eq!(parse_patch_name("resource.001"), None);
        assert_eq!(parse_patch_name("readme.txt"), None);
        assert_eq!(parse_patch_name("view.12"), None);
        assert_eq!(parse_patch_name("view.abc"), None);
    }

    #[test]
    fn validates_preamble() {
        let bytes = [0x80, 0x00, 0xAA, 0xBB, 0xCC];
        let header = parse_patch_header(ResourceType::View, &bytes).unwrap();
        assert_eq!(header.header_size, 0);
        assert_eq!(header.payload_start(), 2);
        assert_eq!(header.payload_len, 3);
    }

    #[test]
    fn rejects_type_mismatch() {
        let bytes = [0x81, 0x00, 0xAA];
        assert!(parse_patch_header(ResourceType::View, &bytes).is_err());
    }

    #[test]
    fn resolves_flagged_header_sizes() {
        let mut bytes = vec![0x80, 0x81];
        bytes.extend_from_slice(&[0u8; 8]);
        let header = parse_patch_header(ResourceType::View, &bytes).unwrap();
        assert_eq!(header.header_size, 2);
        assert_eq!(header.payload_start(), 4);

        let bad = [0x80, 0x83, 0x00, 0x00, 0x00, 0x00];
        assert!(parse_patch_header(ResourceType::View, &bad).is_err());
    }

    #[test]
    fn scans_directory_for_patches() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("view.005")).unwrap();
        File::create(dir.path().join("12.scr")).unwrap();
        File::create(dir.path().join("resource.000")).unwrap();
        File::create(dir.path().join("resource.map")).unwrap();

        let patches = scan_patch_dir(dir.path()).unwrap();
        let ids: Vec<ResourceId> = patches.iter().map(|(id, _)| *id).collect();
        assert_eq!(
            ids,
            vec![
                ResourceId::new(ResourceType::View, 5),
                ResourceId::new(ResourceType::Script, 12),
            ]
        );
    }
}
