//! Startup-time resource table for a SCI game directory: the map parser
//! wired to the on-disk volume set, with loose patch files layered on top.
//! Hands out raw packed records; decompression is the consumer's business.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use memmap2::{Mmap, MmapOptions};
use sci_formats::{
    DirectoryVolumes, MapEntry, MapFormat, ResourceId, ResourceMap, ResourceType, VolumeFormat,
    detect_volume_format, parse_patch_header, parse_volume_record, read_resource_map,
    scan_patch_dir,
};

/// One raw resource as stored on disk. `compression` is zero for flat
/// data (patch files always are); otherwise `data` still needs the
/// interpreter's decompressor applied to reach `unpacked_size` bytes.
#[derive(Debug, Clone)]
pub struct RawResource {
    pub id: ResourceId,
    pub compression: u16,
    pub unpacked_size: usize,
    pub data: Vec<u8>,
}

/// Where a lookup would read its bytes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSource {
    Patch(PathBuf),
    Volume { volume: u8, offset: u32 },
}

#[derive(Debug)]
pub struct ResourceLibrary {
    dir: PathBuf,
    volumes: DirectoryVolumes,
    map: ResourceMap,
    patches: HashMap<ResourceId, PathBuf>,
    volume_format: Option<VolumeFormat>,
    mapped: HashMap<u8, Mmap>,
}

impl ResourceLibrary {
    /// Opens a game directory: locates `resource.map`, parses it against
    /// the volumes actually present, and indexes loose patch files. Any
    /// map-level failure is fatal, matching the all-or-nothing contract of
    /// the map loader.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let map_path = find_map_file(dir)?;

        let volumes = DirectoryVolumes::scan(dir)?;
        if volumes.is_empty() {
            bail!("no resource volumes found in {}", dir.display());
        }

        let map = read_resource_map(&map_path, &volumes, None)
            .with_context(|| format!("reading {}", map_path.display()))?;
        if map.truncated() {
            eprintln!(
                "[sci_resman] warning: {} ended after {} of {} records",
                map_path.display(),
                map.records_read,
                map.records_expected
            );
        }

        let patches = scan_patch_dir(dir)?.into_iter().collect();

        Ok(ResourceLibrary {
            dir: dir.to_path_buf(),
            volumes,
            map,
            patches,
            volume_format: None,
            mapped: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn map_format(&self) -> MapFormat {
        self.map.format
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.map.entries
    }

    pub fn patch_for(&self, id: ResourceId) -> Option<&Path> {
        self.patches.get(&id).map(PathBuf::as_path)
    }

    /// Resolves an id to the source a read would use: a patch file when one
    /// exists, otherwise the map entry's primary location.
    pub fn find(&self, rtype: ResourceType, number: u16) -> Option<ResourceSource> {
        let id = ResourceId::new(rtype, number);
        if let Some(path) = self.patches.get(&id) {
            return Some(ResourceSource::Patch(path.clone()));
        }
        self.map.find(id).map(|entry| {
            let primary = entry.primary();
            ResourceSource::Volume {
                volume: primary.volume,
                offset: primary.offset,
            }
        })
    }

    /// Numbers of every mapped or patched resource of one type, sorted.
    pub fn numbers_of_type(&self, rtype: ResourceType) -> Vec<u16> {
        let mut numbers: Vec<u16> = self
            .map
            .entries
            .iter()
            .map(|entry| entry.id)
            .chain(self.patches.keys().copied())
            .filter(|id| id.rtype == rtype)
            .map(|id| id.number)
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// Reads the raw packed bytes for a resource, patch first. The volume
    /// record header is cross-checked against the id the map promised.
    pub fn read_raw(&mut self, rtype: ResourceType, number: u16) -> Result<RawResource> {
        let id = ResourceId::new(rtype, number);

        if let Some(path) = self.patches.get(&id).cloned() {
            return read_patch(id, &path);
        }

        let entry = self
            .map
            .find(id)
            .with_context(|| format!("{id} is not in the resource map"))?;
        let primary = entry.primary();

        let format = self.volume_format_for(primary.volume)?;
        let bytes = self.mapped_volume(primary.volume)?;
        let record = parse_volume_record(bytes, primary.offset as usize, format)
            .with_context(|| format!("reading {id} from volume {}", primary.volume))?;
        ensure!(
            record.id == id,
            "volume {} offset {:#x} holds {}, map promised {id}",
            primary.volume,
            primary.offset,
            record.id
        );

        Ok(RawResource {
            id,
            compression: record.compression,
            unpacked_size: record.unpacked_size as usize,
            data: bytes[record.payload.clone()].to_vec(),
        })
    }

    /// Volume layout, detected once from the first volume actually read.
    fn volume_format_for(&mut self, volume: u8) -> Result<VolumeFormat> {
        if let Some(format) = self.volume_format {
            return Ok(format);
        }
        let bytes = self.mapped_volume(volume)?;
        let format = detect_volume_format(bytes)
            .with_context(|| format!("cannot detect record layout of volume {volume}"))?;
        self.volume_format = Some(format);
        Ok(format)
    }

    fn mapped_volume(&mut self, volume: u8) -> Result<&Mmap> {
        if !self.mapped.contains_key(&volume) {
            let path = self
                .volumes
                .path_for(volume)
                .with_context(|| format!("volume {volume} disappeared after the map scan"))?;
            let file = fs::File::open(&path)
                .with_context(|| format!("opening volume {}", path.display()))?;
            let mmap = unsafe { MmapOptions::new().map(&file) }
                .with_context(|| format!("memory-mapping volume {}", path.display()))?;
            self.mapped.insert(volume, mmap);
        }
        Ok(&self.mapped[&volume])
    }
}

fn find_map_file(dir: &Path) -> Result<PathBuf> {
    for entry in fs::read_dir(dir)
        .with_context(|| format!("reading game directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
    {
        if entry
            .file_name()
            .to_str()
            .map(|name| name.eq_ignore_ascii_case("resource.map"))
            .unwrap_or(false)
        {
            return Ok(entry.path());
        }
    }
    bail!("no resource.map in {}", dir.display());
}

fn read_patch(id: ResourceId, path: &Path) -> Result<RawResource> {
    let bytes =
        fs::read(path).with_context(|| format!("reading patch file {}", path.display()))?;
    let header = parse_patch_header(id.rtype, &bytes)
        .with_context(|| format!("validating patch file {}", path.display()))?;

    Ok(RawResource {
        id,
        compression: 0,
        unpacked_size: header.payload_len,
        data: bytes[header.payload_start()..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sci0_map_record(rtype: ResourceType, number: u16, volume: u32, offset: u32) -> Vec<u8> {
        let id = ((rtype.raw() as u16) << 11) | number;
        let mut record = id.to_le_bytes().to_vec();
        record.extend_from_slice(&((volume << 26) | offset).to_le_bytes());
        record
    }

    fn sci0_volume_record(rtype: ResourceType, number: u16, payload: &[u8]) -> Vec<u8> {
        let id = ((rtype.raw() as u16) << 11) | number;
        let mut bytes = id.to_le_bytes().to_vec();
        bytes.extend_from_slice(&((payload.len() as u16 + 4).to_le_bytes()));
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// resource.map + two volumes + one patch, all SCI0-shaped.
    fn write_game_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();

        let view_payload = b"VIEWDATA";
        let pic_payload = b"PICBYTES!!";

        let mut volume0 = Vec::new();
        volume0.extend_from_slice(&sci0_volume_record(ResourceType::View, 1, view_payload));
        let pic_offset = volume0.len() as u32;
        volume0.extend_from_slice(&sci0_volume_record(ResourceType::Pic, 2, pic_payload));
        fs::write(dir.path().join("resource.000"), &volume0).unwrap();

        let volume1 = sci0_volume_record(ResourceType::Script, 3, b"SCRIPT");
        fs::write(dir.path().join("resource.001"), &volume1).unwrap();

        let mut map = Vec::new();
        map.extend_from_slice(&sci0_map_record(ResourceType::View, 1, 0, 0));
        map.extend_from_slice(&sci0_map_record(ResourceType::Pic, 2, 0, pic_offset));
        map.extend_from_slice(&sci0_map_record(ResourceType::Script, 3, 1, 0));
        map.extend_from_slice(&[0xFF; 6]);
        fs::write(dir.path().join("resource.map"), &map).unwrap();

        // view.005 exists only as a patch.
        let mut patch = vec![0x80, 0x00];
        patch.extend_from_slice(b"PATCHED");
        fs::write(dir.path().join("view.005"), &patch).unwrap();

        dir
    }

    #[test]
    fn opens_game_dir_and_serves_volume_records() {
        let dir = write_game_dir();
        let mut library = ResourceLibrary::open(dir.path()).unwrap();

        assert_eq!(library.map_format(), MapFormat::Sci0);
        assert_eq!(library.entries().len(), 3);

        let pic = library.read_raw(ResourceType::Pic, 2).unwrap();
        assert_eq!(pic.compression, 0);
        assert_eq!(pic.data, b"PICBYTES!!");

        let script = library.read_raw(ResourceType::Script, 3).unwrap();
        assert_eq!(script.data, b"SCRIPT");
    }

    #[test]
    fn patch_only_resource_is_served() {
        let dir = write_game_dir();
        let mut library = ResourceLibrary::open(dir.path()).unwrap();

        assert!(matches!(
            library.find(ResourceType::View, 5),
            Some(ResourceSource::Patch(_))
        ));
        let patched = library.read_raw(ResourceType::View, 5).unwrap();
        assert_eq!(patched.data, b"PATCHED");
        assert_eq!(patched.compression, 0);
    }

    #[test]
    fn patch_takes_precedence_over_volume() {
        let dir = write_game_dir();
        // Add a patch for view.001, which also lives in volume 0.
        let mut patch = vec![0x80, 0x00];
        patch.extend_from_slice(b"OVERRIDE");
        fs::write(dir.path().join("view.001"), &patch).unwrap();

        let mut library = ResourceLibrary::open(dir.path()).unwrap();
        assert!(matches!(
            library.find(ResourceType::View, 1),
            Some(ResourceSource::Patch(_))
        ));
        let view = library.read_raw(ResourceType::View, 1).unwrap();
        assert_eq!(view.data, b"OVERRIDE");
    }

    #[test]
    fn lists_numbers_across_map_and_patches() {
        let dir = write_game_dir();
        let library = ResourceLibrary::open(dir.path()).unwrap();

        assert_eq!(library.numbers_of_type(ResourceType::View), vec![1, 5]);
        assert_eq!(library.numbers_of_type(ResourceType::Pic), vec![2]);
        assert_eq!(library.numbers_of_type(ResourceType::Font), Vec::<u16>::new());
    }

    #[test]
    fn missing_resource_is_an_error() {
        let dir = write_game_dir();
        let mut library = ResourceLibrary::open(dir.path()).unwrap();
        assert!(library.read_raw(ResourceType::Font, 99).is_err());
    }

    #[test]
    fn missing_volume_fails_open() {
        let dir = write_game_dir();
        // font.007 names a volume that exists under neither bit split, so
        // the parse fails whichever way the oddness probe classifies it.
        let mut map = fs::read(dir.path().join("resource.map")).unwrap();
        map.truncate(map.len() - 6);
        map.extend_from_slice(&sci0_map_record(ResourceType::Font, 7, 12, 0));
        map.extend_from_slice(&[0xFF; 6]);
        fs::write(dir.path().join("resource.map"), &map).unwrap();

        let err = ResourceLibrary::open(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("no such resource file"));
    }

    #[test]
    fn mismatched_volume_record_is_rejected() {
        let dir = write_game_dir();
        // Point script.003 at the view record in volume 0.
        let mut map = Vec::new();
        map.extend_from_slice(&sci0_map_record(ResourceType::Script, 3, 0, 0));
        map.extend_from_slice(&[0xFF; 6]);
        fs::write(dir.path().join("resource.map"), &map).unwrap();

        let mut library = ResourceLibrary::open(dir.path()).unwrap();
        assert!(library.read_raw(ResourceType::Script, 3).is_err());
    }
}
