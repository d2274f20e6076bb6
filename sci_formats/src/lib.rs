pub mod patch;
pub mod resmap;
pub mod restype;
pub mod volume;

pub use patch::{PatchHeader, parse_patch_header, parse_patch_name, scan_patch_dir};
pub use resmap::{
    MapEntry, MapError, MapFormat, MapSource, ResourceId, ResourceMap, VolumeResolver,
    detect_map_format, parse_resource_map, read_resource_map,
};
pub use restype::ResourceType;
pub use volume::{
    DirectoryVolumes, VolumeFormat, VolumeRecord, detect_volume_format, parse_volume_number,
    parse_volume_record, volume_file_name,
};
