use serde::Serialize;

/// Asset categories addressed by SCI resource maps. The raw codes are the
/// 5-bit type fields stored in map records and volume headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResourceType {
    View,
    Pic,
    Script,
    Text,
    Sound,
    Memory,
    Vocab,
    Font,
    Cursor,
    Patch,
    Bitmap,
    Palette,
    CdAudio,
    Audio,
    Sync,
    Message,
    Map,
    Heap,
    Audio36,
    Sync36,
    Translation,
    Robot,
}

impl ResourceType {
    pub const ALL: [ResourceType; 22] = [
        ResourceType::View,
        ResourceType::Pic,
        ResourceType::Script,
        ResourceType::Text,
        ResourceType::Sound,
        ResourceType::Memory,
        ResourceType::Vocab,
        ResourceType::Font,
        ResourceType::Cursor,
        ResourceType::Patch,
        ResourceType::Bitmap,
        ResourceType::Palette,
        ResourceType::CdAudio,
        ResourceType::Audio,
        ResourceType::Sync,
        ResourceType::Message,
        ResourceType::Map,
        ResourceType::Heap,
        ResourceType::Audio36,
        ResourceType::Sync36,
        ResourceType::Translation,
        ResourceType::Robot,
    ];

    /// Maps a raw 5-bit type code to its category. Code 21 is unused by every
    /// known interpreter version and anything above 22 never appears in a
    /// well-formed map, so both come back as `None`.
    pub fn from_raw(code: u8) -> Option<ResourceType> {
        Some(match code {
            0 => ResourceType::View,
            1 => ResourceType::Pic,
            2 => ResourceType::Script,
            3 => ResourceType::Text,
            4 => ResourceType::Sound,
            5 => ResourceType::Memory,
            6 => ResourceType::Vocab,
            7 => ResourceType::Font,
            8 => ResourceType::Cursor,
            9 => ResourceType::Patch,
            10 => ResourceType::Bitmap,
            11 => ResourceType::Palette,
            12 => ResourceType::CdAudio,
            13 => ResourceType::Audio,
            14 => ResourceType::Sync,
            15 => ResourceType::Message,
            16 => ResourceType::Map,
            17 => ResourceType::Heap,
            18 => ResourceType::Audio36,
            19 => ResourceType::Sync36,
            20 => ResourceType::Translation,
            22 => ResourceType::Robot,
            _ => return None,
        })
    }

    pub fn raw(self) -> u8 {
        match self {
            ResourceType::View => 0,
            ResourceType::Pic => 1,
            ResourceType::Script => 2,
            ResourceType::Text => 3,
            ResourceType::Sound => 4,
            ResourceType::Memory => 5,
            ResourceType::Vocab => 6,
            ResourceType::Font => 7,
            ResourceType::Cursor => 8,
            ResourceType::Patch => 9,
            ResourceType::Bitmap => 10,
            ResourceType::Palette => 11,
            ResourceType::CdAudio => 12,
            ResourceType::Audio => 13,
            ResourceType::Sync => 14,
            ResourceType::Message => 15,
            ResourceType::Map => 16,
            ResourceType::Heap => 17,
            ResourceType::Audio36 => 18,
            ResourceType::Sync36 => 19,
            ResourceType::Translation => 20,
            ResourceType::Robot => 22,
        }
    }

    /// Lower-case name as used by SCI0-style patch files (`view.001`).
    pub fn name(self) -> &'static str {
        match self {
            ResourceType::View => "view",
            ResourceType::Pic => "pic",
            ResourceType::Script => "script",
            ResourceType::Text => "text",
            ResourceType::Sound => "sound",
            ResourceType::Memory => "memory",
            ResourceType::Vocab => "vocab",
            ResourceType::Font => "font",
            ResourceType::Cursor => "cursor",
            ResourceType::Patch => "patch",
            ResourceType::Bitmap => "bitmap",
            ResourceType::Palette => "palette",
            ResourceType::CdAudio => "cdaudio",
            ResourceType::Audio => "audio",
            ResourceType::Sync => "sync",
            ResourceType::Message => "message",
            ResourceType::Map => "map",
            ResourceType::Heap => "heap",
            ResourceType::Audio36 => "audio36",
            ResourceType::Sync36 => "sync36",
            ResourceType::Translation => "translation",
            ResourceType::Robot => "robot",
        }
    }

    /// Extension used by SCI1-style patch files (`123.v56`). Types that were
    /// never patched this way have no suffix.
    pub fn patch_suffix(self) -> Option<&'static str> {
        Some(match self {
            ResourceType::View => "v56",
            ResourceType::Pic => "p56",
            ResourceType::Script => "scr",
            ResourceType::Text => "tex",
            ResourceType::Sound => "snd",
            ResourceType::Memory => return None,
            ResourceType::Vocab => "voc",
            ResourceType::Font => "fon",
            ResourceType::Cursor => "cur",
            ResourceType::Patch => "pat",
            ResourceType::Bitmap => "bit",
            ResourceType::Palette => "pal",
            ResourceType::CdAudio => "cda",
            ResourceType::Audio => "aud",
            ResourceType::Sync => "syn",
            ResourceType::Message => "msg",
            ResourceType::Map => "map",
            ResourceType::Heap => "hep",
            ResourceType::Audio36 => return None,
            ResourceType::Sync36 => return None,
            ResourceType::Translation => "trn",
            ResourceType::Robot => "rbt",
        })
    }

    pub fn from_name(name: &str) -> Option<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .find(|rtype| rtype.name().eq_ignore_ascii_case(name))
    }

    /// First type claiming the suffix wins, matching the scan order of the
    /// original interpreter (`aud` is Audio, never Audio36).
    pub fn from_patch_suffix(suffix: &str) -> Option<ResourceType> {
        ResourceType::ALL.into_iter().find(|rtype| {
            rtype
                .patch_suffix()
                .map(|known| known.eq_ignore_ascii_case(suffix))
                .unwrap_or(false)
        })
    }
}
