//! Logical file references and open file descriptors.

use crate::device::DeviceId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Numeric content identifier.
pub type FileId = u32;

/// Content owner tag for files produced by the engine's own authoring pipeline.
pub const OWNER_ENGINE: u32 = 0;

/// Content owner tag for externally sourced files managed by the engine.
pub const OWNER_ENGINE_EXTERNAL: u32 = 1;

/// Codec tag marking a sound bank.
pub const CODEC_BANK: u32 = 0;

/// Reference to a file, either by name or by content ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileReference {
    Name(String),
    Id(FileId),
}

impl From<&str> for FileReference {
    fn from(name: &str) -> Self {
        FileReference::Name(name.to_owned())
    }
}

impl From<String> for FileReference {
    fn from(name: String) -> Self {
        FileReference::Name(name)
    }
}

impl From<FileId> for FileReference {
    fn from(id: FileId) -> Self {
        FileReference::Id(id)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileReference::Name(name) => f.write_str(name),
            FileReference::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// Kind of content a file holds, derived from its codec tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// Sound bank (`.bnk`).
    Bank,
    /// Streamed media (`.wem`).
    Media,
}

impl ContentType {
    pub fn from_codec(codec_id: u32) -> Self {
        if codec_id == CODEC_BANK {
            ContentType::Bank
        } else {
            ContentType::Media
        }
    }

    /// File extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ContentType::Bank => "bnk",
            ContentType::Media => "wem",
        }
    }
}

/// Flags accompanying an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileSystemFlags {
    pub company_id: u32,
    pub codec_id: u32,
    pub is_language_specific: bool,
}

impl FileSystemFlags {
    pub fn new(company_id: u32, codec_id: u32) -> Self {
        Self {
            company_id,
            codec_id,
            is_language_specific: false,
        }
    }

    /// Flags for a bank owned by the engine.
    pub fn bank() -> Self {
        Self::new(OWNER_ENGINE, CODEC_BANK)
    }

    /// Flags for streamed media owned by the engine.
    pub fn media(codec_id: u32) -> Self {
        Self::new(OWNER_ENGINE, codec_id)
    }

    pub fn language_specific(mut self, yes: bool) -> Self {
        self.is_language_specific = yes;
        self
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::from_codec(self.codec_id)
    }

    pub fn is_recognized_owner(&self) -> bool {
        self.company_id == OWNER_ENGINE || self.company_id == OWNER_ENGINE_EXTERNAL
    }
}

/// File open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
    WriteOverwrite,
    ReadWrite,
}

impl OpenMode {
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::WriteOverwrite)
    }
}

/// Open file as seen by the stream manager.
///
/// `custom_param` is owned by the device that opened the file; the stream
/// manager must treat it as opaque. Closing consumes the descriptor, so it
/// cannot be touched afterwards.
pub struct FileDescriptor {
    pub device_id: DeviceId,
    pub file_size: u64,
    pub sector: u32,
    /// True if the open completed synchronously (write opens always do).
    pub opened_synchronously: bool,
    pub custom_param: Option<Box<dyn Any + Send + Sync>>,
}

impl FileDescriptor {
    /// Clean descriptor for a device: no size, no custom block.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            file_size: 0,
            sector: 0,
            opened_synchronously: false,
            custom_param: None,
        }
    }

    /// Borrow the custom block as a concrete type.
    pub fn custom<T: Any>(&self) -> Option<&T> {
        self.custom_param.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Take the custom block out as a concrete type.
    ///
    /// Leaves the block in place if it has a different type.
    pub fn take_custom<T: Any>(&mut self) -> Option<Box<T>> {
        match self.custom_param.take() {
            Some(param) => match param.downcast::<T>() {
                Ok(typed) => Some(typed),
                Err(other) => {
                    self.custom_param = Some(other);
                    None
                }
            },
            None => None,
        }
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("device_id", &self.device_id)
            .field("file_size", &self.file_size)
            .field("sector", &self.sector)
            .field("opened_synchronously", &self.opened_synchronously)
            .field("has_custom_param", &self.custom_param.is_some())
            .finish()
    }
}
