//! File location resolution.
//!
//! Turns a [`FileReference`] into an absolute path by simple concatenation:
//! `base[/language]/name` for names, `base[/language]/<id>.<ext>` for IDs.

use arc_swap::ArcSwap;
use legato_core::{Error, FileId, FileReference, FileSystemFlags, OpenMode, Result};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

/// Widest decimal rendering of a [`FileId`] (u32::MAX has 10 digits).
const MAX_NUMBER_STRING_SIZE: usize = 10;
/// `.xxx`
const MAX_EXTENSION_SIZE: usize = 4;
const MAX_FILETITLE_SIZE: usize = MAX_NUMBER_STRING_SIZE + MAX_EXTENSION_SIZE + 1;

/// Resolves file references against a configurable base directory.
///
/// The base path is swapped atomically; resolution never takes a lock.
pub struct PathResolver {
    base_path: ArcSwap<String>,
    max_path_len: usize,
}

impl PathResolver {
    pub fn new(max_path_len: usize) -> Self {
        Self {
            base_path: ArcSwap::from_pointee(String::new()),
            max_path_len,
        }
    }

    /// Current base path, always ending in a separator once set.
    pub fn base_path(&self) -> Arc<String> {
        self.base_path.load_full()
    }

    pub fn max_path_len(&self) -> usize {
        self.max_path_len
    }

    /// Set the root directory of all resolved files.
    ///
    /// Returns false if the path (plus a language directory) would not fit in
    /// the path budget, in which case nothing is stored, or if the directory
    /// does not exist. In the latter case the path is stored anyway.
    pub fn set_base_path(&self, path: impl AsRef<Path>, language: &str) -> bool {
        let mut base = path.as_ref().to_string_lossy().into_owned();
        if char_len(&base) + char_len(language) + 1 >= self.max_path_len {
            tracing::warn!(
                "Base path {} does not fit the {} character budget",
                base,
                self.max_path_len
            );
            return false;
        }

        if !base.ends_with(MAIN_SEPARATOR) && !base.ends_with('/') {
            base.push(MAIN_SEPARATOR);
        }

        let exists = Path::new(&base).is_dir();
        self.base_path.store(Arc::new(base));
        exists
    }

    /// Resolve either kind of reference.
    pub fn resolve(
        &self,
        reference: &FileReference,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
        language: &str,
    ) -> Result<PathBuf> {
        match reference {
            FileReference::Name(name) => self.resolve_name(name, mode, flags, language),
            FileReference::Id(id) => self.resolve_id(*id, flags, language),
        }
    }

    /// `base[/language]/name`.
    ///
    /// The language directory only applies to reads of language-specific files.
    pub fn resolve_name(
        &self,
        name: &str,
        mode: OpenMode,
        flags: Option<&FileSystemFlags>,
        language: &str,
    ) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::InvalidParameter("empty file name".into()));
        }

        let name_len = char_len(name);
        if name_len >= self.max_path_len {
            return Err(Error::PathTooLong {
                len: name_len,
                max: self.max_path_len,
            });
        }

        let mut path = self.base_path.load().as_ref().clone();

        let wants_language = flags.is_some_and(|f| f.is_language_specific) && mode == OpenMode::Read;
        if wants_language && !language.is_empty() {
            self.push_language(&mut path, language, name_len)?;
        }

        let total = char_len(&path) + name_len;
        if total >= self.max_path_len {
            return Err(Error::PathTooLong {
                len: total,
                max: self.max_path_len,
            });
        }

        path.push_str(name);
        Ok(PathBuf::from(path))
    }

    /// `base[/language]/<id>.bnk` or `base[/language]/<id>.wem`.
    ///
    /// Only references owned by the engine resolve; anything else is
    /// rejected with an invalid-parameter error.
    pub fn resolve_id(
        &self,
        id: FileId,
        flags: Option<&FileSystemFlags>,
        language: &str,
    ) -> Result<PathBuf> {
        let flags = match flags {
            Some(flags) if flags.is_recognized_owner() => flags,
            Some(flags) => return Err(Error::UnrecognizedOwner(flags.company_id)),
            None => {
                return Err(Error::InvalidParameter(
                    "content ID reference without flags".into(),
                ))
            }
        };

        let mut path = self.base_path.load().as_ref().clone();

        if flags.is_language_specific && !language.is_empty() {
            self.push_language(&mut path, language, 0)?;
        }

        let size = char_len(&path);
        if size + MAX_FILETITLE_SIZE > self.max_path_len {
            return Err(Error::PathTooLong {
                len: size + MAX_FILETITLE_SIZE,
                max: self.max_path_len,
            });
        }

        path.push_str(&id.to_string());
        path.push('.');
        path.push_str(flags.content_type().extension());
        Ok(PathBuf::from(path))
    }

    fn push_language(&self, path: &mut String, language: &str, extra: usize) -> Result<()> {
        let size = char_len(path) + char_len(language) + 1 + extra;
        if size >= self.max_path_len {
            return Err(Error::PathTooLong {
                len: size,
                max: self.max_path_len,
            });
        }
        path.push_str(language);
        path.push(MAIN_SEPARATOR);
        Ok(())
    }
}

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}
