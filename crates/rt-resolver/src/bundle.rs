use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Error, Result};

/// The concrete bundle archive format is deliberately out of scope (§1); the
/// core only needs an opaque seekable byte stream offering these four
/// operations.
pub trait BundleArchive: Send + Sync {
    fn stat(&self, path: &str) -> Option<u64>;
    fn open(&self, path: &str) -> Result<Vec<u8>>;
    fn contains(&self, path: &str) -> bool {
        self.stat(path).is_some()
    }
}

/// Default archive backend: a zip file held entirely in memory.
pub struct ZipBundleArchive {
    bytes: Vec<u8>,
}

impl ZipBundleArchive {
    pub fn open_bytes(bytes: Vec<u8>) -> Result<Self> {
        // Validate up front so `stat`/`open` can stay infallible-looking.
        zip::ZipArchive::new(Cursor::new(bytes.clone()))
            .map_err(|e| Error::Archive(e.to_string()))?;
        Ok(Self { bytes })
    }

    fn archive(&self) -> std::result::Result<zip::ZipArchive<Cursor<&[u8]>>, zip::result::ZipError> {
        zip::ZipArchive::new(Cursor::new(self.bytes.as_slice()))
    }
}

impl BundleArchive for ZipBundleArchive {
    fn stat(&self, path: &str) -> Option<u64> {
        let mut archive = self.archive().ok()?;
        archive.by_name(path).ok().map(|f| f.size())
    }

    fn open(&self, path: &str) -> Result<Vec<u8>> {
        let mut archive = self.archive().map_err(|e| Error::Archive(e.to_string()))?;
        let mut file = archive
            .by_name(path)
            .map_err(|e| Error::Archive(format!("{path}: {e}")))?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Known bundle-relative paths (§6).
pub const WASM_PATH: &str = "bin/app.wasm";
pub const CONFIG_PATH: &str = "bin/.config";
/// Priority-ordered fallback images for the error-splash state machine (§4.9).
pub const FALLBACK_IMAGE_PATHS: &[&str] =
    &["resource/shared/fallback.png", "resource/shared/fallback.jpg"];

/// An open archive rooted at one file or stream, plus a mount bit.
/// At most one bundle is mounted as the app root at any time; files within
/// a bundle are read-only; closing a mounted bundle fails.
pub struct BundleHandle {
    archive: Box<dyn BundleArchive>,
    mounted: AtomicBool,
}

impl BundleHandle {
    #[must_use]
    pub fn new(archive: Box<dyn BundleArchive>) -> Self {
        Self {
            archive,
            mounted: AtomicBool::new(false),
        }
    }

    pub fn mount(&self) -> Result<()> {
        if self.mounted.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyMounted);
        }
        Ok(())
    }

    /// Unmounting is idempotent-against-unmounted but, unlike `heap.free`,
    /// closing a handle that is still mounted is always a hard error.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    pub fn close(&self) -> Result<()> {
        if self.mounted.load(Ordering::Acquire) {
            return Err(Error::CloseWhileMounted);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub fn read_wasm(&self) -> Result<Vec<u8>> {
        self.archive.open(WASM_PATH)
    }

    #[must_use]
    pub fn read_config(&self) -> Option<Vec<u8>> {
        self.archive.open(CONFIG_PATH).ok()
    }

    /// Walks the fixed priority list, returning the first fallback image
    /// present.
    #[must_use]
    pub fn first_fallback_image(&self) -> Option<(&'static str, Vec<u8>)> {
        FALLBACK_IMAGE_PATHS
            .iter()
            .find_map(|&path| self.archive.open(path).ok().map(|bytes| (path, bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn mount_unmount_close_lifecycle() {
        let zip = make_zip(&[(WASM_PATH, b"(module)")]);
        let archive = ZipBundleArchive::open_bytes(zip).unwrap();
        let handle = BundleHandle::new(Box::new(archive));
        handle.mount().unwrap();
        assert!(handle.mount().is_err());
        assert!(handle.close().is_err(), "closing a mounted bundle fails");
        handle.unmount();
        handle.close().unwrap();
    }

    #[test]
    fn fallback_priority_picks_first_present() {
        let zip = make_zip(&[(WASM_PATH, b"x"), ("resource/shared/fallback.jpg", b"jpgdata")]);
        let archive = ZipBundleArchive::open_bytes(zip).unwrap();
        let handle = BundleHandle::new(Box::new(archive));
        let (path, bytes) = handle.first_fallback_image().unwrap();
        assert_eq!(path, "resource/shared/fallback.jpg");
        assert_eq!(bytes, b"jpgdata");
    }
}
