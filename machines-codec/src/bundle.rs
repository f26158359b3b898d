//! Bundle directories.
//!
//! A machine lives in a directory named `<Name>.machine`. The directory holds
//! `machine.json` and a `machine.json.crc` file with its CRC32C checksum.

use crate::error::CodecError;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BUNDLE_EXTENSION: &str = "machine";
pub const MACHINE_FILE: &str = "machine.json";
pub const CHECKSUM_FILE: &str = "machine.json.crc";

/// Hex CRC32C of `data`.
pub fn checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

/// Location of the bundle for machine `name` inside `dir`.
pub fn bundle_location(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.{BUNDLE_EXTENSION}"))
}

/// The files of one bundle, keyed by file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub location: PathBuf,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.files.insert(name.into(), data);
        self
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Returns `machine.json`, verified against its checksum file when present.
    pub fn machine_data(&self) -> Result<&[u8], CodecError> {
        let data = self
            .file(MACHINE_FILE)
            .ok_or_else(|| CodecError::NotABundle(self.location.clone()))?;
        match self.file(CHECKSUM_FILE) {
            Some(expected) => {
                let expected = String::from_utf8_lossy(expected);
                let actual = checksum(data);
                if expected.trim() != actual {
                    return Err(CodecError::Corruption(format!(
                        "{} checksum mismatch: expected {}, found {}",
                        self.location.join(MACHINE_FILE).display(),
                        expected.trim(),
                        actual
                    )));
                }
            }
            None => {
                tracing::warn!("Bundle {} has no checksum file", self.location.display());
            }
        }
        Ok(data)
    }

    /// Reads every regular file of the bundle directory.
    pub fn read(location: impl AsRef<Path>) -> Result<Self, CodecError> {
        let location = location.as_ref();
        if !location.is_dir() {
            return Err(CodecError::NotABundle(location.to_path_buf()));
        }
        let mut bundle = Bundle::new(location);
        for entry in fs::read_dir(location)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            bundle.files.insert(name, fs::read(entry.path())?);
        }
        Ok(bundle)
    }

    /// Writes every file, creating the directory if needed.
    pub fn write(&self) -> Result<(), CodecError> {
        fs::create_dir_all(&self.location)?;
        for (name, data) in &self.files {
            let mut file = File::create(self.location.join(name))?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        tracing::info!(
            "Wrote bundle {} ({} files)",
            self.location.display(),
            self.files.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_bundle_location() {
        assert_eq!(
            bundle_location("/tmp/machines", "Pump"),
            PathBuf::from("/tmp/machines/Pump.machine")
        );
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let data = br#"{"dialect":"ucfsm"}"#.to_vec();
        let bundle = Bundle::new(dir.path().join("A.machine"))
            .with_file(CHECKSUM_FILE, checksum(&data).into_bytes())
            .with_file(MACHINE_FILE, data.clone());
        bundle.write().unwrap();

        let read = Bundle::read(&bundle.location).unwrap();
        assert_eq!(read, bundle);
        assert_eq!(read.machine_data().unwrap(), data.as_slice());
    }

    #[test]
    fn test_checksum_mismatch() {
        let bundle = Bundle::new("B.machine")
            .with_file(MACHINE_FILE, b"{}".to_vec())
            .with_file(CHECKSUM_FILE, b"00000000".to_vec());
        assert!(matches!(bundle.machine_data(), Err(CodecError::Corruption(_))));
    }

    #[test]
    fn test_missing_checksum_accepted() {
        let bundle = Bundle::new("C.machine").with_file(MACHINE_FILE, b"{}".to_vec());
        assert_eq!(bundle.machine_data().unwrap(), b"{}");
    }

    #[test]
    fn test_not_a_bundle() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("Missing.machine");
        assert!(matches!(Bundle::read(&missing), Err(CodecError::NotABundle(_))));

        let empty = Bundle::new(dir.path());
        assert!(matches!(empty.machine_data(), Err(CodecError::NotABundle(_))));
    }
}
