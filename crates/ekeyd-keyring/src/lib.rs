//! File-backed serial-number to long-term-key mapping.
//!
//! Entries are kept in memory in a small `Vec` — lookups are linear, which
//! is fine for the handful of devices a single host ever attaches. The file
//! format is one `<16 Base64 chars serial> <44 Base64 chars LTK>` line per
//! entry; `#`-prefixed lines and blank lines are ignored. Saves are atomic:
//! write to `<path>.tmp`, flush, `rename` over `<path>`, so a crash mid-save
//! never leaves a partially written keyring on disk.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use ekeyd_core::KeyLookup;
use ekeyd_proto::pem64;

/// One serial-number to long-term-key mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyringEntry {
    /// The device's 12-byte serial number.
    pub serial: [u8; 12],
    /// The device's 32-byte long-term key.
    pub long_term_key: [u8; 32],
}

/// Everything that can go wrong loading or saving a keyring file.
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    /// The underlying file could not be read or written.
    #[error("keyring I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A non-comment, non-blank line didn't parse as `<serial> <ltk>`.
    #[error("malformed keyring line {line}: {text:?}")]
    MalformedLine {
        /// 1-indexed line number.
        line: usize,
        /// The offending line's contents.
        text: String,
    },
}

/// An in-memory keyring, optionally backed by a file on disk.
#[derive(Debug, Default, Clone)]
pub struct Keyring {
    entries: Vec<KeyringEntry>,
}

impl Keyring {
    /// An empty keyring, not yet backed by any file.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Loads a keyring from `path`. A missing file is treated as an empty
    /// keyring — the daemon's first run has nothing to load yet.
    pub fn load(path: &Path) -> Result<Self, KeyringError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_ascii_whitespace();
            let (Some(serial_field), Some(key_field), None) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(KeyringError::MalformedLine { line: index + 1, text: raw_line.to_string() });
            };

            let serial_bytes = pem64::decode(serial_field);
            let key_bytes = pem64::decode(key_field);
            if serial_bytes.len() != 12 || key_bytes.len() != 32 {
                return Err(KeyringError::MalformedLine { line: index + 1, text: raw_line.to_string() });
            }

            let mut serial = [0u8; 12];
            serial.copy_from_slice(&serial_bytes);
            let mut long_term_key = [0u8; 32];
            long_term_key.copy_from_slice(&key_bytes);
            entries.push(KeyringEntry { serial, long_term_key });
        }

        tracing::info!(count = entries.len(), path = %path.display(), "loaded keyring");
        Ok(Self { entries })
    }

    /// Writes the keyring to `path` atomically: a temp file in the same
    /// directory, flushed, then renamed over `path` with mode 0600.
    pub fn save(&self, path: &Path) -> Result<(), KeyringError> {
        let mut contents = String::new();
        contents.push_str("# serial long-term-key\n");
        for entry in &self.entries {
            contents.push_str(&pem64::encode(&entry.serial));
            contents.push(' ');
            contents.push_str(&pem64::encode(&entry.long_term_key));
            contents.push('\n');
        }

        let tmp_path = tmp_path_for(path);
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            set_owner_only_permissions(&file)?;
        }
        fs::rename(&tmp_path, path)?;
        tracing::info!(count = self.entries.len(), path = %path.display(), "saved keyring");
        Ok(())
    }

    /// Adds or replaces the entry for `serial`.
    pub fn upsert(&mut self, serial: [u8; 12], long_term_key: [u8; 32]) {
        if let Some(existing) = self.entries.iter_mut().find(|entry| entry.serial == serial) {
            existing.long_term_key = long_term_key;
        } else {
            self.entries.push(KeyringEntry { serial, long_term_key });
        }
    }

    /// All entries currently held, in no particular order.
    #[must_use]
    pub fn entries(&self) -> &[KeyringEntry] {
        &self.entries
    }
}

impl KeyLookup for Keyring {
    fn find(&self, serial: &[u8; 12]) -> Option<[u8; 32]> {
        self.entries.iter().find(|entry| &entry.serial == serial).map(|entry| entry.long_term_key)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(unix)]
fn set_owner_only_permissions(file: &fs::File) -> Result<(), KeyringError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_file: &fs::File) -> Result<(), KeyringError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyring");

        let mut keyring = Keyring::new();
        keyring.upsert([1; 12], [2; 32]);
        keyring.upsert([3; 12], [4; 32]);
        keyring.save(&path).unwrap();

        let reloaded = Keyring::load(&path).unwrap();
        assert_eq!(reloaded.find(&[1; 12]), Some([2; 32]));
        assert_eq!(reloaded.find(&[3; 12]), Some([4; 32]));
        assert_eq!(reloaded.entries().len(), 2);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        let keyring = Keyring::load(&path).unwrap();
        assert!(keyring.entries().is_empty());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyring");
        let serial = pem64::encode(&[5u8; 12]);
        let key = pem64::encode(&[6u8; 32]);
        fs::write(&path, format!("# a comment\n\n{serial} {key}\n")).unwrap();

        let keyring = Keyring::load(&path).unwrap();
        assert_eq!(keyring.find(&[5; 12]), Some([6; 32]));
    }

    #[test]
    fn malformed_line_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyring");
        fs::write(&path, "not-a-valid-line\n").unwrap();
        assert!(Keyring::load(&path).is_err());
    }

    #[test]
    fn save_never_leaves_a_stray_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyring");
        let mut keyring = Keyring::new();
        keyring.upsert([1; 12], [2; 32]);
        keyring.save(&path).unwrap();
        assert!(!tmp_path_for(&path).exists());
        assert!(path.exists());
    }
}
