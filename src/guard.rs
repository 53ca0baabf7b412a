//! Upload admission policy: size ceiling plus extension and MIME denylists.
//!
//! Only the file name and the declared MIME type are inspected, never the
//! content, so a renamed executable passes.

use std::path::Path;

use crate::error::{AppError, Result};

/// 1 GiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1 << 30;

const FORBIDDEN_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "msi", "scr", "pif", "vbs", "vbe", "js", "jse", "ws", "wsf",
    "wsc", "wsh", "ps1", "ps1xml", "ps2", "ps2xml", "psc1", "psc2", "reg", "inf", "scf", "lnk",
    "dll", "sys",
];

const FORBIDDEN_MIME_TYPES: &[&str] = &[
    "application/x-msdownload",
    "application/x-msdos-program",
    "application/x-ms-installer",
    "application/x-bat",
    "application/x-ms-shortcut",
];

#[derive(Debug, Clone, Copy)]
pub struct UploadGuard {
    max_bytes: u64,
}

impl Default for UploadGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES)
    }
}

impl UploadGuard {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Checks that can run before any byte has been received.
    pub fn check_name(&self, filename: &str, declared_mime: &str) -> Result<()> {
        if let Some(ext) = extension(filename) {
            if FORBIDDEN_EXTENSIONS.contains(&ext.as_str()) {
                return Err(AppError::Validation("Forbidden file type".to_string()));
            }
        }
        let mime = declared_mime.trim().to_ascii_lowercase();
        if FORBIDDEN_MIME_TYPES.contains(&mime.as_str()) {
            return Err(AppError::Validation("Forbidden file type".to_string()));
        }
        Ok(())
    }

    pub fn check_size(&self, size_bytes: u64) -> Result<()> {
        if size_bytes > self.max_bytes {
            return Err(AppError::Validation("File too large".to_string()));
        }
        Ok(())
    }

    pub fn validate(&self, filename: &str, declared_mime: &str, size_bytes: u64) -> Result<()> {
        self.check_size(size_bytes)?;
        self.check_name(filename, declared_mime)
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}
