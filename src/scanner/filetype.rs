//! File type sniffing from magic bytes.
//!
//! Detection only looks at content; the declared extension is compared
//! against the sniffed type separately by the heuristic scorer.

use serde::{Deserialize, Serialize};

/// Sniffed content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// Windows executable (PE format)
    Executable,
    /// ELF binary (Linux)
    Elf,
    /// Mach-O binary (macOS)
    MachO,
    /// ZIP container (also JAR, DOCX, APK ...)
    Zip,
    /// RAR archive
    Rar,
    /// 7-Zip archive
    SevenZip,
    /// GZIP compressed
    Gzip,
    /// BZIP2 compressed
    Bzip2,
    /// XZ compressed
    Xz,
    /// PDF document
    Pdf,
    /// PNG image
    Png,
    /// JPEG image
    Jpeg,
    /// GIF image
    Gif,
    /// OLE compound document (legacy Office, MSI)
    OfficeOle,
    /// HTML document
    Html,
    /// XML document
    Xml,
    /// Shell, batch, PowerShell or VBScript source
    Script,
    /// Plain text
    Text,
    /// Binary data (unknown format)
    Binary,
    /// Too short to tell
    Unknown,
}

impl FileType {
    /// Check if this file type is directly executable.
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            FileType::Executable | FileType::Elf | FileType::MachO | FileType::Script
        )
    }

    /// Check if this file type is an archive or compressed stream.
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            FileType::Zip
                | FileType::Rar
                | FileType::SevenZip
                | FileType::Gzip
                | FileType::Bzip2
                | FileType::Xz
        )
    }

    /// Extensions a file of this type is expected to carry.
    ///
    /// An empty list means the type places no constraint on the extension.
    pub fn canonical_extensions(&self) -> &'static [&'static str] {
        match self {
            FileType::Executable => &[
                "exe", "dll", "sys", "scr", "com", "cpl", "ocx", "drv", "efi", "mui", "ax",
            ],
            FileType::Elf => &["elf", "so", "o", "ko", "bin", "out", "axf", "prx"],
            FileType::Zip => &[
                "zip", "jar", "war", "ear", "apk", "aar", "docx", "xlsx", "pptx", "docm",
                "xlsm", "pptm", "odt", "ods", "odp", "epub", "whl", "nupkg", "vsix", "xpi",
                "ipa", "kmz",
            ],
            FileType::Rar => &["rar"],
            FileType::SevenZip => &["7z"],
            FileType::Gzip => &["gz", "tgz"],
            FileType::Bzip2 => &["bz2", "tbz", "tbz2"],
            FileType::Xz => &["xz", "txz"],
            FileType::Pdf => &["pdf"],
            FileType::Png => &["png"],
            FileType::Jpeg => &["jpg", "jpeg", "jpe", "jfif"],
            FileType::Gif => &["gif"],
            FileType::OfficeOle => &["doc", "xls", "ppt", "msi", "msg", "vsd", "pub", "dot", "xlt"],
            FileType::MachO
            | FileType::Html
            | FileType::Xml
            | FileType::Script
            | FileType::Text
            | FileType::Binary
            | FileType::Unknown => &[],
        }
    }

    /// Whether `extension` contradicts this type.
    ///
    /// A missing extension never contradicts.
    pub fn mismatches(&self, extension: Option<&str>) -> bool {
        let canonical = self.canonical_extensions();
        match extension {
            Some(ext) if !canonical.is_empty() => !canonical.contains(&ext),
            _ => false,
        }
    }

    /// Get MIME type string.
    pub fn mime_type(&self) -> &'static str {
        match self {
            FileType::Executable => "application/vnd.microsoft.portable-executable",
            FileType::Elf => "application/x-executable",
            FileType::MachO => "application/x-mach-binary",
            FileType::Zip => "application/zip",
            FileType::Rar => "application/vnd.rar",
            FileType::SevenZip => "application/x-7z-compressed",
            FileType::Gzip => "application/gzip",
            FileType::Bzip2 => "application/x-bzip2",
            FileType::Xz => "application/x-xz",
            FileType::Pdf => "application/pdf",
            FileType::Png => "image/png",
            FileType::Jpeg => "image/jpeg",
            FileType::Gif => "image/gif",
            FileType::OfficeOle => "application/x-ole-storage",
            FileType::Html => "text/html",
            FileType::Xml => "application/xml",
            FileType::Script => "text/x-script",
            FileType::Text => "text/plain",
            FileType::Binary | FileType::Unknown => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Executable => write!(f, "Windows Executable"),
            FileType::Elf => write!(f, "ELF Binary"),
            FileType::MachO => write!(f, "Mach-O Binary"),
            FileType::Zip => write!(f, "ZIP Archive"),
            FileType::Rar => write!(f, "RAR Archive"),
            FileType::SevenZip => write!(f, "7-Zip Archive"),
            FileType::Gzip => write!(f, "GZIP Compressed"),
            FileType::Bzip2 => write!(f, "BZIP2 Compressed"),
            FileType::Xz => write!(f, "XZ Compressed"),
            FileType::Pdf => write!(f, "PDF Document"),
            FileType::Png => write!(f, "PNG Image"),
            FileType::Jpeg => write!(f, "JPEG Image"),
            FileType::Gif => write!(f, "GIF Image"),
            FileType::OfficeOle => write!(f, "OLE Compound Document"),
            FileType::Html => write!(f, "HTML Document"),
            FileType::Xml => write!(f, "XML Document"),
            FileType::Script => write!(f, "Script"),
            FileType::Text => write!(f, "Plain Text"),
            FileType::Binary => write!(f, "Binary Data"),
            FileType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Bytes inspected when sniffing text-like content.
const SNIFF_WINDOW: usize = 512;

/// File type detector using magic bytes.
pub struct FileTypeDetector;

impl FileTypeDetector {
    /// Detect file type from leading content bytes.
    pub fn detect_from_bytes(bytes: &[u8]) -> FileType {
        if bytes.len() < 2 {
            return FileType::Unknown;
        }

        if bytes.starts_with(b"MZ") || bytes.starts_with(b"ZM") {
            return FileType::Executable;
        }

        if bytes.starts_with(b"\x7fELF") {
            return FileType::Elf;
        }

        if bytes.len() >= 4 {
            let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if matches!(magic, 0xFEEDFACE | 0xFEEDFACF | 0xCEFAEDFE | 0xCFFAEDFE) {
                return FileType::MachO;
            }
        }

        if bytes.starts_with(b"PK\x03\x04")
            || bytes.starts_with(b"PK\x05\x06")
            || bytes.starts_with(b"PK\x07\x08")
        {
            return FileType::Zip;
        }

        if bytes.starts_with(b"Rar!") {
            return FileType::Rar;
        }

        if bytes.starts_with(b"7z\xbc\xaf\x27\x1c") {
            return FileType::SevenZip;
        }

        if bytes.starts_with(b"\x1f\x8b") {
            return FileType::Gzip;
        }

        if bytes.starts_with(b"BZh") {
            return FileType::Bzip2;
        }

        if bytes.starts_with(b"\xfd7zXZ\x00") {
            return FileType::Xz;
        }

        if bytes.starts_with(b"%PDF") {
            return FileType::Pdf;
        }

        if bytes.starts_with(b"\x89PNG") {
            return FileType::Png;
        }

        if bytes.starts_with(b"\xff\xd8\xff") {
            return FileType::Jpeg;
        }

        if bytes.starts_with(b"GIF8") {
            return FileType::Gif;
        }

        if bytes.starts_with(b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1") {
            return FileType::OfficeOle;
        }

        let head = &bytes[..bytes.len().min(SNIFF_WINDOW)];

        if bytes.starts_with(b"<?xml") || bytes.starts_with(b"\xef\xbb\xbf<?xml") {
            return FileType::Xml;
        }

        if Self::looks_like_html(head) {
            return FileType::Html;
        }

        if Self::looks_like_script(head) {
            return FileType::Script;
        }

        if Self::is_likely_text(head) {
            return FileType::Text;
        }

        FileType::Binary
    }

    /// Check if bytes look like HTML.
    fn looks_like_html(bytes: &[u8]) -> bool {
        let lower = String::from_utf8_lossy(bytes).to_lowercase();
        lower.contains("<!doctype html")
            || lower.contains("<html")
            || lower.contains("<head")
            || lower.contains("<body")
    }

    /// Check if bytes look like a script.
    fn looks_like_script(bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes);
        let lower = text.to_lowercase();

        text.starts_with("#!")
            || lower.contains("@echo off")
            || lower.starts_with("rem ")
            || lower.contains("$psscriptroot")
            || lower.contains("write-host")
            || lower.contains("wscript.")
            || lower.contains("createobject(")
    }

    /// Check if bytes are likely text (not binary).
    fn is_likely_text(bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }

        let non_text_count = bytes
            .iter()
            .filter(|&&b| !(b == 9 || b == 10 || b == 13 || (32..=126).contains(&b) || b >= 128))
            .count();

        // More than 10% control bytes means binary
        (non_text_count as f64 / bytes.len() as f64) < 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pe_detection() {
        let pe_header = b"MZ\x90\x00\x03\x00\x00\x00\x04\x00\x00\x00";
        assert_eq!(
            FileTypeDetector::detect_from_bytes(pe_header),
            FileType::Executable
        );
    }

    #[test]
    fn test_archive_magic() {
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"PK\x03\x04\x14\x00\x00\x00"),
            FileType::Zip
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"Rar!\x1a\x07\x00"),
            FileType::Rar
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"7z\xbc\xaf\x27\x1c\x00\x04"),
            FileType::SevenZip
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"BZh91AY&SY"),
            FileType::Bzip2
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"\xfd7zXZ\x00\x00"),
            FileType::Xz
        );
    }

    #[test]
    fn test_document_and_image_magic() {
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3"),
            FileType::Pdf
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"\x89PNG\r\n\x1a\n"),
            FileType::Png
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"\xff\xd8\xff\xe0\x00\x10JFIF"),
            FileType::Jpeg
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"GIF89a"),
            FileType::Gif
        );
    }

    #[test]
    fn test_elf_detection() {
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"\x7fELF\x02\x01\x01\x00"),
            FileType::Elf
        );
    }

    #[test]
    fn test_text_and_script() {
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"just some notes\n"),
            FileType::Text
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"#!/bin/sh\necho hi\n"),
            FileType::Script
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(b"<!DOCTYPE html><html></html>"),
            FileType::Html
        );
        assert_eq!(
            FileTypeDetector::detect_from_bytes(&[0u8, 1, 2, 3, 4, 5, 6, 7]),
            FileType::Binary
        );
        assert_eq!(FileTypeDetector::detect_from_bytes(b""), FileType::Unknown);
    }

    #[test]
    fn test_mismatch_rules() {
        assert!(FileType::Executable.mismatches(Some("pdf")));
        assert!(!FileType::Executable.mismatches(Some("dll")));
        assert!(!FileType::Executable.mismatches(None));
        assert!(!FileType::Text.mismatches(Some("exe")));
        assert!(!FileType::Binary.mismatches(Some("pdf")));
        assert!(!FileType::Unknown.mismatches(Some("jpg")));
        assert!(FileType::Png.mismatches(Some("jpg")));
        assert!(!FileType::Zip.mismatches(Some("docx")));
    }

    #[test]
    fn test_executable_check() {
        assert!(FileType::Executable.is_executable());
        assert!(FileType::Script.is_executable());
        assert!(!FileType::Zip.is_executable());
        assert!(!FileType::Pdf.is_executable());
    }

    #[test]
    fn test_archive_check() {
        assert!(FileType::Zip.is_archive());
        assert!(FileType::Xz.is_archive());
        assert!(!FileType::Executable.is_archive());
    }
}
