//! Packer/protector detection for identifying obfuscated executables.
//!
//! Packers leave marker strings (section names, stub banners) in the PE
//! header and section table. Only that leading window is inspected.
//!
//! Common packers: UPX, ASPack, Themida, VMProtect, PECompact

use crate::scanner::filetype::FileType;

/// Size of the header window searched for packer markers.
pub const HEADER_WINDOW: usize = 1024;

/// Points awarded when a packer is identified.
pub const PACKER_POINTS: u8 = 20;

/// Information about a detected packer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerInfo {
    /// Packer name
    pub name: String,
    /// Offset of the marker that identified it
    pub offset: usize,
    /// Whether this packer is commonly used for malware
    pub malware_associated: bool,
}

/// Packer fingerprint.
struct PackerSignature {
    name: &'static str,
    /// Marker byte strings; any one identifies the packer
    markers: &'static [&'static [u8]],
    malware_associated: bool,
}

/// Packer detector.
pub struct PackerDetector {
    signatures: Vec<PackerSignature>,
    window: usize,
}

impl Default for PackerDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PackerDetector {
    /// Create a new packer detector with default signatures.
    pub fn new() -> Self {
        Self {
            signatures: Self::default_signatures(),
            window: HEADER_WINDOW,
        }
    }

    /// Default packer signatures.
    fn default_signatures() -> Vec<PackerSignature> {
        vec![
            // UPX - legitimate open-source packer, commonly used
            PackerSignature {
                name: "UPX",
                markers: &[b"UPX0", b"UPX1", b"UPX!", b"UPX"],
                malware_associated: false,
            },
            PackerSignature {
                name: "PECompact",
                markers: &[b"PEC2", b"PECompact"],
                malware_associated: true,
            },
            PackerSignature {
                name: "ASPack",
                markers: &[b".aspack", b".adata", b"ASPack"],
                malware_associated: true,
            },
            PackerSignature {
                name: "NSPack",
                markers: &[b".nsp0", b".nsp1", b"nsp0", b"NSPack"],
                malware_associated: true,
            },
            PackerSignature {
                name: "Petite",
                markers: &[b".petite", b"Petite"],
                malware_associated: true,
            },
            PackerSignature {
                name: "MEW",
                markers: &[b"MEW"],
                malware_associated: true,
            },
            PackerSignature {
                name: "FSG",
                markers: &[b"FSG!", b"FSG"],
                malware_associated: true,
            },
            PackerSignature {
                name: "MPRESS",
                markers: &[b".MPRESS1", b".MPRESS2", b"MPRESS"],
                malware_associated: true,
            },
            // Themida / WinLicense
            PackerSignature {
                name: "Themida",
                markers: &[b".themida", b".winlic", b"Themida"],
                malware_associated: true,
            },
            PackerSignature {
                name: "VMProtect",
                markers: &[b".vmp0", b".vmp1", b"VMProtect"],
                malware_associated: true,
            },
        ]
    }

    /// Whether packer markers are meaningful for this content type.
    pub fn applies_to(content_type: FileType) -> bool {
        matches!(content_type, FileType::Executable | FileType::Elf)
    }

    /// Look for a packer marker in the header window of `data`.
    pub fn detect(&self, data: &[u8]) -> Option<PackerInfo> {
        let header = &data[..data.len().min(self.window)];

        for sig in &self.signatures {
            for marker in sig.markers {
                if let Some(offset) = find(header, marker) {
                    return Some(PackerInfo {
                        name: sig.name.to_string(),
                        offset,
                        malware_associated: sig.malware_associated,
                    });
                }
            }
        }
        None
    }

    /// Check if a packer is commonly associated with malware.
    pub fn is_malware_packer(name: &str) -> bool {
        let lower = name.to_lowercase();
        Self::default_signatures()
            .iter()
            .any(|sig| sig.malware_associated && lower.contains(&sig.name.to_lowercase()))
    }
}

/// First offset of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pe_with_section(name: &[u8], at: usize) -> Vec<u8> {
        let mut data = vec![0u8; 4096];
        data[..2].copy_from_slice(b"MZ");
        data[at..at + name.len()].copy_from_slice(name);
        data
    }

    #[test]
    fn test_upx_section_detection() {
        let detector = PackerDetector::new();
        let data = pe_with_section(b"UPX0", 0x1f8);

        let result = detector.detect(&data).unwrap();
        assert_eq!(result.name, "UPX");
        assert_eq!(result.offset, 0x1f8);
        assert!(!result.malware_associated);
    }

    #[test]
    fn test_themida_section_detection() {
        let detector = PackerDetector::new();
        let data = pe_with_section(b".themida", 0x220);

        let result = detector.detect(&data).unwrap();
        assert_eq!(result.name, "Themida");
        assert!(result.malware_associated);
    }

    #[test]
    fn test_marker_outside_window_ignored() {
        let detector = PackerDetector::new();
        let data = pe_with_section(b".vmp0", 2048);
        assert!(detector.detect(&data).is_none());
    }

    #[test]
    fn test_clean_pe() {
        let detector = PackerDetector::new();
        let data = pe_with_section(b".text", 0x1f8);
        assert!(detector.detect(&data).is_none());
    }

    #[test]
    fn test_applies_to() {
        assert!(PackerDetector::applies_to(FileType::Executable));
        assert!(PackerDetector::applies_to(FileType::Elf));
        assert!(!PackerDetector::applies_to(FileType::Text));
    }

    #[test]
    fn test_malware_packer_check() {
        assert!(PackerDetector::is_malware_packer("Themida"));
        assert!(PackerDetector::is_malware_packer("VMProtect"));
        assert!(!PackerDetector::is_malware_packer("UPX"));
    }
}
