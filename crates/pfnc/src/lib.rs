#![cfg_attr(docsrs, feature(doc_cfg))]
//! Pixel Format Naming Convention (PFNC) codes.
//!
//! Only the formats the simulated cameras in this workspace can report are
//! covered; the full PFNC table defines several hundred more.

#![allow(dead_code)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A raw PFNC pixel format code, as carried in a GVSP leader packet or the
/// `PIXEL_FORMAT` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelFormatCode(pub u32);

impl PixelFormatCode {
    /// Return the raw PFNC code.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Pixel formats the simulated cameras can report, and the host pipeline
/// formats they correspond to (`Mono8` ↔ `GRAY8`, `Mono16` ↔ `GRAY16_LE`,
/// `Rgb8` ↔ packed `RGB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Rgb8,
}

impl PixelFormat {
    /// PFNC code for this pixel format.
    pub const fn code(self) -> PixelFormatCode {
        match self {
            PixelFormat::Mono8 => PixelFormatCode(0x0108_0001),
            PixelFormat::Mono16 => PixelFormatCode(0x0110_0007),
            PixelFormat::Rgb8 => PixelFormatCode(0x0218_0014),
        }
    }

    /// Bytes per pixel.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Parse a GenICam `PixelFormat` enum name (`"Mono8"`, `"Mono16"`,
    /// `"RGB8"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Mono8" => Some(PixelFormat::Mono8),
            "Mono16" => Some(PixelFormat::Mono16),
            "RGB8" => Some(PixelFormat::Rgb8),
            _ => None,
        }
    }

    /// Decode a raw PFNC code back into one of the formats this crate
    /// knows about.
    pub fn from_code(code: PixelFormatCode) -> Option<Self> {
        match code.0 {
            0x0108_0001 => Some(PixelFormat::Mono8),
            0x0110_0007 => Some(PixelFormat::Mono16),
            0x0218_0014 => Some(PixelFormat::Rgb8),
            _ => None,
        }
    }

    /// Map from a host pipeline format string (`"GRAY8"`, `"GRAY16_LE"`,
    /// `"RGB"`) to the matching PFNC format.
    pub fn from_pipeline_format(format: &str) -> Option<Self> {
        match format {
            "GRAY8" => Some(PixelFormat::Mono8),
            "GRAY16_LE" => Some(PixelFormat::Mono16),
            "RGB" => Some(PixelFormat::Rgb8),
            _ => None,
        }
    }

    /// Map to the host pipeline format string this PFNC format corresponds
    /// to.
    pub const fn pipeline_format(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "GRAY8",
            PixelFormat::Mono16 => "GRAY16_LE",
            PixelFormat::Rgb8 => "RGB",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for fmt in [PixelFormat::Mono8, PixelFormat::Mono16, PixelFormat::Rgb8] {
            assert_eq!(PixelFormat::from_code(fmt.code()), Some(fmt));
        }
    }

    #[test]
    fn name_parsing() {
        assert_eq!(PixelFormat::from_name("Mono8"), Some(PixelFormat::Mono8));
        assert_eq!(PixelFormat::from_name("RGB8"), Some(PixelFormat::Rgb8));
        assert_eq!(PixelFormat::from_name("Bayer"), None);
    }

    #[test]
    fn pipeline_format_roundtrip() {
        for fmt in [PixelFormat::Mono8, PixelFormat::Mono16, PixelFormat::Rgb8] {
            assert_eq!(
                PixelFormat::from_pipeline_format(fmt.pipeline_format()),
                Some(fmt)
            );
        }
    }
}
