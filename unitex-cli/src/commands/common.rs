//! Common types and helpers shared across CLI commands.

use clap::ValueEnum;
use unitex::{ContainerTarget, EncodingKind, TextureType, TranscodeTarget};

use crate::error::CliError;

/// Universal encoding selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EncodingArg {
    /// ETC1S: smaller files via shared codebooks
    Etc1s,
    /// UASTC: larger files, higher quality
    Uastc,
}

impl From<EncodingArg> for EncodingKind {
    fn from(value: EncodingArg) -> Self {
        match value {
            EncodingArg::Etc1s => EncodingKind::Etc1s,
            EncodingArg::Uastc => EncodingKind::Uastc,
        }
    }
}

/// Output container selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ContainerArg {
    /// Legacy flat container (.utex)
    Legacy,
    /// KTX2 (.ktx2)
    Ktx2,
}

impl From<ContainerArg> for ContainerTarget {
    fn from(value: ContainerArg) -> Self {
        match value {
            ContainerArg::Legacy => ContainerTarget::Legacy,
            ContainerArg::Ktx2 => ContainerTarget::Ktx2,
        }
    }
}

/// Texture type selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum TextureTypeArg {
    /// Independent 2D images
    TwoD,
    /// One 2D array texture from all sources
    Array,
    /// Cubemaps: six faces per layer, in face order
    Cubemap,
    /// Video frames in presentation order
    Video,
}

impl From<TextureTypeArg> for TextureType {
    fn from(value: TextureTypeArg) -> Self {
        match value {
            TextureTypeArg::TwoD => TextureType::TwoD,
            TextureTypeArg::Array => TextureType::TwoDArray,
            TextureTypeArg::Cubemap => TextureType::CubemapArray,
            TextureTypeArg::Video => TextureType::VideoFrames,
        }
    }
}

/// Resolve a format name as printed in reports (e.g. `BC7_RGBA`).
pub fn parse_target(name: &str) -> Result<TranscodeTarget, CliError> {
    TranscodeTarget::ALL
        .into_iter()
        .find(|t| t.short_name().eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            let known: Vec<&str> = TranscodeTarget::ALL.iter().map(|t| t.short_name()).collect();
            CliError::Args(format!(
                "unknown format '{name}'; known formats: {}",
                known.join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_case_insensitive() {
        assert_eq!(parse_target("bc7_rgba").unwrap(), TranscodeTarget::Bc7Rgba);
        assert_eq!(parse_target("ETC1_RGB").unwrap(), TranscodeTarget::Etc1Rgb);
    }

    #[test]
    fn test_parse_target_rejects_unknown() {
        assert!(matches!(parse_target("DXT9"), Err(CliError::Args(_))));
    }
}
