// SPDX-License-Identifier: MPL-2.0

//! Error types for the renderer
//!
//! GPU processors report failures as `Result<_, String>`; the types here
//! cover the renderer surface, configuration, content and eye extraction.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main renderer error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// GPU device and resource errors
    Gpu(GpuError),
    /// Configuration errors
    Config(ConfigError),
    /// Content bundle errors
    Content(ContentError),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// GPU-specific errors
#[derive(Debug, Clone)]
pub enum GpuError {
    /// No adapter matched the request
    NoAdapter(String),
    /// Device creation failed
    DeviceCreation(String),
    /// Device was lost while rendering
    DeviceLost(String),
    /// Buffer, texture or pipeline could not be created
    ResourceAllocation(String),
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Reading the config file failed
    Read(String),
    /// The config file is not valid JSON for [`crate::config::RendererConfig`]
    Parse(String),
    /// A value is out of range
    Invalid(String),
}

/// Content bundle errors
#[derive(Debug, Clone)]
pub enum ContentError {
    /// Lookup table image has the wrong shape
    InvalidLookupTable(String),
    /// Image decoding failed
    ImageLoad(String),
    /// A swap was requested while another one is in progress
    SwapInProgress,
    /// `complete_swap` was called without a pending swap
    NoSwapPending,
}

/// Eye-region extraction failures
///
/// Any of these aborts extraction for the frame; both eyes are then
/// reported as unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// Padded eye box has zero width or height
    ZeroArea,
    /// Aligned crop region leaves the source texture
    OutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },
    /// Aligned crop does not fit the per-eye scratch buffer
    ScratchTooSmall { required: u64, available: u64 },
    /// Scratch readback failed
    Readback(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Gpu(e) => write!(f, "GPU error: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Content(e) => write!(f, "Content error: {}", e),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter(msg) => write!(f, "No suitable GPU adapter: {}", msg),
            GpuError::DeviceCreation(msg) => write!(f, "Failed to create GPU device: {}", msg),
            GpuError::DeviceLost(msg) => write!(f, "GPU device lost: {}", msg),
            GpuError::ResourceAllocation(msg) => write!(f, "GPU allocation failed: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(msg) => write!(f, "Failed to read config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentError::InvalidLookupTable(msg) => write!(f, "Invalid lookup table: {}", msg),
            ContentError::ImageLoad(msg) => write!(f, "Failed to load image: {}", msg),
            ContentError::SwapInProgress => write!(f, "Content swap already in progress"),
            ContentError::NoSwapPending => write!(f, "No content swap pending"),
        }
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::ZeroArea => write!(f, "Eye region has zero area"),
            ExtractionError::OutOfBounds {
                x,
                y,
                width,
                height,
            } => write!(
                f,
                "Eye region {}x{} at ({}, {}) exceeds source texture",
                width, height, x, y
            ),
            ExtractionError::ScratchTooSmall {
                required,
                available,
            } => write!(
                f,
                "Eye region needs {} bytes, scratch buffer holds {}",
                required, available
            ),
            ExtractionError::Readback(msg) => write!(f, "Eye region readback failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for GpuError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ContentError {}
impl std::error::Error for ExtractionError {}

// Conversions from sub-errors to AppError
impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Gpu(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        AppError::Content(err)
    }
}

// GPU processors report plain strings
impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Read(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<image::ImageError> for ContentError {
    fn from(err: image::ImageError) -> Self {
        ContentError::ImageLoad(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nests_sub_errors() {
        let err: AppError = GpuError::NoAdapter("none".into()).into();
        assert_eq!(err.to_string(), "GPU error: No suitable GPU adapter: none");

        let err: AppError = ContentError::SwapInProgress.into();
        assert_eq!(err.to_string(), "Content error: Content swap already in progress");
    }

    #[test]
    fn test_extraction_error_display() {
        let err = ExtractionError::OutOfBounds {
            x: 10,
            y: -4,
            width: 64,
            height: 64,
        };
        assert_eq!(
            err.to_string(),
            "Eye region 64x64 at (10, -4) exceeds source texture"
        );
    }

    #[test]
    fn test_serde_error_is_parse_error() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(matches!(ConfigError::from(err), ConfigError::Parse(_)));
    }
}
