//! Error types for the VXGI pipeline.

/// Errors raised while configuring or loading the VXGI pipeline.
///
/// Program and entry-point errors are configuration-fatal: they are reported
/// once when the render plugin finishes and the pipeline then stays disabled.
#[derive(Debug)]
pub enum VxgiError {
    /// A required GPU program was not registered
    MissingProgram(String),
    /// A GPU program does not declare a required entry point
    MissingEntryPoint { program: String, entry_point: String },
    /// A compute entry point has no usable `@workgroup_size` attribute
    InvalidWorkgroupSize { entry_point: String, reason: String },
    /// Configuration value out of range
    InvalidConfig(String),
    /// A volume buffer is larger than the device can bind
    ExceedsDeviceLimits {
        buffer: &'static str,
        bytes: u64,
        limit: u64,
    },
    /// File system error while reading a config file
    Io(std::io::Error),
    /// Config file is not valid JSON for [`crate::VxgiConfig`]
    Json(String),
}

impl std::fmt::Display for VxgiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VxgiError::MissingProgram(name) => write!(f, "Missing GPU program: {}", name),
            VxgiError::MissingEntryPoint {
                program,
                entry_point,
            } => write!(
                f,
                "GPU program '{}' has no entry point '{}'",
                program, entry_point
            ),
            VxgiError::InvalidWorkgroupSize {
                entry_point,
                reason,
            } => write!(
                f,
                "Invalid workgroup size for '{}': {}",
                entry_point, reason
            ),
            VxgiError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            VxgiError::ExceedsDeviceLimits {
                buffer,
                bytes,
                limit,
            } => write!(
                f,
                "{} buffer needs {} bytes, device binds at most {}",
                buffer, bytes, limit
            ),
            VxgiError::Io(e) => write!(f, "IO error: {}", e),
            VxgiError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for VxgiError {}

impl From<std::io::Error> for VxgiError {
    fn from(e: std::io::Error) -> Self {
        VxgiError::Io(e)
    }
}

impl From<serde_json::Error> for VxgiError {
    fn from(e: serde_json::Error) -> Self {
        VxgiError::Json(e.to_string())
    }
}

/// Result type for VXGI operations.
pub type VxgiResult<T> = Result<T, VxgiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_program_and_entry_point() {
        let err = VxgiError::MissingEntryPoint {
            program: "vxgi_mipmapper".into(),
            entry_point: "shift".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("vxgi_mipmapper"));
        assert!(msg.contains("shift"));
    }

    #[test]
    fn test_display_names_oversized_buffer() {
        let err = VxgiError::ExceedsDeviceLimits {
            buffer: "fragment",
            bytes: 200,
            limit: 100,
        };
        assert_eq!(err.to_string(), "fragment buffer needs 200 bytes, device binds at most 100");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VxgiError = io.into();
        assert!(matches!(err, VxgiError::Io(_)));
    }
}
