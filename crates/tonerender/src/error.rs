use crate::shaders::ShaderStage;

/// Program build failures. Fatal for the surface that hit them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShaderError {
    #[error("{stage} shader failed to compile: {message}")]
    Compile { stage: ShaderStage, message: String },
    #[error("shader program failed to link: {0}")]
    Link(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("texture error: {0}")]
    Texture(String),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("unknown {kind} handle #{id}")]
    UnknownHandle { kind: &'static str, id: u64 },
}

/// Non-fatal: the surface keeps its placeholder and the caller may retry
/// with another URI.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TextureLoadError {
    #[error("failed to fetch {uri}: {message}")]
    Fetch { uri: String, message: String },
    #[error("failed to decode {uri}: {message}")]
    Decode { uri: String, message: String },
    #[error("{uri} is {width}x{height}, larger than the {limit}px texture limit")]
    TooLarge {
        uri: String,
        width: u32,
        height: u32,
        limit: u32,
    },
    #[error("load of {uri} was cancelled")]
    Cancelled { uri: String },
}

impl TextureLoadError {
    pub fn uri(&self) -> &str {
        match self {
            TextureLoadError::Fetch { uri, .. }
            | TextureLoadError::Decode { uri, .. }
            | TextureLoadError::TooLarge { uri, .. }
            | TextureLoadError::Cancelled { uri } => uri,
        }
    }
}
