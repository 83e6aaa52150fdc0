use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// MIME type assumed when a service or download does not tell us.
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Why a caller-supplied image reference could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRefError {
    #[error("image reference must be a data URL or an http(s) URL")]
    UnsupportedScheme,

    #[error("data URL is missing its payload")]
    MissingPayload,

    #[error("only base64 data URLs are supported")]
    NotBase64Encoded,

    #[error("data URL payload is not base64: {0}")]
    InvalidPayload(String),
}

/// Opaque handle to image bytes: either inline or a remote URL, never both.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageRef {
    Inline { bytes: Bytes, mime_type: String },
    Remote { url: String },
}

impl ImageRef {
    pub fn inline(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        ImageRef::Inline {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        ImageRef::Remote { url: url.into() }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImageRef::Inline { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ImageRef::Remote { url } => Some(url),
            ImageRef::Inline { .. } => None,
        }
    }

    /// Render the reference the way URL-accepting services want it: remote URLs as-is,
    /// inline payloads as `data:` URLs.
    pub fn to_request_value(&self) -> String {
        match self {
            ImageRef::Remote { url } => url.clone(),
            ImageRef::Inline { bytes, mime_type } => {
                format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
            }
        }
    }

    /// Parse either a `data:<mime>;base64,<payload>` URL or a plain `http(s)` URL.
    pub fn parse(value: &str) -> Result<Self, ImageRefError> {
        let trimmed = value.trim();
        if trimmed.starts_with("data:") {
            return Self::from_data_url(trimmed);
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(Self::remote(trimmed));
        }
        Err(ImageRefError::UnsupportedScheme)
    }

    /// Parse `data:<mime>[;param=value...];base64,<payload>`. Media-type parameters are
    /// dropped; services only take the bare type.
    pub fn from_data_url(value: &str) -> Result<Self, ImageRefError> {
        let rest = value
            .strip_prefix("data:")
            .ok_or(ImageRefError::UnsupportedScheme)?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(ImageRefError::MissingPayload)?;
        let media_type = header
            .strip_suffix(";base64")
            .ok_or(ImageRefError::NotBase64Encoded)?;
        let mime_type = media_type.split(';').next().unwrap_or_default().trim();
        let mime_type = if mime_type.is_empty() {
            DEFAULT_MIME_TYPE
        } else {
            mime_type
        };
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|e| ImageRefError::InvalidPayload(e.to_string()))?;
        Ok(Self::inline(bytes, mime_type))
    }
}

// Inline payloads can be megabytes; keep Debug output readable.
impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Inline { bytes, mime_type } => f
                .debug_struct("Inline")
                .field("mime_type", mime_type)
                .field("len", &bytes.len())
                .finish(),
            ImageRef::Remote { url } => f.debug_struct("Remote").field("url", url).finish(),
        }
    }
}
