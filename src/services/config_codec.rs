//! Stateless configuration tokens
//!
//! A [`SourceConfig`] travels inside the first URL path segment as
//! base64url-encoded JSON (`{"m3u": "...", "ip": "..." | null}`), so every
//! request carries the caller's choice of playlist and substitution target
//! without any server-side session.

use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose},
    Engine,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SourceConfig;

/// URL-safe alphabet, never emits padding, tolerates padding on input
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    general_purpose::NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Path segment could not be read as a configuration token
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("token payload is not JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("token payload is not a configuration object")]
    NotConfiguration,
}

/// Wire form of the token payload
#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    m3u: Option<String>,
}

/// Encodes and decodes configuration tokens
#[derive(Debug, Clone)]
pub struct ConfigCodec {
    default_source: String,
}

impl ConfigCodec {
    /// `default_source` is used for tokens that do not name a playlist
    pub fn new(default_source: impl Into<String>) -> Self {
        Self {
            default_source: default_source.into(),
        }
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    pub fn encode(&self, config: &SourceConfig) -> String {
        let payload = TokenPayload {
            ip: config.substitution_target().map(str::to_string),
            m3u: Some(config.source().to_string()),
        };
        // Serializing two optional strings cannot fail
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        TOKEN_ENGINE.encode(json)
    }

    /// Decode a path segment into a configuration.
    ///
    /// An error only means the segment is not a token; callers fall back to
    /// treating it as a literal resource path.
    pub fn decode(&self, token: &str) -> Result<SourceConfig, TokenError> {
        let bytes = TOKEN_ENGINE.decode(token)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;

        // Must be an object naming at least one of the configuration keys
        let is_configuration = value
            .as_object()
            .map(|obj| obj.contains_key("m3u") || obj.contains_key("ip"))
            .unwrap_or(false);
        if !is_configuration {
            return Err(TokenError::NotConfiguration);
        }

        let payload: TokenPayload = serde_json::from_value(value)?;
        let source = payload
            .m3u
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.default_source.clone());

        Ok(SourceConfig::new(source, payload.ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "http://default.example/list.m3u";

    fn codec() -> ConfigCodec {
        ConfigCodec::new(DEFAULT)
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let configs = [
            SourceConfig::new("http://example.com/a.m3u", None),
            SourceConfig::new("http://example.com/a.m3u", Some("10.0.0.5".to_string())),
            SourceConfig::new(
                "https://example.com/list?user=a&pass=b#frag",
                Some("192.168.1.20:6878".to_string()),
            ),
            SourceConfig::new("http://ñandú.example/canales.m3u", Some("host.lan".to_string())),
        ];

        for config in configs {
            let token = codec.encode(&config);
            assert_eq!(codec.decode(&token).unwrap(), config);
        }
    }

    #[test]
    fn test_token_is_path_safe() {
        let config = SourceConfig::new(
            "http://example.com/a.m3u?x=1&y=2",
            Some("10.0.0.5".to_string()),
        );
        let token = codec().encode(&config);

        assert!(!token.is_empty());
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_missing_source_uses_default() {
        let token = TOKEN_ENGINE.encode(br#"{"ip":"10.0.0.5"}"#);
        let config = codec().decode(&token).unwrap();

        assert_eq!(config.source(), DEFAULT);
        assert_eq!(config.substitution_target(), Some("10.0.0.5"));
    }

    #[test]
    fn test_null_target_means_no_substitution() {
        let token = TOKEN_ENGINE.encode(br#"{"ip":null,"m3u":"http://x/l.m3u"}"#);
        let config = codec().decode(&token).unwrap();

        assert_eq!(config.source(), "http://x/l.m3u");
        assert_eq!(config.substitution_target(), None);
    }

    #[test]
    fn test_padded_token_accepted() {
        let padded = general_purpose::URL_SAFE.encode(br#"{"m3u":"http://x/lst.m3u"}"#);
        assert!(padded.ends_with('='));
        assert!(codec().decode(&padded).is_ok());
    }

    #[test]
    fn test_literal_resource_names_are_not_tokens() {
        let codec = codec();
        for segment in ["manifest.json", "catalog", "meta", "stream", "health"] {
            assert!(codec.decode(segment).is_err(), "{segment} decoded");
        }
    }

    #[test]
    fn test_json_without_configuration_keys_rejected() {
        let codec = codec();
        let other_object = TOKEN_ENGINE.encode(br#"{"foo":"bar"}"#);
        let array = TOKEN_ENGINE.encode(b"[1,2,3]");

        assert!(matches!(
            codec.decode(&other_object),
            Err(TokenError::NotConfiguration)
        ));
        assert!(matches!(
            codec.decode(&array),
            Err(TokenError::NotConfiguration)
        ));
    }

    #[test]
    fn test_wrong_value_types_rejected() {
        let token = TOKEN_ENGINE.encode(br#"{"m3u":42}"#);
        assert!(matches!(codec().decode(&token), Err(TokenError::Payload(_))));
    }
}
