use serde::{Deserialize, Serialize};
use url::Url;

/// Stand-in for a source that is not an absolute URL
const UNPARSEABLE_SOURCE: &str = "<unparseable>";

/// Single playlist entry (one live channel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub group: String,
    pub logo: String,
    pub url: String,
}

/// Which playlist to serve and where loopback stream addresses should point.
///
/// Built once per request and never mutated. A blank substitution target is
/// normalized to `None`, meaning "serve the playlist's own addresses".
///
/// The channel cache is keyed by the whole value, so "no target" can never
/// collide with any target string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceConfig {
    source: String,
    substitution_target: Option<String>,
}

impl SourceConfig {
    pub fn new(source: impl Into<String>, substitution_target: Option<String>) -> Self {
        let substitution_target = substitution_target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Self {
            source: source.into().trim().to_string(),
            substitution_target,
        }
    }

    /// Playlist address
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Address replacing the loopback literal, if any
    pub fn substitution_target(&self) -> Option<&str> {
        self.substitution_target.as_deref()
    }

    /// Source address safe to report: userinfo, query and fragment removed,
    /// since playlist URLs often carry account credentials there
    pub fn redacted_source(&self) -> String {
        match Url::parse(&self.source) {
            Ok(mut url) => {
                let _ = url.set_username("");
                let _ = url.set_password(None);
                url.set_query(None);
                url.set_fragment(None);
                url.to_string()
            }
            Err(_) => UNPARSEABLE_SOURCE.to_string(),
        }
    }
}
