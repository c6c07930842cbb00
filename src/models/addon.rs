use serde::{Deserialize, Serialize};

/// Addon manifest describing the catalog and supported resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub resources: Vec<String>,
    pub types: Vec<String>,
    pub catalogs: Vec<CatalogDescriptor>,
    pub id_prefixes: Vec<String>,
}

/// Catalog entry inside the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    pub extra: Vec<ExtraDescriptor>,
    pub genres: Vec<String>,
}

/// Extra catalog argument (genre, search, skip)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl ExtraDescriptor {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_required: None,
            options: None,
        }
    }
}

/// Catalog listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPreview {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub poster: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogResponse {
    pub metas: Vec<MetaPreview>,
}

/// Detail view of a single channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDetail {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub poster: String,
    pub background: String,
    pub description: String,
    pub behavior_hints: MetaBehaviorHints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaBehaviorHints {
    pub is_live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    pub meta: Option<MetaDetail>,
}

/// Playable stream for a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub url: String,
    pub title: String,
    pub behavior_hints: StreamBehaviorHints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBehaviorHints {
    pub not_web_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsResponse {
    pub streams: Vec<Stream>,
}

/// Query parameters accepted on any addon path
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddonQuery {
    pub m3u: Option<String>,
    pub ip: Option<String>,
    pub genre: Option<String>,
    pub search: Option<String>,
    pub skip: Option<String>,
}

impl AddonQuery {
    /// Parse a raw query string. Unknown keys are ignored and a repeated key
    /// keeps its last value, so odd client URLs never reject the request.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        let Some(raw) = raw else {
            return query;
        };

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "m3u" => query.m3u = value,
                "ip" => query.ip = value,
                "genre" => query.genre = value,
                "search" => query.search = value,
                "skip" => query.skip = value,
                _ => {}
            }
        }
        query
    }

    /// True when the caller is configuring the addon rather than browsing it
    pub fn is_setup(&self) -> bool {
        self.m3u.is_some() || self.ip.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parse() {
        let query = AddonQuery::parse(Some("m3u=http%3A%2F%2Fx%2Fl.m3u&ip=10.0.0.5&other=1"));
        assert_eq!(query.m3u.as_deref(), Some("http://x/l.m3u"));
        assert_eq!(query.ip.as_deref(), Some("10.0.0.5"));
        assert!(query.is_setup());

        assert_eq!(AddonQuery::parse(None), AddonQuery::default());
        assert!(!AddonQuery::parse(Some("genre=News")).is_setup());
    }

    #[test]
    fn test_query_repeated_key_keeps_last() {
        let query = AddonQuery::parse(Some("genre=News&genre=Sports&skip=1&skip=2"));
        assert_eq!(query.genre.as_deref(), Some("Sports"));
        assert_eq!(query.skip.as_deref(), Some("2"));
    }
}
