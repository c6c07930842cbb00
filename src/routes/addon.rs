//! Addon protocol endpoints
//!
//! The whole path space is shared between configuration tokens and resource
//! names:
//!
//! ```text
//! /?m3u=<url>&ip=<addr>                 -> 302 /<token>/manifest.json
//! /[<token>/]manifest.json
//! /[<token>/]catalog/<type>/<id>[/<extra>].json
//! /[<token>/]meta/<type>/<id>.json
//! /[<token>/]stream/<type>/<id>.json
//! ```
//!
//! A first segment that does not decode as a token is treated as part of the
//! resource path and the process defaults apply. A setup query on a token path
//! keeps whatever the token already says unless the query overrides it.

use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{
    AddonQuery, CatalogDescriptor, CatalogResponse, Channel, ExtraDescriptor, Manifest,
    MetaBehaviorHints, MetaDetail, MetaPreview, MetaResponse, SourceConfig, Stream,
    StreamBehaviorHints, StreamsResponse,
};
use crate::services::m3u_parser::CHANNEL_ID_PREFIX;
use crate::AppState;

const ADDON_ID: &str = "org.playlist.addon";
const ADDON_NAME: &str = "Playlist";
const CONTENT_TYPE: &str = "tv";
const CATALOG_ID: &str = "playlist";
const CATALOG_NAME: &str = "Channels";

/// Genre option meaning "no filter"
pub const ALL_GENRE: &str = "All";

const MANIFEST_FILE: &str = "manifest.json";

/// Format suffixes clients append to resource segments (truncated ones included)
const FORMAT_SUFFIXES: &[&str] = &[".json", ".jso"];

/// Requested resource, parsed from the path after the optional token
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resource {
    Manifest,
    Catalog(CatalogExtra),
    Meta(String),
    Stream(String),
}

/// Catalog filters from the extra path segment or the query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CatalogExtra {
    genre: Option<String>,
    search: Option<String>,
    skip: usize,
}

impl CatalogExtra {
    /// Parse a form-encoded segment such as `genre=News&skip=100`
    fn from_segment(segment: &str) -> Self {
        let mut extra = Self::default();
        for (key, value) in url::form_urlencoded::parse(segment.as_bytes()) {
            match key.as_ref() {
                "genre" => extra.genre = non_blank(&value),
                "search" => extra.search = non_blank(&value),
                "skip" => extra.skip = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
        extra
    }

    fn from_query(query: &AddonQuery) -> Self {
        Self {
            genre: query.genre.as_deref().map(strip_format_suffix).and_then(non_blank),
            search: query.search.as_deref().map(strip_format_suffix).and_then(non_blank),
            skip: query
                .skip
                .as_deref()
                .map(strip_format_suffix)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn strip_format_suffix(segment: &str) -> &str {
    FORMAT_SUFFIXES
        .iter()
        .find_map(|suffix| segment.strip_suffix(suffix))
        .unwrap_or(segment)
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn parse_resource(segments: &[&str], query: &AddonQuery) -> Option<Resource> {
    match segments {
        [] => Some(Resource::Manifest),
        [file] if *file == MANIFEST_FILE => Some(Resource::Manifest),
        ["catalog", _kind, _id] => Some(Resource::Catalog(CatalogExtra::from_query(query))),
        ["catalog", _kind, _id, extra] => Some(Resource::Catalog(CatalogExtra::from_segment(
            strip_format_suffix(extra),
        ))),
        ["meta", _kind, id] => Some(Resource::Meta(decode_segment(strip_format_suffix(id)))),
        ["stream", _kind, id] => Some(Resource::Stream(decode_segment(strip_format_suffix(id)))),
        _ => None,
    }
}

/// Manifest id suffix derived from the substitution target
fn manifest_suffix(config: &SourceConfig) -> String {
    config
        .substitution_target()
        .unwrap_or("default")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn build_manifest(config: &SourceConfig, default_source: &str, channels: &[Channel]) -> Manifest {
    let groups: BTreeSet<&str> = channels.iter().map(|c| c.group.as_str()).collect();
    let genres: Vec<String> = std::iter::once(ALL_GENRE)
        .chain(groups)
        .map(str::to_string)
        .collect();

    let name = match config.substitution_target() {
        Some(target) => format!("{} ({})", ADDON_NAME, target),
        None => format!("{} (Default)", ADDON_NAME),
    };
    let source = if config.source() == default_source {
        "Default"
    } else {
        config.source()
    };

    Manifest {
        id: format!("{}.{}", ADDON_ID, manifest_suffix(config)),
        version: env!("CARGO_PKG_VERSION").to_string(),
        name,
        description: format!("Source: {}", source),
        resources: vec!["catalog".into(), "meta".into(), "stream".into()],
        types: vec![CONTENT_TYPE.into()],
        catalogs: vec![CatalogDescriptor {
            kind: CONTENT_TYPE.into(),
            id: CATALOG_ID.into(),
            name: CATALOG_NAME.into(),
            extra: vec![
                ExtraDescriptor {
                    name: "genre".into(),
                    is_required: Some(false),
                    options: Some(genres.clone()),
                },
                ExtraDescriptor::named("search"),
                ExtraDescriptor::named("skip"),
            ],
            genres,
        }],
        id_prefixes: vec![CHANNEL_ID_PREFIX.into()],
    }
}

/// Search wins over genre; `All` (or no genre) means no filter
fn filter_catalog<'a>(
    channels: &'a [Channel],
    extra: &CatalogExtra,
    page_size: usize,
) -> Vec<&'a Channel> {
    let search = extra.search.as_deref().map(str::to_lowercase);
    let genre = extra.genre.as_deref().filter(|g| *g != ALL_GENRE);

    channels
        .iter()
        .filter(|c| match (&search, genre) {
            (Some(term), _) => c.name.to_lowercase().contains(term.as_str()),
            (None, Some(genre)) => c.group == genre,
            (None, None) => true,
        })
        .skip(extra.skip)
        .take(page_size)
        .collect()
}

fn meta_preview(channel: &Channel) -> MetaPreview {
    MetaPreview {
        id: channel.id.clone(),
        kind: CONTENT_TYPE.into(),
        name: channel.name.clone(),
        poster: channel.logo.clone(),
        description: channel.group.clone(),
    }
}

fn meta_detail(channel: &Channel, config: &SourceConfig) -> MetaDetail {
    MetaDetail {
        id: channel.id.clone(),
        kind: CONTENT_TYPE.into(),
        name: channel.name.clone(),
        poster: channel.logo.clone(),
        background: channel.logo.clone(),
        description: format!(
            "Group: {}\nIP: {}",
            channel.group,
            config.substitution_target().unwrap_or("original")
        ),
        behavior_hints: MetaBehaviorHints { is_live: true },
    }
}

fn stream_for(channel: &Channel, config: &SourceConfig) -> Stream {
    Stream {
        url: channel.url.clone(),
        title: format!(
            "Watch on {}",
            config.substitution_target().unwrap_or("Original")
        ),
        behavior_hints: StreamBehaviorHints {
            not_web_ready: true,
        },
    }
}

/// Fallback handler for every addon path
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
    uri: Uri,
) -> Response {
    let query = AddonQuery::parse(raw_query.as_deref());
    let segments: Vec<&str> = uri.path().split('/').filter(|s| !s.is_empty()).collect();

    let token_config = segments
        .first()
        .filter(|first| **first != MANIFEST_FILE)
        .and_then(|first| match state.codec.decode(first) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::debug!(segment = %first, error = %e, "Not a configuration token");
                None
            }
        });

    // Setup: mint a token and send the client to the self-describing path
    if query.is_setup() {
        let base = token_config
            .unwrap_or_else(|| SourceConfig::new(state.codec.default_source(), None));
        let source = query
            .m3u
            .as_deref()
            .and_then(non_blank)
            .unwrap_or_else(|| base.source().to_string());
        let target = match &query.ip {
            Some(ip) => Some(ip.clone()),
            None => base.substitution_target().map(str::to_string),
        };
        let config = SourceConfig::new(source, target);
        let token = state.codec.encode(&config);

        tracing::info!(
            token = %token,
            target = config.substitution_target().unwrap_or("original"),
            "Configuration token minted"
        );

        return (
            StatusCode::FOUND,
            [(header::LOCATION, format!("/{}/{}", token, MANIFEST_FILE))],
        )
            .into_response();
    }

    let (config, resource_path) = match token_config {
        Some(config) => (config, &segments[1..]),
        None => (state.default_config(), &segments[..]),
    };

    let Some(resource) = parse_resource(resource_path, &query) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let channels = state.cache.get(&config).await;

    match resource {
        Resource::Manifest => Json(build_manifest(
            &config,
            state.codec.default_source(),
            &channels,
        ))
        .into_response(),
        Resource::Catalog(extra) => {
            tracing::info!(
                genre = extra.genre.as_deref().unwrap_or(ALL_GENRE),
                search = extra.search.as_deref().unwrap_or(""),
                skip = extra.skip,
                "Catalog request"
            );
            let metas = filter_catalog(&channels, &extra, state.config.catalog_page_size)
                .into_iter()
                .map(meta_preview)
                .collect();
            Json(CatalogResponse { metas }).into_response()
        }
        Resource::Meta(id) => {
            let meta = channels
                .iter()
                .find(|c| c.id == id)
                .map(|c| meta_detail(c, &config));
            Json(MetaResponse { meta }).into_response()
        }
        Resource::Stream(id) => {
            let streams = channels
                .iter()
                .find(|c| c.id == id)
                .map(|c| vec![stream_for(c, &config)])
                .unwrap_or_default();
            Json(StreamsResponse { streams }).into_response()
        }
    }
}
