use lazy_static::lazy_static;
use regex::Regex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::models::Channel;

/// Marker opening an entry's metadata line
const EXTINF_MARKER: &str = "#EXTINF:";

/// Address rewritten by substitution
pub const LOOPBACK_LITERAL: &str = "127.0.0.1";

/// Image used when an entry declares no logo
pub const FALLBACK_LOGO: &str =
    "https://upload.wikimedia.org/wikipedia/commons/thumb/1/11/Blue_question_mark_icon.svg/1024px-Blue_question_mark_icon.svg.png";

/// Category used when an entry declares no group
pub const UNCATEGORIZED_GROUP: &str = "Uncategorized";

/// Namespace tag prefixed to every channel id
pub const CHANNEL_ID_PREFIX: &str = "ch_";

const LOGO_ATTR: &str = "tvg-logo";
const GROUP_ATTR: &str = "group-title";

lazy_static! {
    /// Regex to split an EXTINF line into duration, attribute header and title.
    /// The greedy header means the title starts after the last comma.
    static ref EXTINF_REGEX: Regex =
        Regex::new(r"^#EXTINF:(-?\d+(?:\.\d+)?)(?:\s+(.*))?,(.*)$").unwrap();
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"(\w+(?:-\w+)*)="([^"]*)""#).unwrap();
}

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    attributes: HashMap<String, String>,
    title: String,
}

impl ExtinfData {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Attach the stream address, resolving fallbacks once
    fn into_channel(self, url: String) -> Channel {
        let logo = self.attribute(LOGO_ATTR).unwrap_or(FALLBACK_LOGO).to_string();
        let group = self
            .attribute(GROUP_ATTR)
            .unwrap_or(UNCATEGORIZED_GROUP)
            .to_string();

        Channel {
            id: channel_id(&self.title),
            name: self.title,
            group,
            logo,
            url,
        }
    }
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-logo="..." group-title="...",Title
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let caps = EXTINF_REGEX.captures(line)?;

    let header = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let title = caps
        .get(3)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let attributes = ATTR_REGEX
        .captures_iter(header)
        .map(|attr| (attr[1].to_string(), attr[2].to_string()))
        .collect();

    Some(ExtinfData { attributes, title })
}

/// Stable channel id: namespace tag plus SHA1 of the display name.
/// Entries sharing a name share an id.
pub fn channel_id(name: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    format!("{}{:x}", CHANNEL_ID_PREFIX, hasher.finalize())
}

/// Replace every loopback occurrence with the target, if one is set
pub fn substitute_loopback(url: &str, target: Option<&str>) -> String {
    match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(target) => url.replace(LOOPBACK_LITERAL, target),
        None => url.to_string(),
    }
}

/// Parse raw M3U text into channels, in playlist order.
///
/// Best effort: malformed metadata lines are skipped, address lines with no
/// preceding metadata are ignored, and a trailing entry with no address is
/// dropped. Never fails.
pub fn parse_playlist(content: &str, substitution_target: Option<&str>) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<ExtinfData> = None;
    let mut skipped = 0usize;

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with(EXTINF_MARKER) {
            pending = parse_extinf(trimmed);
            if pending.is_none() {
                skipped += 1;
            }
            continue;
        }

        // Other directives and comments (#EXTM3U, #EXTVLCOPT, ...)
        if trimmed.starts_with('#') {
            continue;
        }

        // Stream URL line
        if let Some(extinf) = pending.take() {
            let url = substitute_loopback(trimmed, substitution_target);
            channels.push(extinf.into_channel(url));
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "Skipped malformed EXTINF lines");
    }

    channels
}
