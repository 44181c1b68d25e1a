//! Content sanitizer
//!
//! Allow-list validation for everything that enters the note store from
//! outside: storage records written by older versions, dropped files and
//! pasted links. Every externally sourced string that later becomes a
//! `src` or href is an injection vector, so validation is strict
//! allow-list and fails closed: ambiguous input is dropped, never passed
//! through best-effort.
//!
//! URL handling uses a minimal manual parser rather than a full URL
//! crate; the handful of shapes accepted here don't warrant one.

use crate::config::{
    ALLOWED_IMAGE_TYPES, ALLOWED_THUMBNAIL_HOSTS, ALLOWED_VIDEO_HOSTS, DEFAULT_IMAGE_NAME,
    DEFAULT_VIDEO_TITLE, MAX_IMAGE_BYTES, MAX_IMAGE_ITEMS_PER_NOTE, MAX_ITEMS_PER_NOTE,
    MAX_TOTAL_IMAGE_BYTES, UNKNOWN_DOMAIN, VIDEO_ID_LEN,
};
use crate::store::models::Item;
use serde_json::Value;

/// A validated YouTube reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    /// Canonical `https://www.youtube.com/watch?v=<id>` form.
    pub canonical_url: String,
    pub video_id: String,
}

/// Minimal decomposition of an absolute URL. Enough for host allow-listing
/// and id extraction; anything it cannot represent is rejected upstream.
struct SplitUrl {
    scheme: String,
    host: String,
    path: String,
    query: String,
}

fn split_url(raw: &str) -> Option<SplitUrl> {
    let raw = raw.trim();
    let (scheme, rest) = raw.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let authority_end = rest
        .find(|c| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    // Userinfo ("user@host") is how lookalike URLs smuggle a different
    // host past naive checks. Nothing we accept legitimately carries it.
    if authority.contains('@') {
        return None;
    }

    let host = authority.split(':').next().unwrap_or("");
    if host.is_empty() {
        return None;
    }

    let remainder = &rest[authority_end..];
    let without_fragment = remainder.split('#').next().unwrap_or("");
    let (path, query) = match without_fragment.split_once('?') {
        Some((p, q)) => (p, q),
        None => (without_fragment, ""),
    };

    Some(SplitUrl {
        scheme: scheme.to_ascii_lowercase(),
        host: host.to_ascii_lowercase(),
        path: path.to_string(),
        query: query.to_string(),
    })
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_base64_payload(payload: &str) -> bool {
    if payload.is_empty() || payload.len() % 4 != 0 {
        return false;
    }
    let trimmed = payload.trim_end_matches('=');
    if payload.len() - trimmed.len() > 2 {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
}

/// Validate and normalize an embedded image source.
///
/// Accepts only a strict `data:image/<allowed-type>;base64,<payload>`
/// shape (case-insensitive, whitespace stripped). Remote `http(s)`
/// sources are rejected outright: they would let a stored record phone
/// home when rendered.
pub fn validate_image_data_url(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let lower = cleaned.to_ascii_lowercase();

    let rest = lower.strip_prefix("data:image/")?;
    let (subtype, after) = rest.split_once(';')?;
    if !ALLOWED_IMAGE_TYPES.contains(&subtype) {
        return None;
    }
    let payload_len = after.strip_prefix("base64,")?.len();

    // Payload is taken from the original casing; base64 is case-sensitive.
    let payload = &cleaned[cleaned.len() - payload_len..];
    if !is_base64_payload(payload) {
        return None;
    }

    Some(format!("data:image/{};base64,{}", subtype, payload))
}

/// Decoded byte length of a base64 data URL, derived from payload length
/// and padding without decoding. Cheap enough to run on every quota check.
pub fn estimate_byte_size(data_url: &str) -> usize {
    let payload = match data_url.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => return 0,
    };
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    (payload.len() / 4 * 3).saturating_sub(padding)
}

/// Validate a YouTube link and canonicalize it to the watch form.
///
/// Requires HTTPS and an allow-listed host; extracts an 11-character
/// video id from any of the supported URL shapes (`watch?v=`,
/// `youtu.be/<id>`, `/shorts/`, `/embed/`, `/live/`). Canonicalizing
/// means downstream storage is host-normalized no matter what shape the
/// user pasted.
pub fn validate_youtube_url(raw: &str) -> Option<VideoRef> {
    let url = split_url(raw)?;
    if url.scheme != "https" {
        return None;
    }

    let host = url.host.strip_prefix("www.").unwrap_or(&url.host);
    if !ALLOWED_VIDEO_HOSTS.contains(&host) {
        return None;
    }

    let segments: Vec<&str> = url.path.split('/').filter(|s| !s.is_empty()).collect();
    let candidate = if host == "youtu.be" {
        segments.first().copied().unwrap_or("")
    } else {
        match query_param(&url.query, "v") {
            Some(v) if !v.is_empty() => v,
            _ => match segments.as_slice() {
                [kind, id, ..] if matches!(*kind, "shorts" | "embed" | "live") => *id,
                _ => "",
            },
        }
    };

    if !is_video_id(candidate) {
        return None;
    }

    Some(VideoRef {
        canonical_url: format!("https://www.youtube.com/watch?v={}", candidate),
        video_id: candidate.to_string(),
    })
}

/// Deterministic thumbnail for a video id, used whenever a stored or
/// fetched thumbnail URL fails validation.
pub fn fallback_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id)
}

/// Validate a thumbnail URL, falling back to [`fallback_thumbnail`] when
/// it is not an HTTPS URL on an allow-listed image host.
pub fn validate_youtube_thumbnail(raw: &str, video_id: &str) -> String {
    let trimmed = raw.trim();
    if let Some(url) = split_url(trimmed) {
        if url.scheme == "https" && ALLOWED_THUMBNAIL_HOSTS.contains(&url.host.as_str()) {
            return trimmed.to_string();
        }
    }
    fallback_thumbnail(video_id)
}

/// Lower-cased grouping domain for a note: an explicit stored domain if
/// present, else the hostname of the page key, else a sentinel.
pub fn normalize_domain(raw: &str, fallback_page_key: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        return trimmed.to_ascii_lowercase();
    }
    match split_url(fallback_page_key) {
        Some(url) => url
            .host
            .strip_prefix("www.")
            .unwrap_or(&url.host)
            .to_string(),
        None => UNKNOWN_DOMAIN.to_string(),
    }
}

/// Admit a candidate item against the quota state of an already-accepted
/// list. Shared by storage hydration and live appends so both paths obey
/// the same allow-lists and caps. Returns the normalized item, or `None`
/// if it was dropped.
pub fn admit_item(candidate: Item, accepted: &[Item]) -> Option<Item> {
    if accepted.len() >= MAX_ITEMS_PER_NOTE {
        tracing::warn!("item dropped: note already holds {} items", accepted.len());
        return None;
    }

    match candidate {
        Item::Image { src, name } => {
            let src = match validate_image_data_url(&src) {
                Some(src) => src,
                None => {
                    tracing::warn!("image item dropped: source failed validation");
                    return None;
                }
            };

            let image_count = accepted
                .iter()
                .filter(|item| matches!(item, Item::Image { .. }))
                .count();
            if image_count >= MAX_IMAGE_ITEMS_PER_NOTE {
                tracing::warn!("image item dropped: note already holds {} images", image_count);
                return None;
            }

            let size = estimate_byte_size(&src);
            if size > MAX_IMAGE_BYTES {
                tracing::warn!("image item dropped: {} bytes exceeds per-file cap", size);
                return None;
            }

            let total: usize = accepted
                .iter()
                .filter_map(|item| match item {
                    Item::Image { src, .. } => Some(estimate_byte_size(src)),
                    _ => None,
                })
                .sum();
            if total + size > MAX_TOTAL_IMAGE_BYTES {
                tracing::warn!("image item dropped: note image budget exhausted");
                return None;
            }

            let name = name.trim();
            let name = if name.is_empty() {
                DEFAULT_IMAGE_NAME.to_string()
            } else {
                name.to_string()
            };
            Some(Item::Image { src, name })
        }
        Item::Youtube { url, title, thumbnail, .. } => {
            let video = match validate_youtube_url(&url) {
                Some(video) => video,
                None => {
                    tracing::warn!("youtube item dropped: url failed validation");
                    return None;
                }
            };

            // The stored videoId field is never trusted; the id is always
            // re-derived from the validated URL.
            let title = title.trim();
            let title = if title.is_empty() {
                DEFAULT_VIDEO_TITLE.to_string()
            } else {
                title.to_string()
            };
            let thumbnail = validate_youtube_thumbnail(&thumbnail, &video.video_id);

            Some(Item::Youtube {
                url: video.canonical_url,
                video_id: video.video_id,
                title,
                thumbnail,
            })
        }
    }
}

fn parse_raw_item(raw: &Value) -> Option<Item> {
    let field = |key: &str| -> String {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match raw.get("type").and_then(Value::as_str) {
        Some("image") => Some(Item::Image {
            src: field("src"),
            name: field("name"),
        }),
        Some("youtube") => Some(Item::Youtube {
            url: field("url"),
            video_id: field("videoId"),
            title: field("title"),
            thumbnail: field("thumbnail"),
        }),
        _ => None,
    }
}

/// Sanitize a raw item list from storage, preserving order and enforcing
/// quotas while filtering. Quota state accumulates over the accepted
/// prefix, so whether item k survives depends on which of items 1..k-1
/// survived, not on the raw input.
pub fn sanitize_item_list(raw_items: &[Value]) -> Vec<Item> {
    let mut accepted: Vec<Item> = Vec::new();
    for raw in raw_items {
        let candidate = match parse_raw_item(raw) {
            Some(candidate) => candidate,
            None => {
                tracing::warn!("item dropped: unrecognized shape");
                continue;
            }
        };
        if let Some(item) = admit_item(candidate, &accepted) {
            accepted.push(item);
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn png_data_url(decoded_bytes: usize) -> String {
        // 4 base64 chars encode 3 bytes; callers pass multiples of 3.
        assert_eq!(decoded_bytes % 3, 0);
        format!("data:image/png;base64,{}", "A".repeat(decoded_bytes / 3 * 4))
    }

    #[test]
    fn test_image_data_url_accepts_allowed_types() {
        for subtype in ["png", "jpeg", "jpg", "gif", "webp", "bmp"] {
            let raw = format!("data:image/{};base64,QUJD", subtype);
            assert_eq!(validate_image_data_url(&raw), Some(raw.clone()), "{}", subtype);
        }
    }

    #[test]
    fn test_image_data_url_is_case_insensitive_and_strips_whitespace() {
        let raw = "  DATA:IMAGE/PNG;Base64,QU JD\n  ";
        assert_eq!(
            validate_image_data_url(raw),
            Some("data:image/png;base64,QUJD".to_string())
        );
    }

    #[test]
    fn test_image_data_url_rejects_everything_else() {
        for raw in [
            "http://evil.example/x.png",
            "https://evil.example/x.png",
            "javascript:alert(1)",
            "data:image/svg+xml;base64,QUJD",
            "data:text/html;base64,QUJD",
            "data:image/png;base64,",
            "data:image/png;base64,not!base64",
            "data:image/png;base64,QUJ",
            "data:image/png,rawpixels",
            "",
        ] {
            assert_eq!(validate_image_data_url(raw), None, "{}", raw);
        }
    }

    #[test]
    fn test_image_payload_keeps_case() {
        let raw = "data:image/png;base64,aGVsbG8=";
        assert_eq!(validate_image_data_url(raw), Some(raw.to_string()));
    }

    #[test]
    fn test_estimate_byte_size() {
        assert_eq!(estimate_byte_size("data:image/png;base64,QUJD"), 3);
        assert_eq!(estimate_byte_size("data:image/png;base64,QUI="), 2);
        assert_eq!(estimate_byte_size("data:image/png;base64,QQ=="), 1);
        assert_eq!(estimate_byte_size("not a data url"), 0);
    }

    #[test]
    fn test_youtube_url_shapes_canonicalize_to_watch_form() {
        let canonical = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        for raw in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/live/dQw4w9WgXcQ",
        ] {
            let video = validate_youtube_url(raw).unwrap_or_else(|| panic!("rejected {}", raw));
            assert_eq!(video.canonical_url, canonical);
            assert_eq!(video.video_id, "dQw4w9WgXcQ");
        }
    }

    #[test]
    fn test_youtube_url_rejections() {
        for raw in [
            "http://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://vimeo.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com.evil.example/watch?v=dQw4w9WgXcQ",
            "https://youtube.com@evil.example/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/watch?v=far-too-long-for-an-id",
            "https://www.youtube.com/watch",
            "https://www.youtube.com/playlist?list=PL123",
            "https://youtu.be/",
            "not a url",
            "",
        ] {
            assert!(validate_youtube_url(raw).is_none(), "accepted {}", raw);
        }
    }

    #[test]
    fn test_thumbnail_allow_list_and_fallback() {
        let ok = "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg";
        assert_eq!(validate_youtube_thumbnail(ok, "dQw4w9WgXcQ"), ok);

        let fallback = fallback_thumbnail("dQw4w9WgXcQ");
        for raw in [
            "http://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg",
            "https://evil.example/thumb.jpg",
            "https://i.ytimg.com@evil.example/thumb.jpg",
            "",
        ] {
            assert_eq!(validate_youtube_thumbnail(raw, "dQw4w9WgXcQ"), fallback, "{}", raw);
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  Example.COM ", ""), "example.com");
        assert_eq!(
            normalize_domain("", "https://www.example.com/path?q=1"),
            "example.com"
        );
        assert_eq!(normalize_domain("", "not a url"), UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_sanitize_item_list_drops_remote_image() {
        let raw = vec![json!({"type": "image", "src": "http://evil.example/x.png"})];
        assert!(sanitize_item_list(&raw).is_empty());
    }

    #[test]
    fn test_sanitize_item_list_preserves_order_and_skips_bad_entries() {
        let raw = vec![
            json!({"type": "image", "src": "data:image/png;base64,QUJD", "name": "a"}),
            json!({"type": "bogus"}),
            json!(42),
            json!({"type": "youtube", "url": "https://youtu.be/dQw4w9WgXcQ"}),
        ];
        let items = sanitize_item_list(&raw);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Item::Image { name, .. } if name == "a"));
        assert!(
            matches!(&items[1], Item::Youtube { video_id, title, .. }
                if video_id == "dQw4w9WgXcQ" && title == DEFAULT_VIDEO_TITLE)
        );
    }

    #[test]
    fn test_sanitize_item_list_is_idempotent() {
        let raw = vec![
            json!({"type": "image", "src": " data:IMAGE/JPEG;base64,QUJD ", "name": ""}),
            json!({"type": "youtube", "url": "https://youtu.be/dQw4w9WgXcQ",
                   "videoId": "forged!!!!!", "title": " My Video ",
                   "thumbnail": "https://evil.example/t.jpg"}),
        ];
        let once = sanitize_item_list(&raw);
        let round_tripped: Vec<Value> =
            once.iter().map(|i| serde_json::to_value(i).unwrap()).collect();
        let twice = sanitize_item_list(&round_tripped);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_item_count_quota() {
        let raw: Vec<Value> = (0..MAX_ITEMS_PER_NOTE + 5)
            .map(|_| json!({"type": "youtube", "url": "https://youtu.be/dQw4w9WgXcQ"}))
            .collect();
        assert_eq!(sanitize_item_list(&raw).len(), MAX_ITEMS_PER_NOTE);
    }

    #[test]
    fn test_image_count_quota_counts_only_accepted_images() {
        // One invalid image in the middle must not use up quota.
        let mut raw: Vec<Value> = (0..MAX_IMAGE_ITEMS_PER_NOTE)
            .map(|i| json!({"type": "image", "src": "data:image/png;base64,QUJD", "name": i.to_string()}))
            .collect();
        raw.insert(3, json!({"type": "image", "src": "http://evil.example/x.png"}));
        raw.push(json!({"type": "image", "src": "data:image/png;base64,QUJD", "name": "extra"}));

        let items = sanitize_item_list(&raw);
        let images: Vec<_> = items
            .iter()
            .filter(|i| matches!(i, Item::Image { .. }))
            .collect();
        assert_eq!(images.len(), MAX_IMAGE_ITEMS_PER_NOTE);
        assert!(images
            .iter()
            .all(|i| !matches!(i, Item::Image { name, .. } if name == "extra")));
    }

    #[test]
    fn test_per_image_byte_cap() {
        let oversized = png_data_url(MAX_IMAGE_BYTES + 3 - MAX_IMAGE_BYTES % 3);
        assert!(estimate_byte_size(&oversized) > MAX_IMAGE_BYTES);
        let raw = vec![json!({"type": "image", "src": oversized})];
        assert!(sanitize_item_list(&raw).is_empty());
    }

    #[test]
    fn test_cumulative_image_byte_budget() {
        // 3 MiB each: eight fit exactly in the 24 MiB budget, the ninth
        // would exceed it and is dropped.
        let each = 3 * 1024 * 1024;
        let raw: Vec<Value> = (0..9)
            .map(|_| json!({"type": "image", "src": png_data_url(each)}))
            .collect();
        let items = sanitize_item_list(&raw);
        assert_eq!(items.len(), 8);
        let total: usize = items
            .iter()
            .map(|i| match i {
                Item::Image { src, .. } => estimate_byte_size(src),
                _ => 0,
            })
            .sum();
        assert!(total <= MAX_TOTAL_IMAGE_BYTES);
    }

    #[test]
    fn test_admit_item_respects_existing_items() {
        let existing: Vec<Item> = (0..MAX_IMAGE_ITEMS_PER_NOTE - 1)
            .map(|i| Item::Image {
                src: "data:image/png;base64,QUJD".to_string(),
                name: i.to_string(),
            })
            .collect();

        let candidate = Item::Image {
            src: "data:image/png;base64,QUJD".to_string(),
            name: "next".to_string(),
        };
        assert!(admit_item(candidate.clone(), &existing).is_some());

        let mut full = existing;
        full.push(Item::Image {
            src: "data:image/png;base64,QUJD".to_string(),
            name: "last".to_string(),
        });
        assert!(admit_item(candidate, &full).is_none());
    }
}
