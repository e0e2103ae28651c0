//! Record normalization and batch filtering.
//!
//! `normalize` is the single place where untrusted payloads become
//! [`GalleryImage`] records. It never rejects an element; it only fills in
//! defaults. Rejection of records without a URL happens in
//! [`filter_gallery_images`].

use std::collections::HashSet;

use rand::Rng;
use serde_json::{Map, Value};

use crate::types::{now_millis, GalleryImage, DEFAULT_IMAGE_TYPE, UNKNOWN_PLATFORM};

const ID_SUFFIX_LEN: usize = 9;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Caller context used to fill defaults during normalization.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    /// Fallback for `sourceURL` when the payload carries neither
    /// `sourceURL` nor `tabUrl`.
    pub source_url: String,
    /// Fallback timestamp (epoch ms) and the time component of synthesized ids.
    pub now_ms: i64,
}

impl NormalizeContext {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            now_ms: now_millis(),
        }
    }

    pub fn at(source_url: impl Into<String>, now_ms: i64) -> Self {
        Self {
            source_url: source_url.into(),
            now_ms,
        }
    }
}

/// Normalize an array of loosely-typed payloads into gallery records.
///
/// Non-array input yields an empty vector. Elements that are not objects are
/// treated as empty objects, so every element produces exactly one record.
pub fn normalize(raw: &Value, ctx: &NormalizeContext) -> Vec<GalleryImage> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };

    let empty = Map::new();
    items
        .iter()
        .map(|item| normalize_one(item.as_object().unwrap_or(&empty), ctx))
        .collect()
}

fn normalize_one(obj: &Map<String, Value>, ctx: &NormalizeContext) -> GalleryImage {
    let id = text_field(obj, &["id"]).unwrap_or_else(|| synthesize_id(ctx.now_ms));
    let url = text_field(obj, &["url"])
        .map(|u| u.trim().to_string())
        .unwrap_or_default();

    GalleryImage {
        id,
        url,
        source_url: text_field(obj, &["sourceURL", "sourceUrl", "tabUrl"])
            .unwrap_or_else(|| ctx.source_url.clone()),
        prompt: text_field(obj, &["prompt"]).unwrap_or_default(),
        platform: text_field(obj, &["platform"]).unwrap_or_else(|| UNKNOWN_PLATFORM.to_string()),
        creation_date: text_field(obj, &["creationDate"]).unwrap_or_default(),
        image_type: text_field(obj, &["type"]).unwrap_or_else(|| DEFAULT_IMAGE_TYPE.to_string()),
        timestamp: obj
            .get("timestamp")
            .and_then(millis_value)
            .unwrap_or(ctx.now_ms),
    }
}

/// First non-empty string (or number rendered as a string) among `keys`.
fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn millis_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn synthesize_id(now_ms: i64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("img_{}_{}", now_ms, suffix)
}

/// Drop records with an empty or whitespace-only URL, then keep only the
/// first record for each URL. Relative order of survivors is preserved.
pub fn filter_gallery_images(images: Vec<GalleryImage>) -> Vec<GalleryImage> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|image| image.has_url())
        .filter(|image| seen.insert(image.url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> NormalizeContext {
        NormalizeContext::at("https://gallery.example.com/", 1_700_000_000_000)
    }

    fn image(id: &str, url: &str) -> GalleryImage {
        GalleryImage {
            id: id.to_string(),
            url: url.to_string(),
            source_url: String::new(),
            prompt: String::new(),
            platform: UNKNOWN_PLATFORM.to_string(),
            creation_date: String::new(),
            image_type: DEFAULT_IMAGE_TYPE.to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_non_array_yields_empty() {
        assert!(normalize(&json!(null), &ctx()).is_empty());
        assert!(normalize(&json!({"url": "https://a"}), &ctx()).is_empty());
        assert!(normalize(&json!("images"), &ctx()).is_empty());
    }

    #[test]
    fn test_defaults_filled() {
        let out = normalize(&json!([{ "url": "https://a.png" }]), &ctx());
        assert_eq!(out.len(), 1);
        let img = &out[0];
        assert!(img.id.starts_with("img_1700000000000_"));
        assert_eq!(img.id.len(), "img_1700000000000_".len() + ID_SUFFIX_LEN);
        assert_eq!(img.source_url, "https://gallery.example.com/");
        assert_eq!(img.prompt, "");
        assert_eq!(img.platform, "unknown");
        assert_eq!(img.creation_date, "");
        assert_eq!(img.image_type, "image");
        assert_eq!(img.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_producer_fields_kept() {
        let raw = json!([{
            "id": "p-1",
            "url": "  https://a.png ",
            "tabUrl": "https://gen.example.com/job/1",
            "prompt": "castle at dusk",
            "platform": "leonardo",
            "creationDate": "2026-03-01",
            "type": "video",
            "timestamp": 42
        }]);
        let img = &normalize(&raw, &ctx())[0];
        assert_eq!(img.id, "p-1");
        assert_eq!(img.url, "https://a.png");
        assert_eq!(img.source_url, "https://gen.example.com/job/1");
        assert_eq!(img.prompt, "castle at dusk");
        assert_eq!(img.platform, "leonardo");
        assert_eq!(img.creation_date, "2026-03-01");
        assert_eq!(img.image_type, "video");
        assert_eq!(img.timestamp, 42);
    }

    #[test]
    fn test_missing_url_still_normalized() {
        let out = normalize(&json!([{ "prompt": "x" }, 17, null]), &ctx());
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|img| img.url.is_empty()));
    }

    #[test]
    fn test_numeric_id_and_float_timestamp() {
        let out = normalize(&json!([{ "id": 7, "url": "u", "timestamp": 12.9 }]), &ctx());
        assert_eq!(out[0].id, "7");
        assert_eq!(out[0].timestamp, 12);
    }

    #[test]
    fn test_synthesized_ids_are_distinct() {
        let raw = json!([{ "url": "a" }, { "url": "b" }, { "url": "c" }]);
        let out = normalize(&raw, &ctx());
        let ids: HashSet<_> = out.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_filter_drops_blank_urls() {
        let out = filter_gallery_images(vec![
            image("1", "http://a"),
            image("2", ""),
            image("3", "   "),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "1");
    }

    #[test]
    fn test_filter_keeps_first_occurrence() {
        let out = filter_gallery_images(vec![
            image("1", "http://a"),
            image("2", "http://b"),
            image("3", "http://a"),
            image("4", "http://b"),
        ]);
        let ids: Vec<_> = out.iter().map(|i| i.id.as_str()).collect();
        let urls: Vec<_> = out.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(urls, vec!["http://a", "http://b"]);
    }

    #[test]
    fn test_filter_is_deterministic() {
        let input = vec![
            image("a", "http://x"),
            image("b", " "),
            image("c", "http://y"),
            image("d", "http://x"),
        ];
        assert_eq!(
            filter_gallery_images(input.clone()),
            filter_gallery_images(input)
        );
    }
}
