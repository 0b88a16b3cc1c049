use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Markers that identify bootstrap/demo gallery rows. Matched against both
/// the item id and its uri.
const SEED_ID_PREFIXES: &[&str] = &["seed-", "demo-", "sample-", "placeholder-"];
const SEED_URI_MARKERS: &[&str] = &[
    "images.unsplash.com",
    "unsplash.com/photos",
    "images.pexels.com",
    "picsum.photos",
    "placehold.co",
    "via.placeholder.com",
    "/demo/",
    "/seed/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    User,
    Outfit,
    Result,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::User => "user",
            ItemKind::Outfit => "outfit",
            ItemKind::Result => "result",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(ItemKind::User),
            "outfit" => Ok(ItemKind::Outfit),
            "result" => Ok(ItemKind::Result),
            other => Err(format!("unknown gallery item kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryItem {
    pub id: String,
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub timestamp: i64,
}

impl GalleryItem {
    pub fn new(uri: impl Into<String>, kind: ItemKind) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_gallery_id(timestamp),
            uri: uri.into(),
            kind,
            timestamp,
        }
    }

    /// True when the row looks like bootstrap content rather than a user
    /// capture or a generated result.
    pub fn is_seed_or_demo(&self) -> bool {
        let id = self.id.to_ascii_lowercase();
        if SEED_ID_PREFIXES.iter().any(|prefix| id.starts_with(prefix)) {
            return true;
        }
        let uri = self.uri.to_ascii_lowercase();
        SEED_URI_MARKERS.iter().any(|marker| uri.contains(marker))
    }
}

/// Timestamp plus a random suffix; two calls in the same millisecond still
/// differ.
pub fn new_gallery_id(timestamp_millis: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{timestamp_millis}-{}", &suffix[..12])
}

/// Newest first; ties keep their stored order.
pub fn sort_newest_first(items: &mut [GalleryItem]) {
    items.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn item(id: &str, uri: &str, kind: ItemKind, timestamp: i64) -> GalleryItem {
        GalleryItem {
            id: id.to_string(),
            uri: uri.to_string(),
            kind,
            timestamp,
        }
    }

    #[test]
    fn ids_are_unique_within_one_millisecond() {
        let ids: HashSet<String> = (0..500).map(|_| new_gallery_id(1_700_000_000_000)).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("1700000000000-")));
    }

    #[test]
    fn kind_serializes_as_type_field() -> anyhow::Result<()> {
        let row = item("1-abc", "/tmp/a.png", ItemKind::Outfit, 1);
        let value = serde_json::to_value(&row)?;
        assert_eq!(value["type"], serde_json::json!("outfit"));
        let back: GalleryItem = serde_json::from_value(value)?;
        assert_eq!(back, row);
        Ok(())
    }

    #[test]
    fn seed_detection_matches_markers_only() {
        assert!(item("demo-1", "/tmp/a.png", ItemKind::User, 1).is_seed_or_demo());
        assert!(item(
            "1-abc",
            "https://images.unsplash.com/photo-123?w=800",
            ItemKind::Outfit,
            1
        )
        .is_seed_or_demo());
        assert!(!item("1-abc", "/data/captures/me.jpg", ItemKind::User, 1).is_seed_or_demo());
        assert!(!item("1-abc", "https://cdn.example.com/out.png", ItemKind::Result, 1)
            .is_seed_or_demo());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Result".parse::<ItemKind>(), Ok(ItemKind::Result));
        assert!("hat".parse::<ItemKind>().is_err());
    }

    #[test]
    fn newest_first_sort() {
        let mut rows = vec![
            item("a", "a", ItemKind::User, 10),
            item("b", "b", ItemKind::User, 30),
            item("c", "c", ItemKind::User, 20),
        ];
        sort_newest_first(&mut rows);
        let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
