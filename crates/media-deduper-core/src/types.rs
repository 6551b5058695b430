use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of an item in the library
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blake3 digest of a file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Rebuild a digest from a stored blob
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Media formats recognised by extension
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Webp,
    Tiff,
    Video(String),
    Other(String),
}

impl MediaFormat {
    /// Determine format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "bmp" => Self::Bmp,
            "webp" => Self::Webp,
            "tif" | "tiff" => Self::Tiff,
            video @ ("mp4" | "webm" | "mkv" | "avi" | "mov" | "flv" | "wmv") => {
                Self::Video(video.to_string())
            }
            other => Self::Other(other.to_string()),
        }
    }

    /// Determine format from a path's extension
    pub fn from_path(path: &std::path::Path) -> Self {
        let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        Self::from_extension(ext)
    }

    /// Whether a colour histogram can be derived from this format
    ///
    /// Videos qualify through a decoded frame, which needs `ffmpeg` at runtime.
    pub fn has_histogram_decoder(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Unordered pair of item ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemPair {
    low: ItemId,
    high: ItemId,
}

impl ItemPair {
    pub fn new(a: ItemId, b: ItemId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn first(&self) -> ItemId {
        self.low
    }

    pub fn second(&self) -> ItemId {
        self.high
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.low == id || self.high == id
    }
}

/// Two items judged similar, with their similarity in `[0, 1]`
///
/// Equality and hashing ignore the order of the two ids and the score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimilarPair {
    pub a: ItemId,
    pub b: ItemId,
    pub similarity: f64,
}

impl SimilarPair {
    pub fn new(a: ItemId, b: ItemId, similarity: f64) -> Self {
        Self { a, b, similarity }
    }

    pub fn key(&self) -> ItemPair {
        ItemPair::new(self.a, self.b)
    }

    /// The id on the other side of the pair, if `id` is part of it
    pub fn other(&self, id: ItemId) -> Option<ItemId> {
        if self.a == id {
            Some(self.b)
        } else if self.b == id {
            Some(self.a)
        } else {
            None
        }
    }
}

impl PartialEq for SimilarPair {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SimilarPair {}

impl Hash for SimilarPair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_pair_equality_is_symmetric() {
        let p1 = SimilarPair::new(ItemId(1), ItemId(2), 0.97);
        let p2 = SimilarPair::new(ItemId(2), ItemId(1), 0.50);
        assert_eq!(p1, p2);

        let mut set = HashSet::new();
        set.insert(p1);
        assert!(!set.insert(p2));
    }

    #[test]
    fn test_item_pair_normalises_order() {
        let pair = ItemPair::new(ItemId(9), ItemId(3));
        assert_eq!(pair.first(), ItemId(3));
        assert_eq!(pair.second(), ItemId(9));
        assert_eq!(pair, ItemPair::new(ItemId(3), ItemId(9)));
        assert!(pair.contains(ItemId(9)));
        assert!(!pair.contains(ItemId(4)));
    }

    #[test]
    fn test_media_format_from_extension() {
        assert_eq!(MediaFormat::from_extension("JPG"), MediaFormat::Jpeg);
        assert_eq!(MediaFormat::from_extension("tif"), MediaFormat::Tiff);
        assert_eq!(
            MediaFormat::from_extension("mp4"),
            MediaFormat::Video("mp4".to_string())
        );
        assert!(MediaFormat::from_extension("webm").has_histogram_decoder());
        assert!(MediaFormat::from_extension("png").has_histogram_decoder());
        assert!(!MediaFormat::from_extension("heic").has_histogram_decoder());
    }

    #[test]
    fn test_content_hash_display_and_slice() {
        let hash = ContentHash([0xab; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
        assert_eq!(ContentHash::from_slice(hash.as_bytes()), Some(hash));
        assert_eq!(ContentHash::from_slice(&[1, 2, 3]), None);
    }
}
