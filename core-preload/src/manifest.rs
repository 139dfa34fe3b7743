//! Multi-variant stream manifests.
//!
//! A manifest describes one logical video encoded several ways:
//!
//! ```json
//! {"stream": {"h265": [{"master_url": "https://a/v_720.mp4",
//!                       "backup_urls": ["https://b/v_720.mp4"],
//!                       "avg_bitrate": 1200000, "width": 1280, "height": 720,
//!                       "weight": 10}],
//!             "h264": [...]}}
//! ```

use crate::error::{PreloadError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Codec families, in the order they are read from a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Av1,
    H265,
    #[default]
    H264,
}

/// One encoded rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default)]
    pub master_url: String,
    #[serde(default)]
    pub backup_urls: Vec<String>,
    #[serde(default)]
    pub avg_bitrate: Option<u64>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Publisher preference; negative means unset.
    #[serde(default = "unset_weight")]
    pub weight: i64,
    #[serde(skip)]
    pub codec: Codec,
}

fn unset_weight() -> i64 {
    -1
}

impl Variant {
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Sort key: weighted variants first by weight, then by resolution.
    fn preference(&self) -> Reverse<(i64, u64)> {
        Reverse((self.weight.max(-1), self.pixels()))
    }
}

/// How a variant is picked out of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantPolicy {
    /// The variant with the most backup URLs, ties broken by preference.
    #[default]
    MostAvailable,
    /// The most preferred variant (highest weight, then resolution).
    HighestQuality,
    /// The variant with the smallest advertised bitrate.
    LowestBitrate,
}

impl VariantPolicy {
    pub fn description(&self) -> &'static str {
        match self {
            VariantPolicy::MostAvailable => "Prefer variants with the most backup URLs",
            VariantPolicy::HighestQuality => "Prefer the highest weighted or largest variant",
            VariantPolicy::LowestBitrate => "Prefer the cheapest variant to download",
        }
    }
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    stream: Option<RawStreams>,
}

#[derive(Deserialize, Default)]
struct RawStreams {
    #[serde(default)]
    av1: Vec<Variant>,
    #[serde(default)]
    h265: Vec<Variant>,
    #[serde(default)]
    h264: Vec<Variant>,
}

/// Parsed manifest with variants in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    variants: Vec<Variant>,
}

impl Manifest {
    /// Parse manifest text.
    ///
    /// Variants without a `master_url` are skipped. A manifest with no
    /// playable variant is rejected.
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(json)
            .map_err(|e| PreloadError::InvalidManifest(e.to_string()))?;

        let streams = raw.stream.unwrap_or_default();
        let mut variants: Vec<Variant> = [
            (Codec::Av1, streams.av1),
            (Codec::H265, streams.h265),
            (Codec::H264, streams.h264),
        ]
        .into_iter()
        .flat_map(|(codec, list)| {
            list.into_iter().map(move |mut v| {
                v.codec = codec;
                v
            })
        })
        .filter(|v| !v.master_url.trim().is_empty())
        .collect();

        if variants.is_empty() {
            return Err(PreloadError::InvalidManifest(
                "manifest contains no playable variant".to_string(),
            ));
        }

        variants.sort_by_key(Variant::preference);

        Ok(Self { variants })
    }

    /// Variants, most preferred first.
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn select(&self, policy: VariantPolicy) -> Option<&Variant> {
        match policy {
            VariantPolicy::HighestQuality => self.variants.first(),
            // max_by_key keeps the last maximum; iterate in reverse so the
            // most preferred variant wins ties.
            VariantPolicy::MostAvailable => self
                .variants
                .iter()
                .rev()
                .max_by_key(|v| v.backup_urls.len()),
            VariantPolicy::LowestBitrate => self
                .variants
                .iter()
                .min_by_key(|v| v.avg_bitrate.unwrap_or(u64::MAX)),
        }
    }
}
