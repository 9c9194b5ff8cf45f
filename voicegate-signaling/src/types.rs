//! Common types used throughout the signaling core

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generate a 12-character nanoid for entity IDs
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Stable identifier for a connected user, unique within a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque identifier for a voice/stream room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Both kinds, in the order fan-out scans them
    pub const ALL: [Self; 2] = [Self::Audio, Self::Video];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of room a participant is connected to.
///
/// `Stream` rooms restrict video publication to the stream owner and
/// gate viewer updates on a resolved video SSRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Call,
    GuildVoice,
    Stream,
}

/// Transport identifiers for a track a participant is producing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub ssrc: u32,
    /// Companion retransmission SSRC, 0 when the track has none (audio)
    #[serde(default)]
    pub rtx_ssrc: u32,
}

impl TrackInfo {
    #[must_use]
    pub const fn audio(ssrc: u32) -> Self {
        Self { ssrc, rtx_ssrc: 0 }
    }

    #[must_use]
    pub const fn video(ssrc: u32, rtx_ssrc: u32) -> Self {
        Self { ssrc, rtx_ssrc }
    }
}

/// Resolution constraint carried in client stream metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxResolution {
    #[serde(rename = "type")]
    pub kind: String,
    pub width: u32,
    pub height: u32,
}

impl Default for MaxResolution {
    fn default() -> Self {
        Self {
            kind: "fixed".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

fn default_quality() -> u8 {
    100
}

fn default_max_bitrate() -> u32 {
    2_500_000
}

fn default_max_framerate() -> u8 {
    20
}

/// Client-declared metadata for one video stream.
///
/// Clients send `type: "screen"` when going live but expect `"video"`
/// back, so the fan-out always rewrites the type on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub rid: Option<String>,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default)]
    pub rtx_ssrc: u32,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: u32,
    #[serde(default = "default_max_framerate")]
    pub max_framerate: u8,
    #[serde(default)]
    pub max_resolution: MaxResolution,
}

impl StreamEntry {
    /// Fallback metadata for a producer that never declared a stream
    /// entry, used when reconciling a late joiner.
    #[must_use]
    pub fn fallback(ssrc: u32, rtx_ssrc: u32, active: bool) -> Self {
        Self {
            kind: "video".to_string(),
            rid: Some("100".to_string()),
            ssrc,
            rtx_ssrc,
            active,
            quality: default_quality(),
            max_bitrate: default_max_bitrate(),
            max_framerate: default_max_framerate(),
            max_resolution: MaxResolution::default(),
        }
    }
}
