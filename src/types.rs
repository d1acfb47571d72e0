//! Core types shared across all modules.

use crate::protocol::mime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn one() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub fn add(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }

    pub fn mul(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x * o.x, self.y * o.y, self.z * o.z)
    }

    /// Distance on the ground plane (x/z), ignoring height.
    pub fn planar_distance(self, o: Vec3) -> f32 {
        let dx = self.x - o.x;
        let dz = self.z - o.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Components rounded to three decimals, as reported in snapshots.
    pub fn rounded(self) -> [f32; 3] {
        [round3(self.x), round3(self.y), round3(self.z)]
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

fn round3(v: f32) -> f32 {
    let r = (v * 1000.0).round() / 1000.0;
    // Avoid "-0" in serialized snapshots.
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Euler angles in radians, applied in XYZ order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Euler {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Euler {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn rounded(self) -> [f32; 3] {
        [round3(self.x), round3(self.y), round3(self.z)]
    }
}

/// Unit quaternion used to compose node rotations down the scene graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }

    pub fn from_euler(e: Euler) -> Self {
        let (s1, c1) = (e.x / 2.0).sin_cos();
        let (s2, c2) = (e.y / 2.0).sin_cos();
        let (s3, c3) = (e.z / 2.0).sin_cos();
        Self {
            x: s1 * c2 * c3 + c1 * s2 * s3,
            y: c1 * s2 * c3 - s1 * c2 * s3,
            z: c1 * c2 * s3 + s1 * s2 * c3,
            w: c1 * c2 * c3 - s1 * s2 * s3,
        }
    }

    pub fn mul(self, b: Quat) -> Quat {
        let a = self;
        Quat {
            x: a.x * b.w + a.w * b.x + a.y * b.z - a.z * b.y,
            y: a.y * b.w + a.w * b.y + a.z * b.x - a.x * b.z,
            z: a.z * b.w + a.w * b.z + a.x * b.y - a.y * b.x,
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
        }
    }

    pub fn rotate(self, v: Vec3) -> Vec3 {
        let (qx, qy, qz, qw) = (self.x, self.y, self.z, self.w);
        let tx = 2.0 * (qy * v.z - qz * v.y);
        let ty = 2.0 * (qz * v.x - qx * v.z);
        let tz = 2.0 * (qx * v.y - qy * v.x);
        Vec3::new(
            v.x + qw * tx + qy * tz - qz * ty,
            v.y + qw * ty + qz * tx - qx * tz,
            v.z + qw * tz + qx * ty - qy * tx,
        )
    }

    /// Back to XYZ Euler angles.
    pub fn to_euler(self) -> Euler {
        let (x, y, z, w) = (self.x, self.y, self.z, self.w);
        // Rotation-matrix terms needed for XYZ extraction.
        let m11 = 1.0 - 2.0 * (y * y + z * z);
        let m12 = 2.0 * (x * y - z * w);
        let m13 = 2.0 * (x * z + y * w);
        let m22 = 1.0 - 2.0 * (x * x + z * z);
        let m23 = 2.0 * (y * z - x * w);
        let m32 = 2.0 * (y * z + x * w);
        let m33 = 1.0 - 2.0 * (x * x + y * y);

        let ey = m13.clamp(-1.0, 1.0).asin();
        if m13.abs() < 0.999_999_9 {
            Euler::new((-m23).atan2(m33), ey, (-m12).atan2(m11))
        } else {
            Euler::new(m32.atan2(m22), ey, 0.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

/// 24-bit RGB material color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    /// Lowercase `#rrggbb`.
    pub fn to_hex(self) -> String {
        format!("#{:06x}", self.0 & 0x00ff_ffff)
    }

    /// Parse a `#rrggbb` literal (leading `#` optional).
    pub fn from_hex(s: &str) -> Option<Color> {
        let digits = s.trim().trim_start_matches('#');
        if digits.len() != 6 {
            return None;
        }
        u32::from_str_radix(digits, 16).ok().map(Color)
    }

    /// Resolve a named color or a hex literal.
    pub fn parse(s: &str) -> Option<Color> {
        let named = match s.trim().to_lowercase().as_str() {
            "red" => Some(0xff0000),
            "blue" => Some(0x0066ff),
            "green" => Some(0x00ff00),
            "yellow" => Some(0xffff00),
            "orange" => Some(0xff8800),
            "purple" => Some(0x9900ff),
            "pink" => Some(0xff69b4),
            "cyan" => Some(0x00ffff),
            "white" => Some(0xffffff),
            "black" => Some(0x000000),
            "gold" => Some(0xffd700),
            "silver" => Some(0xc0c0c0),
            "brown" => Some(0x8b7355),
            _ => None,
        };
        named.map(Color).or_else(|| Color::from_hex(s))
    }
}

// ---------------------------------------------------------------------------
// Session configuration
// ---------------------------------------------------------------------------

/// Which modality the remote model replies in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

impl std::str::FromStr for ResponseModality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            other => Err(format!("unknown response modality '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote model identifier sent in the setup message.
    pub model: String,
    pub response_modality: ResponseModality,
    /// Node cap for the snapshot attached to every outgoing turn.
    pub turn_snapshot_nodes: usize,
    /// Upper bound on a single credential attempt (open + setup handshake).
    pub connect_timeout: Duration,
    /// How long voice capture waits for the local transcript to settle.
    pub transcript_settle: Duration,
    /// MIME type declared for recorded voice turns.
    pub voice_mime_type: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.0-flash-exp".into(),
            response_modality: ResponseModality::Audio,
            turn_snapshot_nodes: 120,
            connect_timeout: Duration::from_secs(10),
            transcript_settle: Duration::from_millis(500),
            voice_mime_type: mime::RECORDED_VOICE.into(),
        }
    }
}
