/// Tag color utilities
///
/// Tags carry a display color stored as `#RRGGBB`. This module handles:
/// - Parsing and validating hex colors
/// - Converting between hex, RGB and HSV (the color picker works in HSV)
use std::fmt;
use std::str::FromStr;

use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Color given to tags the indexer creates on its own (file type, date bucket)
pub const DEFAULT_TAG_COLOR: TagColor = TagColor::rgb(0x37, 0x3c, 0x40);

/// An opaque sRGB color, serialized as `#RRGGBB`
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagColor(Srgb<u8>);

impl TagColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(Srgb::new(r, g, b))
    }

    pub fn red(self) -> u8 {
        self.0.red
    }

    pub fn green(self) -> u8 {
        self.0.green
    }

    pub fn blue(self) -> u8 {
        self.0.blue
    }

    /// Build a color from hue (degrees, wrapped into 0..360), saturation and
    /// value (both clamped into 0..=1).
    pub fn from_hsv(h: f64, s: f64, v: f64) -> Self {
        let hsv: Hsv = Hsv::new(
            h.rem_euclid(360.0) as f32,
            s.clamp(0.0, 1.0) as f32,
            v.clamp(0.0, 1.0) as f32,
        );
        let srgb: Srgb = Srgb::from_color(hsv);
        Self(srgb.into_format())
    }

    /// Hue in degrees (0..360), saturation and value in 0..=1
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let srgb: Srgb = self.0.into_format();
        let hsv: Hsv = Hsv::from_color(srgb);
        (
            f64::from(hsv.hue.into_positive_degrees()),
            f64::from(hsv.saturation),
            f64::from(hsv.value),
        )
    }

    pub fn to_hex(self) -> String {
        format!("#{:X}", self.0)
    }
}

impl Default for TagColor {
    fn default() -> Self {
        DEFAULT_TAG_COLOR
    }
}

impl PartialEq for TagColor {
    fn eq(&self, other: &Self) -> bool {
        (self.red(), self.green(), self.blue()) == (other.red(), other.green(), other.blue())
    }
}

impl Eq for TagColor {}

impl fmt::Debug for TagColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TagColor").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for TagColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TagColor {
    type Err = Error;

    /// Exactly six hex digits, with or without a leading `#`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidColor(s.to_string()));
        }
        Srgb::<u8>::from_str(digits)
            .map(Self)
            .map_err(|_| Error::InvalidColor(s.to_string()))
    }
}

impl TryFrom<String> for TagColor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TagColor> for String {
    fn from(color: TagColor) -> Self {
        color.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parsing() {
        assert_eq!("#373c40".parse::<TagColor>().unwrap(), DEFAULT_TAG_COLOR);
        assert_eq!("FF0080".parse::<TagColor>().unwrap(), TagColor::rgb(255, 0, 128));
        assert!("#12345".parse::<TagColor>().is_err());
        assert!("#GG0000".parse::<TagColor>().is_err());
        assert!("".parse::<TagColor>().is_err());
        // Shorthand forms are not tag colors
        assert!("#FFF".parse::<TagColor>().is_err());
        assert!("#+12345".parse::<TagColor>().is_err());
    }

    #[test]
    fn test_hex_output_is_uppercase() {
        assert_eq!(TagColor::rgb(0xab, 0x01, 0xff).to_hex(), "#AB01FF");
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(TagColor::from_hsv(0.0, 1.0, 1.0), TagColor::rgb(255, 0, 0));
        assert_eq!(TagColor::from_hsv(120.0, 1.0, 1.0), TagColor::rgb(0, 255, 0));
        assert_eq!(TagColor::from_hsv(240.0, 1.0, 1.0), TagColor::rgb(0, 0, 255));
        assert_eq!(TagColor::from_hsv(360.0, 1.0, 1.0), TagColor::rgb(255, 0, 0));
        assert_eq!(TagColor::from_hsv(42.0, 0.0, 0.0), TagColor::rgb(0, 0, 0));
    }

    #[test]
    fn test_hsv_round_trip_keeps_color() {
        let original = TagColor::rgb(0x20, 0x90, 0xd0);
        let (h, s, v) = original.to_hsv();
        assert_eq!(TagColor::from_hsv(h, s, v), original);
    }

    #[test]
    fn test_hsv_of_default_color() {
        let (h, s, v) = DEFAULT_TAG_COLOR.to_hsv();
        assert!((h - 206.67).abs() < 0.5, "hue {h}");
        assert!((s - 0.1406).abs() < 0.01, "saturation {s}");
        assert!((v - 0.251).abs() < 0.01, "value {v}");
        assert_eq!(DEFAULT_TAG_COLOR.red(), 0x37);
    }

    #[test]
    fn test_serde_uses_hex_string() {
        let json = serde_json::to_string(&TagColor::rgb(1, 2, 3)).unwrap();
        assert_eq!(json, "\"#010203\"");
        assert!(serde_json::from_str::<TagColor>("\"nope\"").is_err());
    }
}
