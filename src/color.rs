use anyhow::{bail, Result};
use palette::color_difference::Ciede2000;
use palette::{IntoColor, Lab, Srgb};
use serde::{Deserialize, Serialize};

/// Core color type used throughout the pipeline.
/// Normalized sRGB components in [0, 1], as the host document stores them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorSample {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl ColorSample {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Build from 8-bit channels.
    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::from_srgb(Srgb::new(r, g, b).into_format())
    }

    /// Parse a hex color string like `#ff8800` or `#FF8800`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            bail!(
                "invalid hex color: expected 6 hex digits, got {}",
                hex.len()
            );
        }
        let r = u8::from_str_radix(&hex[0..2], 16)?;
        let g = u8::from_str_radix(&hex[2..4], 16)?;
        let b = u8::from_str_radix(&hex[4..6], 16)?;
        Ok(Self::from_rgb8(r, g, b))
    }

    /// Serialize to lowercase hex `#rrggbb`, clamping out-of-range channels.
    pub fn to_hex(self) -> String {
        let rgb = self.to_srgb_u8();
        format!("#{:02x}{:02x}{:02x}", rgb.red, rgb.green, rgb.blue)
    }

    /// Convert to `palette::Srgb<f32>`.
    pub fn to_srgb(self) -> Srgb<f32> {
        Srgb::new(self.r, self.g, self.b)
    }

    /// Create from `palette::Srgb<f32>`.
    pub fn from_srgb(srgb: Srgb<f32>) -> Self {
        Self {
            r: srgb.red,
            g: srgb.green,
            b: srgb.blue,
        }
    }

    /// Clamp to [0, 1] and quantize to 8-bit channels.
    pub fn to_srgb_u8(self) -> Srgb<u8> {
        let clamped = Srgb::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        );
        clamped.into_format()
    }

    /// Convert to CIELAB (D65).
    ///
    /// Gamma-decodes sRGB, maps linear RGB to XYZ and applies the CIE
    /// nonlinear transform with the 216/24389 (~0.008856) knee.
    pub fn to_lab(self) -> Lab {
        let srgb = Srgb::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        );
        srgb.into_color()
    }

    /// CIEDE2000 color difference between two samples.
    pub fn delta_e(self, other: ColorSample) -> f32 {
        delta_e_lab(self.to_lab(), other.to_lab())
    }
}

/// CIEDE2000 difference between two colors already in LAB.
pub fn delta_e_lab(a: Lab, b: Lab) -> f32 {
    a.difference(b)
}

impl std::fmt::Display for ColorSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}
