//! Length unit conversion
//!
//! Drawings arrive in whatever unit their author picked; everything past
//! the importer works in millimetres.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Drawing length unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    /// Inches
    Inch,
    /// Feet
    Foot,
    /// Millimetres
    #[default]
    Millimeter,
    /// Centimetres
    Centimeter,
    /// Decimetres
    Decimeter,
    /// Metres
    Meter,
    /// Thousandths of an inch
    Mil,
    /// Micrometres
    Micron,
}

impl LengthUnit {
    /// Millimetres per unit
    pub fn to_mm(&self) -> f64 {
        match self {
            Self::Inch => 25.4,
            Self::Foot => 304.8,
            Self::Millimeter => 1.0,
            Self::Centimeter => 10.0,
            Self::Decimeter => 100.0,
            Self::Meter => 1000.0,
            Self::Mil => 0.0254,
            Self::Micron => 1e-3,
        }
    }

    /// Map a DXF `$INSUNITS` code; unitless and unknown codes are `None`
    pub fn from_insunits(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Inch),
            2 => Some(Self::Foot),
            4 => Some(Self::Millimeter),
            5 => Some(Self::Centimeter),
            6 => Some(Self::Meter),
            9 => Some(Self::Mil),
            13 => Some(Self::Micron),
            14 => Some(Self::Decimeter),
            _ => None,
        }
    }

    /// Convert a value in this unit to millimetres
    pub fn convert_to_mm(&self, value: f64) -> f64 {
        value * self.to_mm()
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Inch => "in",
            Self::Foot => "ft",
            Self::Millimeter => "mm",
            Self::Centimeter => "cm",
            Self::Decimeter => "dm",
            Self::Meter => "m",
            Self::Mil => "mil",
            Self::Micron => "um",
        };
        write!(f, "{}", symbol)
    }
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" | "inch" | "inches" => Ok(Self::Inch),
            "ft" | "foot" | "feet" => Ok(Self::Foot),
            "mm" | "millimeter" | "millimeters" | "millimetre" => Ok(Self::Millimeter),
            "cm" | "centimeter" | "centimeters" => Ok(Self::Centimeter),
            "dm" | "decimeter" | "decimeters" => Ok(Self::Decimeter),
            "m" | "meter" | "meters" | "metre" => Ok(Self::Meter),
            "mil" | "mils" | "thou" => Ok(Self::Mil),
            "um" | "µm" | "micron" | "microns" => Ok(Self::Micron),
            _ => Err(format!("Unknown length unit: {}", s)),
        }
    }
}
