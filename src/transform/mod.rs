//! Per-frame video transforms applied to outbound tracks.

mod pipeline;
mod track;

pub use pipeline::apply;
pub use track::TransformTrack;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Transform applied to every outbound video frame, selected once per
/// process at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    /// Pass frames through untouched
    #[default]
    None,
    /// Replace the frame with a 3-channel edge map
    Edges,
    /// Smoothed color quantization masked by detected edges
    Cartoon,
    /// Rotate about the frame center, 45 degrees per second of stream time
    Rotate,
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformMode::None => write!(f, "none"),
            TransformMode::Edges => write!(f, "edges"),
            TransformMode::Cartoon => write!(f, "cartoon"),
            TransformMode::Rotate => write!(f, "rotate"),
        }
    }
}

impl std::str::FromStr for TransformMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TransformMode::None),
            "edges" => Ok(TransformMode::Edges),
            "cartoon" => Ok(TransformMode::Cartoon),
            "rotate" => Ok(TransformMode::Rotate),
            other => Err(format!("unknown transform mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Edges".parse::<TransformMode>().unwrap(), TransformMode::Edges);
        assert_eq!("CARTOON".parse::<TransformMode>().unwrap(), TransformMode::Cartoon);
        assert!("swirl".parse::<TransformMode>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for mode in [
            TransformMode::None,
            TransformMode::Edges,
            TransformMode::Cartoon,
            TransformMode::Rotate,
        ] {
            assert_eq!(mode.to_string().parse::<TransformMode>().unwrap(), mode);
        }
    }
}
