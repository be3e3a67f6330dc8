use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ComposeError;

/// Upper bound on a single generation, in seconds.
pub const MAX_DURATION: u32 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Style {
    LofiHipHop,
    Ambient,
    Electronic,
    Classical,
    Jazz,
    Experimental,
}

impl Style {
    pub const ALL: [Style; 6] = [
        Style::LofiHipHop,
        Style::Ambient,
        Style::Electronic,
        Style::Classical,
        Style::Jazz,
        Style::Experimental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::LofiHipHop => "lofi-hiphop",
            Style::Ambient => "ambient",
            Style::Electronic => "electronic",
            Style::Classical => "classical",
            Style::Jazz => "jazz",
            Style::Experimental => "experimental",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Style::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| ComposeError::UnsupportedStyle(s.to_string()))
    }
}

impl TryFrom<String> for Style {
    type Error = ComposeError;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<Style> for String {
    fn from(s: Style) -> Self { s.as_str().to_string() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl FromStr for Complexity {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            other => Err(ComposeError::UnsupportedComplexity(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LofiSettings {
    /// Inclusive `[min, max]` tempo window.
    pub bpm_range: [u32; 2],
    pub vinyl_crackle: bool,
    pub jazz_chords: bool,
}

impl Default for LofiSettings {
    fn default() -> Self {
        Self { bpm_range: [70, 90], vinyl_crackle: true, jazz_chords: true }
    }
}

/// Caller-supplied generation parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicConfig {
    pub chain_id: u64,
    pub style: Style,
    /// Seconds.
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default)]
    pub lofi_settings: LofiSettings,
    #[serde(default = "default_complexity")]
    pub complexity: Complexity,
}

fn default_duration() -> u32 { 60 }
fn default_complexity() -> Complexity { Complexity::Medium }

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            chain_id: 33139,
            style: Style::LofiHipHop,
            duration: default_duration(),
            lofi_settings: LofiSettings::default(),
            complexity: default_complexity(),
        }
    }
}

impl MusicConfig {
    pub fn validate(&self) -> Result<(), ComposeError> {
        if self.duration == 0 || self.duration > MAX_DURATION {
            return Err(ComposeError::InvalidDuration { duration: self.duration, max: MAX_DURATION });
        }
        let [min, max] = self.lofi_settings.bpm_range;
        if min == 0 || min > max || max > 240 {
            return Err(ComposeError::InvalidBpmRange { min, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_format() {
        let cfg: MusicConfig = serde_json::from_value(serde_json::json!({
            "chainId": 33139,
            "style": "lofi-hiphop",
            "lofiSettings": { "bpmRange": [70, 90] }
        }))
        .unwrap();
        assert_eq!(cfg.chain_id, 33139);
        assert_eq!(cfg.style, Style::LofiHipHop);
        assert_eq!(cfg.duration, 60);
        assert_eq!(cfg.lofi_settings.bpm_range, [70, 90]);
        assert!(cfg.lofi_settings.vinyl_crackle);
        assert_eq!(cfg.complexity, Complexity::Medium);
    }

    #[test]
    fn test_unknown_style_is_rejected() {
        let err = "vaporwave".parse::<Style>().unwrap_err();
        assert!(matches!(err, ComposeError::UnsupportedStyle(ref s) if s == "vaporwave"));
        let res: Result<MusicConfig, _> =
            serde_json::from_value(serde_json::json!({ "chainId": 1, "style": "vaporwave" }));
        assert!(res.unwrap_err().to_string().contains("vaporwave"));
    }

    #[test]
    fn test_style_names_roundtrip() {
        for style in Style::ALL {
            assert_eq!(style.as_str().parse::<Style>().unwrap(), style);
        }
    }

    #[test]
    fn test_duration_bounds() {
        let mut cfg = MusicConfig::default();
        cfg.duration = MAX_DURATION;
        assert!(cfg.validate().is_ok());
        cfg.duration = MAX_DURATION + 1;
        assert!(matches!(cfg.validate(), Err(ComposeError::InvalidDuration { .. })));
        cfg.duration = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bpm_range_bounds() {
        let mut cfg = MusicConfig::default();
        cfg.lofi_settings.bpm_range = [90, 70];
        assert!(matches!(cfg.validate(), Err(ComposeError::InvalidBpmRange { min: 90, max: 70 })));
        cfg.lofi_settings.bpm_range = [80, 80];
        assert!(cfg.validate().is_ok());
    }
}
