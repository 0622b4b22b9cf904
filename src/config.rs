//! Configuration for the TTS daemon.
//!
//! Read fresh on every request (see [`Config::load`]) so users can edit
//! behavior without restarting the daemon. Malformed documents fall back to
//! defaults in full rather than merging partially.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Synthesis mode: how much of the input text is spoken.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Ask the remote service for a 1–2 sentence reduction.
    #[default]
    Summary,
    /// Ask the remote service to render the text verbatim.
    Full,
}

impl Mode {
    fn instruction_fragment(self) -> &'static str {
        match self {
            Mode::Summary => "summarize this in 1-2 sentences",
            Mode::Full => "speak this verbatim",
        }
    }
}

/// Prebuilt voice name understood by the remote speech service.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Aoede,
    Kore,
    Puck,
    Charon,
    Fenrir,
    Leda,
    Orus,
    Zephyr,
}

impl Voice {
    /// The exact voice name string sent to the remote service.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Voice::Aoede => "Aoede",
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Fenrir => "Fenrir",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Zephyr => "Zephyr",
        }
    }
}

/// Spoken language for the "speak in &lt;language&gt;" instruction fragment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    #[default]
    Russian,
    Spanish,
    French,
    German,
    Japanese,
    Mandarin,
}

impl Language {
    fn display_name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Russian => "Russian",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Japanese => "Japanese",
            Language::Mandarin => "Mandarin",
        }
    }
}

fn default_style() -> String {
    "asmr".to_owned()
}

fn default_max_chars() -> usize {
    1000
}

/// Built-in style fragments, resolved before falling through to
/// `custom_styles`. Unknown style names contribute nothing.
fn builtin_style_fragment(style: &str) -> Option<&'static str> {
    match style {
        "asmr" => Some("speak softly and calmly, like a gentle ASMR narrator"),
        "neutral" => Some("speak in a clear, neutral tone"),
        "energetic" => Some("speak with energy and enthusiasm"),
        _ => None,
    }
}

/// User-supplied configuration, merged onto defaults for missing keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub voice: Voice,
    #[serde(default = "default_style")]
    pub style: String,
    pub language: Language,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    pub custom_styles: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            voice: Voice::default(),
            style: default_style(),
            language: Language::default(),
            max_chars: default_max_chars(),
            custom_styles: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults in full
    /// on any read or parse failure.
    ///
    /// This never fails: a missing or malformed document is logged at WARN
    /// and [`Config::default`] is returned, per spec.md §7's "configuration
    /// error" handling.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve this config's style name to its instruction fragment, if any.
    ///
    /// Built-in styles take precedence; unknown names fall through to
    /// `custom_styles`, and truly unknown names contribute nothing.
    #[must_use]
    pub fn resolved_style_text(&self) -> String {
        if let Some(fragment) = builtin_style_fragment(&self.style) {
            return fragment.to_owned();
        }
        self.custom_styles
            .get(&self.style)
            .cloned()
            .unwrap_or_default()
    }

    /// Build the instruction string sent as `system_instruction` to the
    /// remote speech service: mode fragment, style fragment, language
    /// fragment, joined by ". " and terminated with ".".
    #[must_use]
    pub fn build_instruction(&self) -> String {
        let mut fragments = vec![self.mode.instruction_fragment().to_owned()];

        let style_text = self.resolved_style_text();
        if !style_text.is_empty() {
            fragments.push(style_text);
        }

        fragments.push(format!("speak in {}", self.language.display_name()));

        format!("{}.", fragments.join(". "))
    }

    /// The session-shaping fields that, if changed, force the Session
    /// Manager to rebuild its session rather than reuse one already open.
    #[must_use]
    pub fn session_shape(&self) -> SessionShape {
        SessionShape {
            voice: self.voice,
            style_text: self.resolved_style_text(),
            mode: self.mode,
            language: self.language,
        }
    }
}

/// The subset of [`Config`] that identifies what a live session was opened
/// with. Two configs with the same shape can reuse one session even if other
/// fields (`max_chars`, unrelated `custom_styles` entries) differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionShape {
    pub voice: Voice,
    pub style_text: String,
    pub mode: Mode,
    pub language: Language,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Summary);
        assert_eq!(config.voice, Voice::Aoede);
        assert_eq!(config.style, "asmr");
        assert_eq!(config.language, Language::Russian);
        assert_eq!(config.max_chars, 1000);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let config = Config::load(Path::new("/nonexistent/tts_config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_malformed_json_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tts_config.json");
        std::fs::write(&path, "{ not json").expect("write");
        let config = Config::load(&path);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_partial_json_merges_onto_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tts_config.json");
        std::fs::write(&path, r#"{"voice":"Kore"}"#).expect("write");
        let config = Config::load(&path);
        assert_eq!(config.voice, Voice::Kore);
        assert_eq!(config.mode, Mode::Summary);
        assert_eq!(config.max_chars, 1000);
    }

    #[test]
    fn build_instruction_joins_fragments() {
        let config = Config::default();
        let instruction = config.build_instruction();
        assert!(instruction.ends_with('.'));
        assert!(instruction.contains("summarize"));
        assert!(instruction.contains("ASMR"));
        assert!(instruction.contains("Russian"));
    }

    #[test]
    fn unknown_style_contributes_nothing() {
        let config = Config {
            style: "nonexistent".to_owned(),
            ..Config::default()
        };
        assert_eq!(config.resolved_style_text(), "");
    }

    #[test]
    fn custom_style_resolves_after_builtins_miss() {
        let mut config = Config {
            style: "whisper".to_owned(),
            ..Config::default()
        };
        config
            .custom_styles
            .insert("whisper".to_owned(), "barely audible, hushed".to_owned());
        assert_eq!(config.resolved_style_text(), "barely audible, hushed");
    }

    #[test]
    fn session_shape_equal_for_identical_configs() {
        let a = Config::default();
        let b = Config::default();
        assert_eq!(a.session_shape(), b.session_shape());
    }

    #[test]
    fn session_shape_differs_on_voice_change() {
        let mut a = Config::default();
        let b = Config::default();
        a.voice = Voice::Kore;
        assert_ne!(a.session_shape(), b.session_shape());
    }
}
