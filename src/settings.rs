//! Parent-facing story settings
//!
//! Target words, enabled actions, and story languages, persisted as JSON in
//! the platform data directory. Story sessions read them once at start.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Most target words a parent may keep
pub const MAX_WORDS: usize = 20;

/// Longest accepted target word
pub const MAX_WORD_LEN: usize = 15;

/// Fewest enabled actions
pub const MIN_ACTIONS: usize = 3;

/// Most enabled actions
pub const MAX_ACTIONS: usize = 6;

/// Action ids a story may ask for, with display names
pub const KNOWN_ACTIONS: &[(&str, &str)] = &[
    ("wave", "Wave"),
    ("point", "Point"),
    ("clap", "Clap"),
    ("thumbsup", "Thumbs Up"),
    ("jump", "Jump"),
    ("spin", "Spin Around"),
    ("nod", "Nod"),
    ("shake", "Shake Head"),
    ("wiggle", "Wiggle Fingers"),
];

/// Story languages, code and name
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("pl", "Polish"),
    ("nl", "Dutch"),
    ("hi", "Hindi"),
    ("zh", "Mandarin"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("sv", "Swedish"),
    ("da", "Danish"),
    ("no", "Norwegian"),
    ("fi", "Finnish"),
    ("tr", "Turkish"),
    ("el", "Greek"),
    ("ar", "Arabic"),
    ("cs", "Czech"),
    ("ro", "Romanian"),
    ("bg", "Bulgarian"),
    ("id", "Indonesian"),
    ("fil", "Filipino"),
    ("vi", "Vietnamese"),
    ("ta", "Tamil"),
    ("uk", "Ukrainian"),
    ("ru", "Russian"),
    ("he", "Hebrew"),
];

/// Persisted settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Vocabulary words, uppercased
    pub words: Vec<String>,

    /// Enabled action ids
    pub actions: Vec<String>,

    /// Enabled language codes
    pub languages: Vec<String>,

    /// Language stories are primarily told in
    pub primary_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            words: ["TREASURE", "CRYSTAL", "FOREST", "RAINBOW"]
                .map(String::from)
                .to_vec(),
            actions: ["wave", "point", "clap"].map(String::from).to_vec(),
            languages: vec!["en".to_string()],
            primary_language: "en".to_string(),
        }
    }
}

impl Settings {
    /// Add a target word (trimmed and uppercased)
    ///
    /// # Errors
    ///
    /// Returns error if the word is empty, too long, already present, or the
    /// list is full
    pub fn add_word(&mut self, word: &str) -> Result<()> {
        let word = word.trim().to_uppercase();

        if word.is_empty() {
            return Err(Error::Settings("word is empty".to_string()));
        }
        if word.chars().count() > MAX_WORD_LEN {
            return Err(Error::Settings(format!(
                "word is longer than {MAX_WORD_LEN} characters"
            )));
        }
        if self.words.contains(&word) {
            return Err(Error::Settings(format!("{word} is already in the list")));
        }
        if self.words.len() >= MAX_WORDS {
            return Err(Error::Settings(format!("at most {MAX_WORDS} words")));
        }

        self.words.push(word);
        Ok(())
    }

    /// Remove a target word
    ///
    /// # Errors
    ///
    /// Returns error if the word is not in the list
    pub fn remove_word(&mut self, word: &str) -> Result<()> {
        let word = word.trim().to_uppercase();
        let before = self.words.len();
        self.words.retain(|w| *w != word);

        if self.words.len() == before {
            return Err(Error::Settings(format!("{word} is not in the list")));
        }
        Ok(())
    }

    /// Enable or disable an action; returns whether it is now enabled
    ///
    /// # Errors
    ///
    /// Returns error if the action is unknown or the toggle would leave fewer
    /// than [`MIN_ACTIONS`] or more than [`MAX_ACTIONS`] enabled
    pub fn toggle_action(&mut self, action: &str) -> Result<bool> {
        let action = action.trim().to_lowercase();

        if !KNOWN_ACTIONS.iter().any(|(id, _)| *id == action) {
            return Err(Error::Settings(format!("unknown action: {action}")));
        }

        if let Some(pos) = self.actions.iter().position(|a| *a == action) {
            if self.actions.len() <= MIN_ACTIONS {
                return Err(Error::Settings(format!("keep at least {MIN_ACTIONS} actions")));
            }
            self.actions.remove(pos);
            return Ok(false);
        }

        if self.actions.len() >= MAX_ACTIONS {
            return Err(Error::Settings(format!("at most {MAX_ACTIONS} actions")));
        }
        self.actions.push(action);
        Ok(true)
    }

    /// Enable or disable a language; returns whether it is now enabled
    ///
    /// Removing the primary language promotes the next enabled one.
    ///
    /// # Errors
    ///
    /// Returns error if the code is unknown or it is the last language
    pub fn toggle_language(&mut self, code: &str) -> Result<bool> {
        let code = code.trim().to_lowercase();

        if !LANGUAGES.iter().any(|(c, _)| *c == code) {
            return Err(Error::Settings(format!("unknown language: {code}")));
        }

        if let Some(pos) = self.languages.iter().position(|l| *l == code) {
            if self.languages.len() <= 1 {
                return Err(Error::Settings("keep at least one language".to_string()));
            }
            self.languages.remove(pos);
            if self.primary_language == code {
                self.primary_language = self.languages[0].clone();
            }
            return Ok(false);
        }

        self.languages.push(code);
        Ok(true)
    }

    /// Choose the primary language
    ///
    /// # Errors
    ///
    /// Returns error if the language is not enabled
    pub fn set_primary(&mut self, code: &str) -> Result<()> {
        let code = code.trim().to_lowercase();

        if !self.languages.contains(&code) {
            return Err(Error::Settings(format!("{code} is not an enabled language")));
        }

        self.primary_language = code;
        Ok(())
    }
}

/// JSON file holding [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store at the default location in the platform data dir
    #[must_use]
    pub fn new() -> Self {
        Self::at(crate::config::data_dir().join("settings.json"))
    }

    /// Store at an explicit path
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings; defaults if the file does not exist yet
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Write settings, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Load, apply `change`, and save only if it succeeded
    ///
    /// # Errors
    ///
    /// Returns the change's error (store untouched) or an I/O error
    pub fn update<T>(&self, change: impl FnOnce(&mut Settings) -> Result<T>) -> Result<T> {
        let mut settings = self.load()?;
        let out = change(&mut settings)?;
        self.save(&settings)?;
        Ok(out)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}
