//! Word-index tokenizer compatible with the Keras `Tokenizer.to_json()` export.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const DEFAULT_FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

#[derive(Debug, Deserialize)]
struct TokenizerExport {
    config: TokenizerConfig,
}

#[derive(Debug, Deserialize)]
struct TokenizerConfig {
    #[serde(default)]
    num_words: Option<u32>,
    #[serde(default = "default_filters")]
    filters: String,
    #[serde(default = "default_lower")]
    lower: bool,
    #[serde(default = "default_split")]
    split: String,
    #[serde(default)]
    char_level: bool,
    #[serde(default)]
    oov_token: Option<String>,
    /// JSON object encoded as a string, as Keras writes it
    word_index: String,
}

fn default_filters() -> String {
    DEFAULT_FILTERS.to_string()
}

fn default_lower() -> bool {
    true
}

fn default_split() -> String {
    " ".to_string()
}

/// Maps text to the padded integer sequence the text model expects
#[derive(Debug, Clone)]
pub struct KerasTokenizer {
    word_index: HashMap<String, u32>,
    num_words: Option<u32>,
    filters: String,
    lower: bool,
    split: String,
    char_level: bool,
    oov_index: Option<u32>,
}

impl KerasTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading tokenizer {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let export: TokenizerExport =
            serde_json::from_str(raw).context("parsing tokenizer export")?;
        let config = export.config;
        let word_index: HashMap<String, u32> =
            serde_json::from_str(&config.word_index).context("parsing tokenizer word_index")?;

        if config.split.is_empty() && !config.char_level {
            return Err(anyhow!("tokenizer split string is empty"));
        }

        let oov_index = config
            .oov_token
            .as_ref()
            .and_then(|token| word_index.get(token).copied());

        Ok(Self {
            word_index,
            // Keras treats a zero cutoff as no cutoff
            num_words: config.num_words.filter(|&n| n > 0),
            filters: config.filters,
            lower: config.lower,
            split: config.split,
            char_level: config.char_level,
            oov_index,
        })
    }

    pub fn vocabulary_size(&self) -> usize {
        self.word_index.len()
    }

    /// Token ids for `text`, without padding.
    pub fn texts_to_sequence(&self, text: &str) -> Vec<u32> {
        self.words(text)
            .into_iter()
            .filter_map(|word| match self.word_index.get(&word) {
                Some(&index) if self.num_words.is_none_or(|limit| index < limit) => Some(index),
                Some(_) | None => self.oov_index,
            })
            .collect()
    }

    /// Token ids padded and truncated at the end to exactly `max_len`.
    pub fn encode_padded(&self, text: &str, max_len: usize) -> Vec<u32> {
        let mut sequence = self.texts_to_sequence(text);
        sequence.truncate(max_len);
        sequence.resize(max_len, 0);
        sequence
    }

    fn words(&self, text: &str) -> Vec<String> {
        let text = if self.lower {
            text.to_lowercase()
        } else {
            text.to_string()
        };

        if self.char_level {
            return text
                .chars()
                .filter(|c| !self.filters.contains(*c))
                .map(|c| c.to_string())
                .collect();
        }

        let translated: String = text
            .chars()
            .map(|c| {
                if self.filters.contains(c) {
                    self.split.clone()
                } else {
                    c.to_string()
                }
            })
            .collect();

        translated
            .split(self.split.as_str())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }
}
