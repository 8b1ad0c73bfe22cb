// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Tokenization helpers
//!
//! - `CharTokenizer`: character-level lookup into a BERT WordPiece vocabulary. One token is produced per
//!   character so that token positions line up with character-level entity annotations.
//! - `detokenize`: joins WordPiece tokens back into text, without inserting spaces between CJK characters.

use crate::common::error::Bert4RsError;
use lazy_static::lazy_static;
use regex::Regex;
use rust_tokenizers::vocab::{BertVocab, Vocab};
use std::path::Path;

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";

const CJK_PUNCTUATION: &str = "\u{ff02}\u{ff03}\u{ff04}\u{ff05}\u{ff06}\u{ff07}\u{ff08}\u{ff09}\u{ff0a}\u{ff0b}\u{ff0c}\u{ff0d}\u{ff0f}\u{ff1a}\u{ff1b}\u{ff1c}\u{ff1d}\u{ff1e}\u{ff20}\u{ff3b}\u{ff3c}\u{ff3d}\u{ff3e}\u{ff3f}\u{ff40}\u{ff5b}\u{ff5c}\u{ff5d}\u{ff5e}\u{ff5f}\u{ff60}\u{ff62}\u{ff63}\u{ff64}\u{3000}\u{3001}\u{3003}\u{3008}\u{3009}\u{300a}\u{300b}\u{300c}\u{300d}\u{300e}\u{300f}\u{3010}\u{3011}\u{3014}\u{3015}\u{3016}\u{3017}\u{3018}\u{3019}\u{301a}\u{301b}\u{301c}\u{301d}\u{301e}\u{301f}\u{3030}\u{303e}\u{303f}\u{2013}\u{2014}\u{2018}\u{2019}\u{201b}\u{201c}\u{201d}\u{201e}\u{201f}\u{2026}\u{2027}\u{fe4f}\u{fe51}\u{fe54}\u{00b7}\u{ff01}\u{ff1f}\u{ff61}\u{3002}";

lazy_static! {
    static ref MULTIPLE_SPACES: Regex = Regex::new(" +").unwrap();
    static ref CONTRACTIONS: Regex = Regex::new("' (re|m|s|t|ve|d|ll) ").unwrap();
    static ref SPACE_AFTER_PUNCTUATION: Regex = {
        let alternatives = CJK_PUNCTUATION
            .chars()
            .chain("+-/={(<[".chars())
            .map(|c| regex::escape(&c.to_string()))
            .collect::<Vec<String>>()
            .join("|");
        Regex::new(&format!("({}) ", alternatives)).unwrap()
    };
    static ref SPLIT_DECIMAL: Regex = Regex::new(r"(\d\.) (\d)").unwrap();
}

pub fn is_cjk_character(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2B73F
        | 0x2B740..=0x2B81F
        | 0x2B820..=0x2CEAF
        | 0xF900..=0xFAFF
        | 0x2F800..=0x2FA1F)
}

pub fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || CJK_PUNCTUATION.contains(c)
}

/// Special tokens are the bracketed vocabulary entries (`[CLS]`, `[SEP]`, `[PAD]`...)
pub fn is_special_token(token: &str) -> bool {
    token.len() > 2 && token.starts_with('[') && token.ends_with(']')
}

/// Joins WordPiece tokens into a string.
///
/// Special tokens are dropped, `##` continuation pieces are merged with the previous token, and CJK
/// characters are concatenated without spaces. Spaces following opening brackets, operators and CJK
/// punctuation are removed.
///
/// # Example
///
/// ```
/// use bert4rs::pipelines::tokenization::detokenize;
///
/// let tokens = ["[CLS]", "今", "天", "天", "气", "不", "错", "[SEP]"];
/// assert_eq!(detokenize(&tokens), "今天天气不错");
/// ```
pub fn detokenize<S: AsRef<str>>(tokens: &[S]) -> String {
    let tokens = tokens
        .iter()
        .map(|token| token.as_ref())
        .filter(|token| !is_special_token(token))
        .collect::<Vec<&str>>();

    let mut text = String::new();
    for (position, token) in tokens.iter().enumerate() {
        let mut chars = token.chars();
        let single_char = match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        };
        if let Some(stripped) = token.strip_prefix("##") {
            text.push_str(stripped);
        } else if single_char.map_or(false, is_cjk_character) {
            text.push_str(token);
        } else if single_char.map_or(false, is_punctuation) {
            text.push_str(token);
            text.push(' ');
        } else if position > 0 && text.chars().last().map_or(false, is_cjk_character) {
            text.push_str(token);
        } else {
            text.push(' ');
            text.push_str(token);
        }
    }

    let text = MULTIPLE_SPACES.replace_all(&text, " ");
    let text = CONTRACTIONS.replace_all(&text, "'$1 ");
    let text = SPACE_AFTER_PUNCTUATION.replace_all(&text, "$1");
    let text = SPLIT_DECIMAL.replace_all(&text, "$1$2");
    text.trim().to_string()
}

/// # Character-level tokenizer backed by a BERT vocabulary
/// Every input unit is looked up as a whole in the vocabulary (after optional lower casing) and mapped
/// to the unknown token when absent. No special tokens are added, so that the i-th token always
/// corresponds to the i-th character of the input.
pub struct CharTokenizer {
    vocab: BertVocab,
    lower_case: bool,
}

impl CharTokenizer {
    pub fn new(vocab: BertVocab, lower_case: bool) -> CharTokenizer {
        CharTokenizer { vocab, lower_case }
    }

    /// Loads the vocabulary from a `vocab.txt` file (one token per line)
    pub fn from_file<P: AsRef<Path>>(path: P, lower_case: bool) -> Result<CharTokenizer, Bert4RsError> {
        let vocab = BertVocab::from_file(path)?;
        Ok(CharTokenizer::new(vocab, lower_case))
    }

    pub fn vocab(&self) -> &BertVocab {
        &self.vocab
    }

    /// Splits a text into single-character tokens (whitespace included, mapped to the unknown token).
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.chars().map(|c| c.to_string()).collect()
    }

    pub fn convert_tokens_to_ids<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<i64> {
        tokens
            .iter()
            .map(|token| {
                let token = token.as_ref();
                if self.lower_case && !is_special_token(token) {
                    self.vocab.token_to_id(&token.to_lowercase())
                } else {
                    self.vocab.token_to_id(token)
                }
            })
            .collect()
    }

    pub fn encode(&self, text: &str) -> Vec<i64> {
        self.convert_tokens_to_ids(&self.tokenize(text))
    }

    pub fn pad_id(&self) -> i64 {
        self.vocab.token_to_id(PAD_TOKEN)
    }

    pub fn decode(&self, token_ids: &[i64]) -> String {
        let tokens = token_ids
            .iter()
            .map(|id| self.vocab.id_to_token(id))
            .collect::<Vec<String>>();
        detokenize(&tokens)
    }
}
