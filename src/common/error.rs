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

use rust_bert::RustBertError;
use rust_tokenizers::error::TokenizerError;
use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Bert4RsError {
    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Corpus error at line {line}: {message}")]
    CorpusError { line: usize, message: String },

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

impl From<std::io::Error> for Bert4RsError {
    fn from(error: std::io::Error) -> Self {
        Bert4RsError::IOError(error.to_string())
    }
}

impl From<TokenizerError> for Bert4RsError {
    fn from(error: TokenizerError) -> Self {
        Bert4RsError::TokenizerError(error.to_string())
    }
}

impl From<TchError> for Bert4RsError {
    fn from(error: TchError) -> Self {
        Bert4RsError::TchError(error.to_string())
    }
}

impl From<RustBertError> for Bert4RsError {
    fn from(error: RustBertError) -> Self {
        Bert4RsError::ModelError(error.to_string())
    }
}

impl From<serde_json::Error> for Bert4RsError {
    fn from(error: serde_json::Error) -> Self {
        Bert4RsError::InvalidConfigurationError(error.to_string())
    }
}
