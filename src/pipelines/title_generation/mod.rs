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

//! # Title generation
//! Writes a short title for a text with a pretrained T5 (e.g. T5 PEGASUS) encoder-decoder. The source text is
//! encoded once and titles are decoded auto-regressively by `AutoRegressiveDecoder`, which supports beam search
//! and top-k / nucleus random sampling over any `NextTokenScorer`.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use bert4rs::pipelines::title_generation::{TitleGenerationConfig, TitleGenerator};
//! use rust_bert::resources::LocalResource;
//! use std::path::PathBuf;
//!
//! let config = TitleGenerationConfig::new(
//!     LocalResource::from(PathBuf::from("path/to/t5_pegasus/model.ot")),
//!     LocalResource::from(PathBuf::from("path/to/t5_pegasus/config.json")),
//!     LocalResource::from(PathBuf::from("path/to/t5_pegasus/vocab.txt")),
//! );
//! let title_generator = TitleGenerator::new(config)?;
//! let title = title_generator.generate("今天天气不错啊", 1)?;
//! # Ok(())
//! # }
//! ```

mod decoder;
mod pipeline;

pub use decoder::{AutoRegressiveDecoder, NextTokenScorer};
pub use pipeline::{T5StepScorer, TitleGenerationConfig, TitleGenerator};
