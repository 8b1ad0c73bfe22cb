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

//! # Span-level Named Entity Recognition with a global pointer
//! Entities are scored as (category, start, end) spans by an Efficient Global Pointer head on top of a
//! BERT encoder, which handles nested and overlapping entities. This module contains the full workflow:
//! - parsing of character-level BIO corpora (`parse_corpus`, `load_corpus`)
//! - batching into dense span label grids (`SpanNerDataLoader`)
//! - training with Adam and checkpointing of the best validation F1 (`GlobalPointerTrainer`, `SpanEvaluator`)
//! - entity extraction with a trained snapshot (`SpanNerModel`)
//!
//! The corpus contains one `<character> <tag>` pair per line, examples separated by blank lines:
//!
//! ```text
//! 中 B-LOC
//! 国 I-LOC
//! 很 O
//! 大 O
//! ```
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use bert4rs::pipelines::span_ner::{EntityCategories, SpanNerConfig, SpanNerModel};
//! use rust_bert::resources::LocalResource;
//! use std::path::PathBuf;
//!
//! let config = SpanNerConfig::new(
//!     LocalResource::from(PathBuf::from("path/to/best_model.ot")),
//!     LocalResource::from(PathBuf::from("path/to/bert_config.json")),
//!     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
//!     EntityCategories::default(),
//! );
//! let ner_model = SpanNerModel::new(config)?;
//! let input = ["中国很大"];
//! let output = ner_model.predict(&input)?;
//! # Ok(())
//! # }
//! ```
//! Output: \
//! ```no_run
//! # use bert4rs::pipelines::span_ner::Entity;
//! # let output =
//! [[Entity {
//!     text: String::from("中国"),
//!     start: 0,
//!     end: 1,
//!     label: String::from("LOC"),
//!     score: 9.13,
//! }]]
//! # ;
//! ```

mod batching;
mod corpus;
pub mod metrics;
mod pipeline;
mod trainer;

pub use batching::{collate, EncodedExample, SpanNerBatch, SpanNerBatchIter, SpanNerDataLoader};
pub use corpus::{load_corpus, parse_corpus, EntityCategories, NerExample, SpanLabel};
pub use metrics::{evaluate, SpanMetrics};
pub use pipeline::{Entity, SpanNerConfig, SpanNerModel};
pub use trainer::{
    EpochLogs, GlobalPointerTrainer, SpanEvaluator, TrainingCallback, TrainingConfig,
};
