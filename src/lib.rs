//! # Span NER and title generation on top of pretrained transformers
//!
//! This crate provides two workflows built on the BERT and T5 implementations of
//! [rust-bert](https://docs.rs/rust-bert) and the [tch-rs](https://github.com/LaurentMazare/tch-rs) bindings to libtorch:
//!
//! #### 1. Span-level Named Entity Recognition
//! An Efficient Global Pointer head scores every (category, start, end) span of a sentence, which allows nested
//! and overlapping entities. The `pipelines::span_ner` module covers corpus parsing, batching, training with
//! best-F1 checkpointing and inference:
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
//! let entities = ner_model.predict(&["中国很大"])?;
//! # Ok(())
//! # }
//! ```
//!
//! #### 2. Title generation
//! A T5 encoder-decoder writes a title for a text with beam search or random sampling (`pipelines::title_generation`):
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
//!
//! Model weights are expected in the `.ot` format produced by `VarStore::save` (or converted from PyTorch checkpoints).

pub mod common;
pub mod global_pointer;
pub mod pipelines;

pub use common::config::Config;
pub use common::error::Bert4RsError;
