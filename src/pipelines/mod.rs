//! # Ready-to-use pipelines
//!
//! - `span_ner`: span-level Named Entity Recognition with a BERT encoder and an Efficient Global Pointer head
//! - `title_generation`: title generation with a T5 encoder-decoder and an auto-regressive decoder
//! - `tokenization`: character-level tokenizer and WordPiece detokenization shared by both pipelines

pub mod span_ner;
pub mod title_generation;
pub mod tokenization;
