//! # Efficient Global Pointer for span-level named entity recognition
//!
//! Implementation of the Efficient Global Pointer head ([https://kexue.fm/archives/8877](https://kexue.fm/archives/8877))
//! scoring every (start, end, category) span of a sequence jointly. Flat and nested entities are supported since
//! each category and span is scored independently.
//!
//! The head is implemented in `EfficientGlobalPointer` and combined with a BERT encoder in `BertGlobalPointer`.
//! Start and end projections are rotated with a `RotaryPositionEncoding` to inject relative position information.
//! Models are trained with the `multilabel_categorical_crossentropy` loss.
//!
//! All models expect the following resources:
//! - Configuration file expected to have a structure following the [Transformers library](https://github.com/huggingface/transformers)
//! - Model weights are expected to have a structure and parameter names following the [Transformers library](https://github.com/huggingface/transformers),
//!   with the encoder variables stored under the `bert` prefix. A conversion using the Python utility scripts is required to convert the `.bin` weights to the `.ot` format.
//! - `BertVocab` vocabulary file (`vocab.txt`)
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use bert4rs::global_pointer::{BertGlobalPointer, GlobalPointerConfig};
//! use bert4rs::Config;
//! use rust_bert::bert::BertConfig;
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let device = Device::cuda_if_available();
//! let mut vs = nn::VarStore::new(device);
//! let bert_config = BertConfig::from_file("path/to/bert_config.json")?;
//! let model = BertGlobalPointer::new(vs.root(), &bert_config, &GlobalPointerConfig::default())?;
//! vs.load("path/to/best_model.ot")?;
//!
//! let token_ids = Tensor::from_slice(&[101i64, 872, 1962, 102]).view([1, 4]).to(device);
//! let span_logits = tch::no_grad(|| model.forward_t(&token_ids, false))?;
//! let predicted_spans = span_logits.gt(0.0).nonzero();
//! # Ok(())
//! # }
//! ```

mod global_pointer_model;
mod loss;
mod rotary;

pub use global_pointer_model::{
    mask_span_logits, BertGlobalPointer, EfficientGlobalPointer, GlobalPointerConfig,
    SpanLogitsModel, LOWER_TRIANGLE_PENALTY,
};
pub use loss::multilabel_categorical_crossentropy;
pub use rotary::{sinusoid_encoding_table, RotaryPositionEncoding};
