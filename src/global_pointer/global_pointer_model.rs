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

use crate::common::config::Config;
use crate::common::error::Bert4RsError;
use crate::global_pointer::rotary::RotaryPositionEncoding;
use rust_bert::bert::{BertConfig, BertEmbeddings, BertModel};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

/// Value subtracted from the strictly lower triangle of the span grid (`start > end`).
pub const LOWER_TRIANGLE_PENALTY: f64 = 1e12;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
/// # Global pointer head configuration
pub struct GlobalPointerConfig {
    /// Hidden size of the encoder output (must match the encoder configuration)
    pub hidden_size: i64,
    /// Dimension of the start (query) and end (key) projections
    pub head_size: i64,
    /// Number of entity categories scored in parallel
    pub num_categories: i64,
    /// Maximum sequence length supported by the rotary position encoding
    pub max_position_embeddings: i64,
    /// Rotate start and end projections with a rotary position encoding
    pub use_rotary: bool,
    /// Token id marking padding positions
    pub pad_token_id: i64,
}

impl Config for GlobalPointerConfig {}

impl Default for GlobalPointerConfig {
    fn default() -> Self {
        GlobalPointerConfig {
            hidden_size: 768,
            head_size: 64,
            num_categories: 3,
            max_position_embeddings: 512,
            use_rotary: true,
            pad_token_id: 0,
        }
    }
}

impl GlobalPointerConfig {
    fn validate(&self) -> Result<(), Bert4RsError> {
        if self.head_size <= 0 || self.num_categories <= 0 || self.hidden_size <= 0 {
            return Err(Bert4RsError::InvalidConfigurationError(format!(
                "hidden size, head size and number of categories must be positive (got {}, {}, {})",
                self.hidden_size, self.head_size, self.num_categories
            )));
        }
        Ok(())
    }
}

/// Masks a span logits grid of shape (*batch size*, *num_categories*, *sequence_length*, *sequence_length*).
///
/// Rows and columns of padding positions (`token_ids == pad_token_id`) are set to negative infinity
/// and `LOWER_TRIANGLE_PENALTY` is subtracted from every coordinate where `start > end`.
pub fn mask_span_logits(logits: &Tensor, token_ids: &Tensor, pad_token_id: i64) -> Tensor {
    let padding = token_ids.eq(pad_token_id);
    let logits = logits
        .masked_fill(&padding.unsqueeze(1).unsqueeze(3), f64::NEG_INFINITY)
        .masked_fill(&padding.unsqueeze(1).unsqueeze(2), f64::NEG_INFINITY);
    let lower_triangle = logits.ones_like().tril(-1) * LOWER_TRIANGLE_PENALTY;
    logits - lower_triangle
}

/// # Efficient Global Pointer
/// Span scoring head jointly scoring (start, end, category) triples. A single projection produces
/// start (query) and end (key) vectors shared across categories; a second projection of the same
/// features provides per-category start and end biases:
/// `score(c, i, j) = q_i . k_j / sqrt(head_size) + start_bias(i, c) + end_bias(j, c)`.
/// It is made of the following blocks:
/// - `p_dense`: projection of the encoder output to the concatenated start and end vectors
/// - `q_dense`: projection of the start and end vectors to the per-category biases
/// - `position_encoding`: optional rotary position encoding applied to start and end vectors
#[derive(Debug)]
pub struct EfficientGlobalPointer {
    p_dense: nn::Linear,
    q_dense: nn::Linear,
    position_encoding: Option<RotaryPositionEncoding>,
    head_size: i64,
    num_categories: i64,
    pad_token_id: i64,
}

impl EfficientGlobalPointer {
    /// Build a new `EfficientGlobalPointer`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the head
    /// * `config` - `GlobalPointerConfig` object defining the head dimensions
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bert4rs::global_pointer::{EfficientGlobalPointer, GlobalPointerConfig};
    /// use tch::{nn, Device};
    ///
    /// let device = Device::Cpu;
    /// let vs = nn::VarStore::new(device);
    /// let config = GlobalPointerConfig::default();
    /// let head = EfficientGlobalPointer::new(&vs.root() / "global_pointer", &config)?;
    /// # Ok::<(), bert4rs::Bert4RsError>(())
    /// ```
    pub fn new<'p, P>(
        p: P,
        config: &GlobalPointerConfig,
    ) -> Result<EfficientGlobalPointer, Bert4RsError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        config.validate()?;

        let p_dense = nn::linear(
            p / "p_dense",
            config.hidden_size,
            config.head_size * 2,
            Default::default(),
        );
        let q_dense = nn::linear(
            p / "q_dense",
            config.head_size * 2,
            config.num_categories * 2,
            Default::default(),
        );
        let position_encoding = if config.use_rotary {
            Some(RotaryPositionEncoding::new(
                config.max_position_embeddings,
                config.head_size,
                p.device(),
            )?)
        } else {
            None
        };

        Ok(EfficientGlobalPointer {
            p_dense,
            q_dense,
            position_encoding,
            head_size: config.head_size,
            num_categories: config.num_categories,
            pad_token_id: config.pad_token_id,
        })
    }

    /// Forward pass through the head
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - Encoder output of shape (*batch size*, *sequence_length*, *hidden_size*)
    /// * `token_ids` - Input token ids of shape (*batch size*, *sequence_length*), used to mask padding positions
    ///
    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *num_categories*, *sequence_length*, *sequence_length*) containing the
    /// masked span scores. A span is predicted for a category when its score is positive.
    pub fn forward(&self, hidden_states: &Tensor, token_ids: &Tensor) -> Result<Tensor, Bert4RsError> {
        let (batch_size, sequence_length) = match hidden_states.size().as_slice() {
            [batch_size, sequence_length, _] => (*batch_size, *sequence_length),
            shape => {
                return Err(Bert4RsError::ValueError(format!(
                    "expected hidden states of shape (batch, sequence, hidden), got {:?}",
                    shape
                )))
            }
        };
        if let Some(position_encoding) = &self.position_encoding {
            if sequence_length > position_encoding.max_position() {
                return Err(Bert4RsError::ValueError(format!(
                    "sequence length {} exceeds the maximum supported position {}",
                    sequence_length,
                    position_encoding.max_position()
                )));
            }
        }

        let sequence_output = hidden_states.apply(&self.p_dense);
        let mut query = sequence_output.narrow(-1, 0, self.head_size);
        let mut key = sequence_output.narrow(-1, self.head_size, self.head_size);
        if let Some(position_encoding) = &self.position_encoding {
            query = position_encoding.forward(&query);
            key = position_encoding.forward(&key);
        }

        let logits = query.matmul(&key.transpose(1, 2)) / (self.head_size as f64).sqrt();
        let bias = sequence_output
            .apply(&self.q_dense)
            .view([batch_size, sequence_length, self.num_categories, 2])
            .transpose(1, 2)
            / 2.0;
        let logits = logits.unsqueeze(1)
            + bias.narrow(-1, 0, 1)
            + bias.narrow(-1, 1, 1).transpose(2, 3);

        Ok(mask_span_logits(&logits, token_ids, self.pad_token_id))
    }
}

/// # Models producing span logits for global pointer training and inference
pub trait SpanLogitsModel {
    /// Returns the masked span scores of shape (*batch size*, *num_categories*, *sequence_length*, *sequence_length*)
    fn span_logits(&self, token_ids: &Tensor, train: bool) -> Result<Tensor, Bert4RsError>;
}

/// # BERT encoder with an Efficient Global Pointer head
/// Token ids equal to the padding id are excluded from attention and from the span grid.
/// No segment ids are used.
pub struct BertGlobalPointer {
    bert: BertModel<BertEmbeddings>,
    global_pointer: EfficientGlobalPointer,
    pad_token_id: i64,
}

impl BertGlobalPointer {
    /// Build a new `BertGlobalPointer`. The encoder variables are created under `bert` and
    /// the head under `global_pointer`, so that pretrained BERT weights can be loaded with
    /// `VarStore::load_partial`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bert4rs::global_pointer::{BertGlobalPointer, GlobalPointerConfig};
    /// use bert4rs::Config;
    /// use rust_bert::bert::BertConfig;
    /// use tch::{nn, Device};
    ///
    /// let device = Device::cuda_if_available();
    /// let mut vs = nn::VarStore::new(device);
    /// let bert_config = BertConfig::from_file("path/to/bert_config.json")?;
    /// let model = BertGlobalPointer::new(vs.root(), &bert_config, &GlobalPointerConfig::default())?;
    /// vs.load_partial("path/to/model.ot")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn new<'p, P>(
        p: P,
        bert_config: &BertConfig,
        config: &GlobalPointerConfig,
    ) -> Result<BertGlobalPointer, Bert4RsError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        if bert_config.hidden_size != config.hidden_size {
            return Err(Bert4RsError::InvalidConfigurationError(format!(
                "global pointer hidden size ({}) does not match the encoder hidden size ({})",
                config.hidden_size, bert_config.hidden_size
            )));
        }

        let bert = BertModel::new_with_optional_pooler(p / "bert", bert_config, false);
        let global_pointer = EfficientGlobalPointer::new(p / "global_pointer", config)?;

        Ok(BertGlobalPointer {
            bert,
            global_pointer,
            pad_token_id: config.pad_token_id,
        })
    }

    /// Forward pass through the encoder and head
    ///
    /// # Arguments
    ///
    /// * `token_ids` - Input tensor of shape (*batch size*, *sequence_length*), right-padded with the padding id
    /// * `train` - boolean flag to turn on/off the dropout layers in the encoder
    pub fn forward_t(&self, token_ids: &Tensor, train: bool) -> Result<Tensor, Bert4RsError> {
        let attention_mask = token_ids.ne(self.pad_token_id).to_kind(Kind::Int64);
        let encoder_output = self.bert.forward_t(
            Some(token_ids),
            Some(&attention_mask),
            None,
            None,
            None,
            None,
            None,
            train,
        )?;
        self.global_pointer
            .forward(&encoder_output.hidden_state, token_ids)
    }
}

impl SpanLogitsModel for BertGlobalPointer {
    fn span_logits(&self, token_ids: &Tensor, train: bool) -> Result<Tensor, Bert4RsError> {
        self.forward_t(token_ids, train)
    }
}
