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
use crate::global_pointer::{BertGlobalPointer, GlobalPointerConfig, SpanLogitsModel};
use crate::pipelines::span_ner::corpus::EntityCategories;
use crate::pipelines::span_ner::metrics::extract_spans;
use crate::pipelines::tokenization::CharTokenizer;
use rust_bert::bert::BertConfig;
use rust_bert::resources::ResourceProvider;
use std::cmp::Ordering;
use tch::nn::VarStore;
use tch::{no_grad, Device, Tensor};

/// # Entity extracted by `SpanNerModel`
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Text of the entity
    pub text: String,
    /// Character offset of the first character of the entity
    pub start: usize,
    /// Character offset of the last character of the entity (inclusive)
    pub end: usize,
    /// Entity category label
    pub label: String,
    /// Raw span score (positive for predicted entities)
    pub score: f64,
}

/// # Configuration for SpanNerModel
/// Contains information regarding the model to load and device to place the model on.
pub struct SpanNerConfig {
    /// Trained model weights resource (best snapshot saved during training)
    pub model_resource: Box<dyn ResourceProvider + Send>,
    /// BERT encoder config resource
    pub config_resource: Box<dyn ResourceProvider + Send>,
    /// Vocab resource
    pub vocab_resource: Box<dyn ResourceProvider + Send>,
    /// Entity categories, in label id order
    pub categories: EntityCategories,
    /// Global pointer head configuration
    pub global_pointer: GlobalPointerConfig,
    /// Automatically lower case all input upon tokenization
    pub lower_case: bool,
    /// Maximum number of characters scored per input (longer inputs are truncated)
    pub max_len: usize,
    /// Batch size for predictions
    pub batch_size: usize,
    /// Device to place the model on (default: CUDA/GPU when available)
    pub device: Device,
}

impl SpanNerConfig {
    /// Instantiate a new span NER configuration.
    ///
    /// # Arguments
    ///
    /// * model - The `ResourceProvider` pointing to the trained model to load (e.g.  best_model.ot)
    /// * config - The `ResourceProvider` pointing to the BERT configuration to load (e.g. bert_config.json)
    /// * vocab - The `ResourceProvider` pointing to the vocabulary to load (e.g.  vocab.txt)
    /// * categories - `EntityCategories` the model was trained on
    pub fn new<RM, RC, RV>(
        model_resource: RM,
        config_resource: RC,
        vocab_resource: RV,
        categories: EntityCategories,
    ) -> SpanNerConfig
    where
        RM: ResourceProvider + Send + 'static,
        RC: ResourceProvider + Send + 'static,
        RV: ResourceProvider + Send + 'static,
    {
        let global_pointer = GlobalPointerConfig {
            num_categories: categories.len() as i64,
            ..Default::default()
        };
        SpanNerConfig {
            model_resource: Box::new(model_resource),
            config_resource: Box::new(config_resource),
            vocab_resource: Box::new(vocab_resource),
            categories,
            global_pointer,
            lower_case: true,
            max_len: 512,
            batch_size: 16,
            device: Device::cuda_if_available(),
        }
    }
}

/// # SpanNerModel to extract entities with a trained global pointer
pub struct SpanNerModel {
    tokenizer: CharTokenizer,
    model: BertGlobalPointer,
    categories: EntityCategories,
    max_len: usize,
    batch_size: usize,
    device: Device,
    var_store: VarStore,
}

impl SpanNerModel {
    /// Build a new `SpanNerModel`
    ///
    /// # Arguments
    ///
    /// * `config` - `SpanNerConfig` object containing the resource references (model, vocabulary, configuration) and device placement (CPU/GPU)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use bert4rs::pipelines::span_ner::{EntityCategories, SpanNerConfig, SpanNerModel};
    /// use rust_bert::resources::LocalResource;
    /// use std::path::PathBuf;
    ///
    /// let config = SpanNerConfig::new(
    ///     LocalResource::from(PathBuf::from("path/to/best_model.ot")),
    ///     LocalResource::from(PathBuf::from("path/to/bert_config.json")),
    ///     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
    ///     EntityCategories::default(),
    /// );
    /// let ner_model = SpanNerModel::new(config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: SpanNerConfig) -> Result<SpanNerModel, Bert4RsError> {
        if config.global_pointer.num_categories != config.categories.len() as i64 {
            return Err(Bert4RsError::InvalidConfigurationError(format!(
                "global pointer scores {} categories but {} labels were provided",
                config.global_pointer.num_categories,
                config.categories.len()
            )));
        }
        let config_path = config.config_resource.get_local_path()?;
        let vocab_path = config.vocab_resource.get_local_path()?;
        let weights_path = config.model_resource.get_local_path()?;
        let device = config.device;

        let tokenizer = CharTokenizer::from_file(vocab_path, config.lower_case)?;
        let bert_config = BertConfig::from_file(config_path)?;
        let mut global_pointer_config = config.global_pointer;
        global_pointer_config.pad_token_id = tokenizer.pad_id();
        global_pointer_config.hidden_size = bert_config.hidden_size;

        let mut var_store = VarStore::new(device);
        let model = BertGlobalPointer::new(var_store.root(), &bert_config, &global_pointer_config)?;
        var_store.load(weights_path)?;

        let max_len = config
            .max_len
            .min(global_pointer_config.max_position_embeddings as usize)
            .min(bert_config.max_position_embeddings as usize);

        Ok(SpanNerModel {
            tokenizer,
            model,
            categories: config.categories,
            max_len,
            batch_size: config.batch_size.max(1),
            device,
            var_store,
        })
    }

    pub fn get_tokenizer(&self) -> &CharTokenizer {
        &self.tokenizer
    }

    pub fn get_var_store(&self) -> &VarStore {
        &self.var_store
    }

    /// Extract entities from a text
    ///
    /// # Arguments
    ///
    /// * `input` - `&[&str]` Array of texts to extract entities from.
    ///
    /// # Returns
    ///
    /// * `Vec<Vec<Entity>>` containing the extracted entities for each input, sorted by position
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// # use bert4rs::pipelines::span_ner::{EntityCategories, SpanNerConfig, SpanNerModel};
    /// # use rust_bert::resources::LocalResource;
    /// # use std::path::PathBuf;
    /// # let config = SpanNerConfig::new(
    /// #     LocalResource::from(PathBuf::from("path/to/best_model.ot")),
    /// #     LocalResource::from(PathBuf::from("path/to/bert_config.json")),
    /// #     LocalResource::from(PathBuf::from("path/to/vocab.txt")),
    /// #     EntityCategories::default(),
    /// # );
    /// let ner_model = SpanNerModel::new(config)?;
    /// let input = ["我们变而以书会友，以书结缘，把欧美、港台流行的食品类图谱、画册、工具书汇集一堂。"];
    /// let output = ner_model.predict(&input)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn predict<S>(&self, input: &[S]) -> Result<Vec<Vec<Entity>>, Bert4RsError>
    where
        S: AsRef<str>,
    {
        let mut output = Vec::with_capacity(input.len());
        for chunk in input.chunks(self.batch_size) {
            output.extend(self.predict_batch(chunk)?);
        }
        Ok(output)
    }

    fn predict_batch<S>(&self, input: &[S]) -> Result<Vec<Vec<Entity>>, Bert4RsError>
    where
        S: AsRef<str>,
    {
        let characters = input
            .iter()
            .map(|text| text.as_ref().chars().collect::<Vec<char>>())
            .collect::<Vec<Vec<char>>>();
        let token_ids = input
            .iter()
            .map(|text| {
                let mut ids = self.tokenizer.encode(text.as_ref());
                ids.truncate(self.max_len);
                ids
            })
            .collect::<Vec<Vec<i64>>>();
        let sequence_length = token_ids.iter().map(Vec::len).max().unwrap_or(0);
        if sequence_length == 0 {
            return Ok(vec![Vec::new(); input.len()]);
        }

        let pad_id = self.tokenizer.pad_id();
        let padded = token_ids
            .into_iter()
            .map(|mut ids| {
                ids.resize(sequence_length, pad_id);
                Tensor::from_slice(&ids)
            })
            .collect::<Vec<Tensor>>();
        let input_tensor = Tensor::stack(&padded, 0).to(self.device);
        let scores = no_grad(|| self.model.span_logits(&input_tensor, false))?;

        let mut output = Vec::with_capacity(input.len());
        for (example_index, chars) in characters.iter().enumerate() {
            let example_scores = scores.get(example_index as i64);
            let mut entities = extract_spans(&example_scores, 0.0)?
                .into_iter()
                .map(|span| {
                    let label = self
                        .categories
                        .label(span.category)
                        .ok_or_else(|| {
                            Bert4RsError::ValueError(format!(
                                "no label for category id {}",
                                span.category
                            ))
                        })?
                        .to_string();
                    let (start, end) = (span.start as usize, span.end as usize);
                    Ok(Entity {
                        text: chars[start..=end].iter().collect(),
                        start,
                        end,
                        label,
                        score: example_scores.double_value(&[span.category, span.start, span.end]),
                    })
                })
                .collect::<Result<Vec<Entity>, Bert4RsError>>()?;
            entities.sort_by(|a, b| {
                (a.start, a.end)
                    .cmp(&(b.start, b.end))
                    .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            });
            output.push(entities);
        }
        Ok(output)
    }
}
