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
use crate::pipelines::title_generation::decoder::{AutoRegressiveDecoder, NextTokenScorer};
use crate::pipelines::tokenization::{detokenize, CLS_TOKEN, SEP_TOKEN};
use rust_bert::resources::ResourceProvider;
use rust_bert::t5::{T5Config, T5ForConditionalGeneration};
use rust_tokenizers::tokenizer::{BertTokenizer, Tokenizer, TruncationStrategy};
use rust_tokenizers::vocab::Vocab;
use tch::nn::VarStore;
use tch::{no_grad, Device, Tensor};

/// # Next token scorer running the T5 decoder
/// Expects the encoder hidden states of the source text as first input (optionally followed by the
/// source attention mask) and returns the language model logits of the last decoded position.
pub struct T5StepScorer<'a> {
    model: &'a T5ForConditionalGeneration,
}

impl<'a> T5StepScorer<'a> {
    pub fn new(model: &'a T5ForConditionalGeneration) -> T5StepScorer<'a> {
        T5StepScorer { model }
    }
}

impl NextTokenScorer for T5StepScorer<'_> {
    fn score_next(&self, inputs: &[Tensor], output_ids: &Tensor) -> Result<Tensor, Bert4RsError> {
        let encoder_hidden_states = inputs.first().ok_or_else(|| {
            Bert4RsError::ValueError("T5 scorer expects the encoder hidden states as input".to_string())
        })?;
        let output = self.model.forward_t(
            None,
            inputs.get(1),
            Some(encoder_hidden_states),
            Some(output_ids),
            None,
            None,
            None,
            None,
            false,
        );
        Ok(output.decoder_output.select(1, -1))
    }
}

/// # Configuration for TitleGenerator
/// Contains information regarding the model to load, the decoding lengths and device to place the model on.
pub struct TitleGenerationConfig {
    /// Model weights resource
    pub model_resource: Box<dyn ResourceProvider + Send>,
    /// Config resource
    pub config_resource: Box<dyn ResourceProvider + Send>,
    /// Vocab resource (BERT-style `vocab.txt`)
    pub vocab_resource: Box<dyn ResourceProvider + Send>,
    /// Automatically lower case all input upon tokenization (default: true)
    pub lower_case: bool,
    /// Maximum number of tokens of the source text, special tokens included (default: 256)
    pub max_input_length: usize,
    /// Maximum number of decoding steps (default: 32)
    pub max_length: usize,
    /// Minimum length of the generated title, start token included (default: 1)
    pub min_length: usize,
    /// Device to place the model on (default: CUDA/GPU when available)
    pub device: Device,
}

impl TitleGenerationConfig {
    /// Instantiate a new title generation configuration.
    ///
    /// # Arguments
    ///
    /// * model - The `ResourceProvider` pointing to the model to load (e.g.  model.ot)
    /// * config - The `ResourceProvider` pointing to the model configuration to load (e.g. config.json)
    /// * vocab - The `ResourceProvider` pointing to the tokenizer's vocabulary to load (e.g.  vocab.txt)
    pub fn new<RM, RC, RV>(
        model_resource: RM,
        config_resource: RC,
        vocab_resource: RV,
    ) -> TitleGenerationConfig
    where
        RM: ResourceProvider + Send + 'static,
        RC: ResourceProvider + Send + 'static,
        RV: ResourceProvider + Send + 'static,
    {
        TitleGenerationConfig {
            model_resource: Box::new(model_resource),
            config_resource: Box::new(config_resource),
            vocab_resource: Box::new(vocab_resource),
            lower_case: true,
            max_input_length: 256,
            max_length: 32,
            min_length: 1,
            device: Device::cuda_if_available(),
        }
    }
}

/// # TitleGenerator to write a title for a text with a T5 model
/// Outputs start with `[CLS]` and end with `[SEP]`.
pub struct TitleGenerator {
    tokenizer: BertTokenizer,
    model: T5ForConditionalGeneration,
    decoder: AutoRegressiveDecoder,
    max_input_length: usize,
    device: Device,
    var_store: VarStore,
}

impl TitleGenerator {
    /// Build a new `TitleGenerator`
    ///
    /// # Arguments
    ///
    /// * `config` - `TitleGenerationConfig` object containing the resource references (model, vocabulary, configuration) and device placement (CPU/GPU)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use bert4rs::pipelines::title_generation::{TitleGenerationConfig, TitleGenerator};
    /// use rust_bert::resources::LocalResource;
    /// use std::path::PathBuf;
    ///
    /// let config = TitleGenerationConfig::new(
    ///     LocalResource::from(PathBuf::from("path/to/t5_pegasus/model.ot")),
    ///     LocalResource::from(PathBuf::from("path/to/t5_pegasus/config.json")),
    ///     LocalResource::from(PathBuf::from("path/to/t5_pegasus/vocab.txt")),
    /// );
    /// let title_generator = TitleGenerator::new(config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: TitleGenerationConfig) -> Result<TitleGenerator, Bert4RsError> {
        let config_path = config.config_resource.get_local_path()?;
        let vocab_path = config.vocab_resource.get_local_path()?;
        let weights_path = config.model_resource.get_local_path()?;
        let device = config.device;

        let tokenizer = BertTokenizer::from_file(vocab_path, config.lower_case, config.lower_case)?;
        let start_id = tokenizer.vocab().token_to_id(CLS_TOKEN);
        let end_id = tokenizer.vocab().token_to_id(SEP_TOKEN);

        let mut var_store = VarStore::new(device);
        let t5_config = T5Config::from_file(config_path)?;
        let model = T5ForConditionalGeneration::new(var_store.root(), &t5_config);
        var_store.load(weights_path)?;

        let mut decoder = AutoRegressiveDecoder::new(Some(start_id), end_id, config.max_length, device);
        decoder.min_length = config.min_length;

        Ok(TitleGenerator {
            tokenizer,
            model,
            decoder,
            max_input_length: config.max_input_length,
            device,
            var_store,
        })
    }

    pub fn get_tokenizer(&self) -> &BertTokenizer {
        &self.tokenizer
    }

    pub fn get_var_store(&self) -> &VarStore {
        &self.var_store
    }

    pub fn get_decoder(&self) -> &AutoRegressiveDecoder {
        &self.decoder
    }

    fn encode_source(&self, text: &str) -> Tensor {
        let token_ids = self
            .tokenizer
            .encode(
                text,
                None,
                self.max_input_length,
                &TruncationStrategy::LongestFirst,
                0,
            )
            .token_ids;
        let input_ids = Tensor::from_slice(&token_ids).unsqueeze(0).to(self.device);
        no_grad(|| self.model.encode(&input_ids, None))
    }

    fn decode(&self, output_ids: &[i64]) -> String {
        let tokens = output_ids
            .iter()
            .map(|id| self.tokenizer.vocab().id_to_token(id))
            .collect::<Vec<String>>();
        detokenize(&tokens)
    }

    /// Generates a title with beam search
    ///
    /// # Arguments
    ///
    /// * `text` - source text
    /// * `topk` - beam width
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// # use bert4rs::pipelines::title_generation::{TitleGenerationConfig, TitleGenerator};
    /// # use rust_bert::resources::LocalResource;
    /// # use std::path::PathBuf;
    /// # let config = TitleGenerationConfig::new(
    /// #     LocalResource::from(PathBuf::from("path/to/t5_pegasus/model.ot")),
    /// #     LocalResource::from(PathBuf::from("path/to/t5_pegasus/config.json")),
    /// #     LocalResource::from(PathBuf::from("path/to/t5_pegasus/vocab.txt")),
    /// # );
    /// let title_generator = TitleGenerator::new(config)?;
    /// let title = title_generator.generate("今天天气不错啊", 1)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn generate(&self, text: &str, topk: usize) -> Result<String, Bert4RsError> {
        let encoder_hidden_states = self.encode_source(text);
        let scorer = T5StepScorer::new(&self.model);
        let output_ids = self
            .decoder
            .beam_search(&scorer, &[encoder_hidden_states], topk, 1.0, 1)?;
        Ok(self.decode(&output_ids))
    }

    /// Generates `n` titles by random sampling, restricted to the `topk` most likely tokens and/or
    /// to the nucleus of cumulative probability `topp`
    pub fn generate_sampled(
        &self,
        text: &str,
        n: usize,
        topk: Option<usize>,
        topp: Option<f64>,
    ) -> Result<Vec<String>, Bert4RsError> {
        let encoder_hidden_states = self.encode_source(text);
        let scorer = T5StepScorer::new(&self.model);
        let outputs = self.decoder.random_sample(
            &scorer,
            &[encoder_hidden_states],
            n,
            topk,
            topp,
            1.0,
            1,
        )?;
        Ok(outputs
            .iter()
            .map(|output_ids| self.decode(output_ids))
            .collect())
    }
}
