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
use crate::global_pointer::{multilabel_categorical_crossentropy, SpanLogitsModel};
use crate::pipelines::span_ner::batching::SpanNerDataLoader;
use crate::pipelines::span_ner::metrics::{evaluate, SpanMetrics};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tch::nn::{self, OptimizerConfig};
use tracing::{debug, info};

/// # Configuration for `GlobalPointerTrainer`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub epochs: usize,
    /// Number of optimization steps per epoch. The data loader is cycled when exhausted.
    /// One full pass over the training data per epoch if `None`.
    pub steps_per_epoch: Option<usize>,
    /// Number of examples per batch
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Maximum sequence length
    pub max_len: usize,
    /// Location of the best model snapshot
    pub checkpoint_path: PathBuf,
}

impl Config for TrainingConfig {}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 50,
            steps_per_epoch: Some(100),
            batch_size: 6,
            learning_rate: 2e-5,
            max_len: 512,
            checkpoint_path: PathBuf::from("best_model.ot"),
        }
    }
}

/// Summary of a training epoch passed to the callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLogs {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Total number of optimization steps performed so far
    pub steps: usize,
    /// Mean training loss over the epoch
    pub loss: f64,
}

/// # Hook called by `GlobalPointerTrainer` at the end of each epoch
pub trait TrainingCallback<M: ?Sized> {
    fn on_epoch_end(
        &mut self,
        model: &M,
        var_store: &nn::VarStore,
        logs: &EpochLogs,
    ) -> Result<(), Bert4RsError>;
}

/// # Training loop for global pointer models
/// Minimizes the multi-label categorical cross-entropy of the span logits with Adam.
pub struct GlobalPointerTrainer {
    config: TrainingConfig,
}

impl GlobalPointerTrainer {
    pub fn new(config: TrainingConfig) -> GlobalPointerTrainer {
        GlobalPointerTrainer { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Trains the model variables held by `var_store`
    ///
    /// # Arguments
    ///
    /// * `model` - model producing span logits, with its variables registered in `var_store`
    /// * `var_store` - `VarStore` holding the trainable variables
    /// * `train_loader` - training batches
    /// * `callbacks` - hooks called after each epoch (e.g. `SpanEvaluator`)
    ///
    /// # Returns
    ///
    /// * `Vec<EpochLogs>` with one entry per epoch
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use bert4rs::global_pointer::{BertGlobalPointer, GlobalPointerConfig};
    /// use bert4rs::pipelines::span_ner::{
    ///     load_corpus, EntityCategories, GlobalPointerTrainer, SpanEvaluator, SpanNerDataLoader,
    ///     TrainingCallback, TrainingConfig,
    /// };
    /// use bert4rs::pipelines::tokenization::CharTokenizer;
    /// use bert4rs::Config;
    /// use rust_bert::bert::BertConfig;
    /// use tch::{nn, Device};
    ///
    /// let device = Device::cuda_if_available();
    /// let config = TrainingConfig::default();
    /// let categories = EntityCategories::default();
    /// let tokenizer = CharTokenizer::from_file("path/to/vocab.txt", true)?;
    /// let train = load_corpus("path/to/example.train", &categories, config.max_len)?;
    /// let valid = load_corpus("path/to/example.dev", &categories, config.max_len)?;
    /// let train_loader = SpanNerDataLoader::new(&train, &tokenizer, &categories, config.batch_size, config.max_len, true, device)?;
    /// let valid_loader = SpanNerDataLoader::new(&valid, &tokenizer, &categories, config.batch_size, config.max_len, false, device)?;
    ///
    /// let mut vs = nn::VarStore::new(device);
    /// let bert_config = BertConfig::from_file("path/to/bert_config.json")?;
    /// let model = BertGlobalPointer::new(vs.root(), &bert_config, &GlobalPointerConfig::default())?;
    /// vs.load_partial("path/to/bert_model.ot")?;
    ///
    /// let mut evaluator = SpanEvaluator::new(&valid_loader, Some(config.checkpoint_path.clone()));
    /// let trainer = GlobalPointerTrainer::new(config);
    /// trainer.fit(&model, &vs, &train_loader, &mut [&mut evaluator as &mut dyn TrainingCallback<BertGlobalPointer>])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn fit<M>(
        &self,
        model: &M,
        var_store: &nn::VarStore,
        train_loader: &SpanNerDataLoader,
        callbacks: &mut [&mut dyn TrainingCallback<M>],
    ) -> Result<Vec<EpochLogs>, Bert4RsError>
    where
        M: SpanLogitsModel + ?Sized,
    {
        if train_loader.is_empty() {
            return Err(Bert4RsError::ValueError(
                "cannot train on an empty data loader".to_string(),
            ));
        }
        let steps_per_epoch = self
            .config
            .steps_per_epoch
            .unwrap_or_else(|| train_loader.num_batches());
        let mut optimizer = nn::Adam::default().build(var_store, self.config.learning_rate)?;

        let mut history = Vec::with_capacity(self.config.epochs);
        let mut batches = train_loader.iter();
        let mut global_step = 0usize;
        for epoch in 0..self.config.epochs {
            let mut total_loss = 0f64;
            for _ in 0..steps_per_epoch {
                let batch = match batches.next() {
                    Some(batch) => batch?,
                    None => {
                        batches = train_loader.iter();
                        match batches.next() {
                            Some(batch) => batch?,
                            None => break,
                        }
                    }
                };
                let logits = model.span_logits(&batch.token_ids, true)?;
                let loss = multilabel_categorical_crossentropy(&logits, &batch.labels);
                optimizer.backward_step(&loss);

                let loss_value = loss.double_value(&[]);
                total_loss += loss_value;
                global_step += 1;
                debug!("epoch {} step {}: loss {:.5}", epoch + 1, global_step, loss_value);
            }

            let logs = EpochLogs {
                epoch,
                steps: global_step,
                loss: total_loss / steps_per_epoch.max(1) as f64,
            };
            info!(
                "epoch {}/{}: loss {:.5}",
                epoch + 1,
                self.config.epochs,
                logs.loss
            );
            for callback in callbacks.iter_mut() {
                callback.on_epoch_end(model, var_store, &logs)?;
            }
            history.push(logs);
        }
        Ok(history)
    }
}

/// # Validation callback
/// Computes span F1, precision and recall on a validation set at the end of each epoch and saves the
/// variables to `checkpoint_path` whenever the F1 improves on the best value seen so far.
pub struct SpanEvaluator<'a> {
    valid_loader: &'a SpanNerDataLoader,
    checkpoint_path: Option<PathBuf>,
    best_f1: f64,
    history: Vec<SpanMetrics>,
}

impl<'a> SpanEvaluator<'a> {
    pub fn new(valid_loader: &'a SpanNerDataLoader, checkpoint_path: Option<PathBuf>) -> SpanEvaluator<'a> {
        SpanEvaluator {
            valid_loader,
            checkpoint_path,
            best_f1: 0.0,
            history: Vec::new(),
        }
    }

    pub fn best_f1(&self) -> f64 {
        self.best_f1
    }

    pub fn history(&self) -> &[SpanMetrics] {
        &self.history
    }
}

impl<M> TrainingCallback<M> for SpanEvaluator<'_>
where
    M: SpanLogitsModel + ?Sized,
{
    fn on_epoch_end(
        &mut self,
        model: &M,
        var_store: &nn::VarStore,
        _logs: &EpochLogs,
    ) -> Result<(), Bert4RsError> {
        let metrics = evaluate(model, self.valid_loader)?;
        if metrics.f1 > self.best_f1 {
            self.best_f1 = metrics.f1;
            if let Some(checkpoint_path) = &self.checkpoint_path {
                var_store.save(checkpoint_path)?;
                info!("saved best model to {}", checkpoint_path.display());
            }
        }
        info!(
            "[val] f1: {:.5}, p: {:.5} r: {:.5} best_f1: {:.5}",
            metrics.f1, metrics.precision, metrics.recall, self.best_f1
        );
        self.history.push(metrics);
        Ok(())
    }
}
