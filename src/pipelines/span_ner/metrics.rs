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

use crate::common::error::Bert4RsError;
use crate::global_pointer::SpanLogitsModel;
use crate::pipelines::span_ner::batching::SpanNerDataLoader;
use std::collections::HashSet;
use std::convert::TryFrom;
use tch::{no_grad, Device, Tensor};

/// Initial value of the metric counters, avoiding divisions by zero for empty predictions or labels
pub const METRIC_EPSILON: f64 = 1e-10;

/// Span coordinates in a span grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntitySpan {
    pub category: i64,
    pub start: i64,
    pub end: i64,
}

/// Extracts the spans scored above `threshold` from a grid of shape
/// (*num_categories*, *sequence_length*, *sequence_length*).
pub fn extract_spans(scores: &Tensor, threshold: f64) -> Result<HashSet<EntitySpan>, Bert4RsError> {
    if scores.dim() != 3 {
        return Err(Bert4RsError::ValueError(format!(
            "expected a (categories, sequence, sequence) grid, got shape {:?}",
            scores.size()
        )));
    }
    let positions = scores.gt(threshold).nonzero().to(Device::Cpu);
    let positions = Vec::<i64>::try_from(&positions.view([-1]))?;
    Ok(positions
        .chunks(3)
        .map(|position| EntitySpan {
            category: position[0],
            start: position[1],
            end: position[2],
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanMetrics {
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

/// # Exact-match span metrics
/// Accumulates the number of correctly predicted, predicted and gold spans over a dataset.
/// All counters start at `METRIC_EPSILON`.
#[derive(Debug, Clone)]
pub struct SpanMetricAccumulator {
    correct: f64,
    predicted: f64,
    gold: f64,
}

impl Default for SpanMetricAccumulator {
    fn default() -> Self {
        SpanMetricAccumulator {
            correct: METRIC_EPSILON,
            predicted: METRIC_EPSILON,
            gold: METRIC_EPSILON,
        }
    }
}

impl SpanMetricAccumulator {
    pub fn update(&mut self, predicted: &HashSet<EntitySpan>, gold: &HashSet<EntitySpan>) {
        self.correct += predicted.intersection(gold).count() as f64;
        self.predicted += predicted.len() as f64;
        self.gold += gold.len() as f64;
    }

    /// Updates the counters with a batch of span scores and binary labels, both of shape
    /// (*batch size*, *num_categories*, *sequence_length*, *sequence_length*). Spans are predicted for positive scores.
    pub fn update_batch(&mut self, scores: &Tensor, labels: &Tensor) -> Result<(), Bert4RsError> {
        if scores.size() != labels.size() {
            return Err(Bert4RsError::ValueError(format!(
                "scores shape {:?} does not match labels shape {:?}",
                scores.size(),
                labels.size()
            )));
        }
        for example_index in 0..scores.size()[0] {
            let predicted = extract_spans(&scores.get(example_index), 0.0)?;
            let gold = extract_spans(&labels.get(example_index), 0.0)?;
            self.update(&predicted, &gold);
        }
        Ok(())
    }

    pub fn compute(&self) -> SpanMetrics {
        SpanMetrics {
            f1: 2.0 * self.correct / (self.predicted + self.gold),
            precision: self.correct / self.predicted,
            recall: self.correct / self.gold,
        }
    }
}

/// Evaluates a span model on every batch of a data loader (without gradient tracking and with dropout off).
pub fn evaluate<M>(model: &M, loader: &SpanNerDataLoader) -> Result<SpanMetrics, Bert4RsError>
where
    M: SpanLogitsModel + ?Sized,
{
    let mut accumulator = SpanMetricAccumulator::default();
    for batch in loader.iter() {
        let batch = batch?;
        let scores = no_grad(|| model.span_logits(&batch.token_ids, false))?;
        accumulator.update_batch(&scores, &batch.labels)?;
    }
    Ok(accumulator.compute())
}
