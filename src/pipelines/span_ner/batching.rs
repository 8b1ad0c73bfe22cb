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
use crate::pipelines::span_ner::corpus::{EntityCategories, NerExample};
use crate::pipelines::tokenization::CharTokenizer;
use std::convert::TryFrom;
use tch::{Device, Kind, Tensor};
use tracing::debug;

/// Example converted to vocabulary ids, with spans as (category id, start, end)
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedExample {
    pub token_ids: Vec<i64>,
    pub spans: Vec<(i64, usize, usize)>,
}

impl EncodedExample {
    pub fn new(
        example: &NerExample,
        tokenizer: &CharTokenizer,
        categories: &EntityCategories,
    ) -> Result<EncodedExample, Bert4RsError> {
        let token_ids = tokenizer.convert_tokens_to_ids(&example.tokens);
        let spans = example
            .spans
            .iter()
            .map(|span| {
                categories
                    .id(&span.category)
                    .map(|category_id| (category_id, span.start, span.end))
                    .ok_or_else(|| {
                        Bert4RsError::InvalidConfigurationError(format!(
                            "entity category `{}` is not part of the label set",
                            span.category
                        ))
                    })
            })
            .collect::<Result<Vec<_>, Bert4RsError>>()?;
        Ok(EncodedExample { token_ids, spans })
    }
}

/// # Collated batch
pub struct SpanNerBatch {
    /// Token ids of shape (*batch size*, *sequence_length*), right-padded
    pub token_ids: Tensor,
    /// Binary span labels of shape (*batch size*, *num_categories*, *sequence_length*, *sequence_length*)
    pub labels: Tensor,
}

/// Collates encoded examples into a `SpanNerBatch`.
///
/// The sequence length is the longest example length, capped at `max_len`. Token ids are truncated and
/// right-padded with `pad_token_id`. Label cells `(example, category, start, end)` are set to 1 for every
/// span with `end < sequence_length`, longer spans are dropped.
pub fn collate(
    examples: &[&EncodedExample],
    num_categories: i64,
    max_len: usize,
    pad_token_id: i64,
    device: Device,
) -> Result<SpanNerBatch, Bert4RsError> {
    let sequence_length = examples
        .iter()
        .map(|example| example.token_ids.len())
        .max()
        .map(|length| length.min(max_len))
        .filter(|length| *length > 0)
        .ok_or_else(|| Bert4RsError::ValueError("cannot collate an empty batch".to_string()))?;
    let batch_size = examples.len();
    let num_categories_usize = num_categories as usize;

    let mut token_ids = vec![pad_token_id; batch_size * sequence_length];
    let mut labels = vec![0f32; batch_size * num_categories_usize * sequence_length * sequence_length];
    for (example_index, example) in examples.iter().enumerate() {
        let length = example.token_ids.len().min(sequence_length);
        let offset = example_index * sequence_length;
        token_ids[offset..offset + length].copy_from_slice(&example.token_ids[..length]);

        for &(category_id, start, end) in example.spans.iter() {
            if end >= sequence_length || start > end {
                debug!(
                    "dropping span ({}, {}) beyond sequence length {}",
                    start, end, sequence_length
                );
                continue;
            }
            if category_id < 0 || category_id >= num_categories {
                return Err(Bert4RsError::ValueError(format!(
                    "category id {} out of range for {} categories",
                    category_id, num_categories
                )));
            }
            let index = ((example_index * num_categories_usize + category_id as usize)
                * sequence_length
                + start)
                * sequence_length
                + end;
            labels[index] = 1.0;
        }
    }

    let (batch_size, sequence_length) = (batch_size as i64, sequence_length as i64);
    let token_ids = Tensor::from_slice(&token_ids)
        .view([batch_size, sequence_length])
        .to(device);
    let labels = Tensor::from_slice(&labels)
        .view([batch_size, num_categories, sequence_length, sequence_length])
        .to(device);
    Ok(SpanNerBatch { token_ids, labels })
}

/// # Span NER data loader
/// Holds encoded examples and yields collated batches, optionally in a shuffled order.
pub struct SpanNerDataLoader {
    examples: Vec<EncodedExample>,
    num_categories: i64,
    batch_size: usize,
    max_len: usize,
    pad_token_id: i64,
    shuffle: bool,
    device: Device,
}

impl SpanNerDataLoader {
    /// Creates a new data loader
    ///
    /// # Arguments
    ///
    /// * `examples` - parsed examples (see `load_corpus`)
    /// * `tokenizer` - `CharTokenizer` converting tokens to vocabulary ids
    /// * `categories` - entity categories, defining the label channels
    /// * `batch_size` - number of examples per batch
    /// * `max_len` - maximum sequence length
    /// * `shuffle` - draw a new random order at every pass
    /// * `device` - device the batches are placed on
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bert4rs::pipelines::span_ner::{load_corpus, EntityCategories, SpanNerDataLoader};
    /// use bert4rs::pipelines::tokenization::CharTokenizer;
    /// use tch::Device;
    ///
    /// let categories = EntityCategories::default();
    /// let tokenizer = CharTokenizer::from_file("path/to/vocab.txt", true)?;
    /// let examples = load_corpus("path/to/example.train", &categories, 512)?;
    /// let loader = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 6, 512, true, Device::Cpu)?;
    /// for batch in loader.iter() {
    ///     let batch = batch?;
    /// }
    /// # Ok::<(), bert4rs::Bert4RsError>(())
    /// ```
    pub fn new(
        examples: &[NerExample],
        tokenizer: &CharTokenizer,
        categories: &EntityCategories,
        batch_size: usize,
        max_len: usize,
        shuffle: bool,
        device: Device,
    ) -> Result<SpanNerDataLoader, Bert4RsError> {
        if batch_size == 0 || max_len == 0 {
            return Err(Bert4RsError::InvalidConfigurationError(
                "batch size and maximum length must be positive".to_string(),
            ));
        }
        let examples = examples
            .iter()
            .map(|example| EncodedExample::new(example, tokenizer, categories))
            .collect::<Result<Vec<EncodedExample>, Bert4RsError>>()?;

        Ok(SpanNerDataLoader {
            examples,
            num_categories: categories.len() as i64,
            batch_size,
            max_len,
            pad_token_id: tokenizer.pad_id(),
            shuffle,
            device,
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        (self.examples.len() + self.batch_size - 1) / self.batch_size
    }

    pub fn num_categories(&self) -> i64 {
        self.num_categories
    }

    /// Iterates over the batches of one pass through the examples
    pub fn iter(&self) -> SpanNerBatchIter<'_> {
        let order = if self.shuffle {
            let permutation =
                Tensor::randperm(self.examples.len() as i64, (Kind::Int64, Device::Cpu));
            match Vec::<i64>::try_from(&permutation) {
                Ok(permutation) => permutation.into_iter().map(|index| index as usize).collect(),
                Err(error) => {
                    debug!("could not read the shuffled order, keeping the corpus order: {}", error);
                    (0..self.examples.len()).collect()
                }
            }
        } else {
            (0..self.examples.len()).collect()
        };
        SpanNerBatchIter {
            loader: self,
            order,
            position: 0,
        }
    }
}

pub struct SpanNerBatchIter<'a> {
    loader: &'a SpanNerDataLoader,
    order: Vec<usize>,
    position: usize,
}

impl Iterator for SpanNerBatchIter<'_> {
    type Item = Result<SpanNerBatch, Bert4RsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let examples = self.order[self.position..end]
            .iter()
            .map(|&index| &self.loader.examples[index])
            .collect::<Vec<&EncodedExample>>();
        self.position = end;
        Some(collate(
            &examples,
            self.loader.num_categories,
            self.loader.max_len,
            self.loader.pad_token_id,
            self.loader.device,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn labels_are_set_and_long_spans_dropped() {
        let first = EncodedExample {
            token_ids: vec![5, 6, 7, 8],
            spans: vec![(0, 0, 1), (2, 3, 3), (1, 2, 5)],
        };
        let second = EncodedExample {
            token_ids: vec![9, 10],
            spans: vec![(1, 1, 1)],
        };
        let batch = collate(&[&first, &second], 3, 3, 0, Device::Cpu).unwrap();

        assert_eq!(batch.token_ids.size(), vec![2, 3]);
        assert_eq!(
            Vec::<i64>::try_from(&batch.token_ids.view([-1])).unwrap(),
            vec![5, 6, 7, 9, 10, 0]
        );
        assert_eq!(batch.labels.size(), vec![2, 3, 3, 3]);
        assert_eq!(batch.labels.double_value(&[0, 0, 0, 1]), 1.0);
        assert_eq!(batch.labels.double_value(&[1, 1, 1, 1]), 1.0);
        // (2, 3, 3) and (1, 2, 5) end beyond the sequence length
        assert_eq!(batch.labels.sum(Kind::Float).double_value(&[]), 2.0);
    }

    #[test]
    fn empty_batches_are_rejected() {
        assert!(collate(&[], 3, 16, 0, Device::Cpu).is_err());
    }
}
