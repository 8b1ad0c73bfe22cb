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
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::convert::TryFrom;
use tch::{no_grad, Device, Kind, Tensor};
use tracing::debug;

/// # Scores the next token of partially decoded sequences
/// Implementations return the raw logits for the next position, of shape (*num_sequences*, *vocab_size*),
/// given the model inputs (one row per sequence) and the token ids generated so far
/// (*num_sequences*, *current_length*). The number of sequences changes between calls as sequences
/// finish, so implementations must not keep state across calls.
pub trait NextTokenScorer {
    fn score_next(&self, inputs: &[Tensor], output_ids: &Tensor) -> Result<Tensor, Bert4RsError>;
}

impl<F> NextTokenScorer for F
where
    F: Fn(&[Tensor], &Tensor) -> Result<Tensor, Bert4RsError>,
{
    fn score_next(&self, inputs: &[Tensor], output_ids: &Tensor) -> Result<Tensor, Bert4RsError> {
        self(inputs, output_ids)
    }
}

/// # Auto-regressive decoder
/// Generic beam search and random sampling over any `NextTokenScorer`.
///
/// A sequence is finished when it ends with `end_id` and contains at least `min_ends` end tokens.
/// No sequence is considered finished before it reaches `min_length` tokens (start token included).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoRegressiveDecoder {
    /// Token id every output starts with. Outputs start from an empty prefix if `None`.
    pub start_id: Option<i64>,
    /// Token id terminating an output
    pub end_id: i64,
    /// Maximum number of decoding steps
    pub max_length: usize,
    /// Minimum output length before a sequence may terminate
    pub min_length: usize,
    /// Device the decoder tensors are created on
    pub device: Device,
}

impl AutoRegressiveDecoder {
    pub fn new(
        start_id: Option<i64>,
        end_id: i64,
        max_length: usize,
        device: Device,
    ) -> AutoRegressiveDecoder {
        AutoRegressiveDecoder {
            start_id,
            end_id,
            max_length,
            min_length: 1,
            device,
        }
    }

    fn first_output_ids(&self) -> Vec<i64> {
        self.start_id.into_iter().collect()
    }

    fn output_tensor(&self, output_ids: &[Vec<i64>]) -> Tensor {
        let length = output_ids.first().map(Vec::len).unwrap_or(0) as i64;
        let flat = output_ids.concat();
        Tensor::from_slice(&flat)
            .view([output_ids.len() as i64, length])
            .to(self.device)
    }

    fn is_finished(&self, output_ids: &[i64], min_ends: usize) -> bool {
        output_ids.last() == Some(&self.end_id)
            && output_ids.iter().filter(|&&id| id == self.end_id).count() >= min_ends
    }

    /// Probabilities of the next token: `softmax(logits / temperature)`
    fn next_token_probabilities<S>(
        &self,
        scorer: &S,
        inputs: &[Tensor],
        output_ids: &[Vec<i64>],
        temperature: f64,
    ) -> Result<Tensor, Bert4RsError>
    where
        S: NextTokenScorer + ?Sized,
    {
        let output_tensor = self.output_tensor(output_ids);
        let logits = no_grad(|| scorer.score_next(inputs, &output_tensor))?;
        let expected_rows = output_ids.len() as i64;
        if logits.dim() != 2 || logits.size()[0] != expected_rows {
            return Err(Bert4RsError::ValueError(format!(
                "next token scores must have shape ({}, vocab_size), got {:?}",
                expected_rows,
                logits.size()
            )));
        }
        Ok((logits.to_kind(Kind::Float) / temperature).softmax(-1, Kind::Float))
    }

    fn validate_temperature(temperature: f64) -> Result<(), Bert4RsError> {
        if temperature <= 0.0 {
            return Err(Bert4RsError::ValueError(format!(
                "temperature must be strictly positive (got {})",
                temperature
            )));
        }
        Ok(())
    }

    /// Beam search decoding
    ///
    /// # Arguments
    ///
    /// * `scorer` - `NextTokenScorer` producing the next token logits
    /// * `inputs` - model inputs for a single example (first dimension of size 1), repeated for every beam
    /// * `topk` - beam width
    /// * `temperature` - softmax temperature applied to the logits
    /// * `min_ends` - number of end tokens a finished output must contain
    ///
    /// # Returns
    ///
    /// * `Vec<i64>` token ids of the highest scoring output, including the start and end tokens
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use bert4rs::pipelines::title_generation::AutoRegressiveDecoder;
    /// use bert4rs::Bert4RsError;
    /// use tch::{Device, Kind, Tensor};
    ///
    /// let decoder = AutoRegressiveDecoder::new(Some(2), 3, 32, Device::Cpu);
    /// let scorer = |_inputs: &[Tensor], output_ids: &Tensor| -> Result<Tensor, Bert4RsError> {
    ///     Ok(Tensor::randn([output_ids.size()[0], 10], (Kind::Float, Device::Cpu)))
    /// };
    /// let output = decoder.beam_search(&scorer, &[], 4, 1.0, 1)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn beam_search<S>(
        &self,
        scorer: &S,
        inputs: &[Tensor],
        topk: usize,
        temperature: f64,
        min_ends: usize,
    ) -> Result<Vec<i64>, Bert4RsError>
    where
        S: NextTokenScorer + ?Sized,
    {
        if topk == 0 {
            return Err(Bert4RsError::ValueError(
                "beam search requires at least one beam".to_string(),
            ));
        }
        Self::validate_temperature(temperature)?;

        let mut inputs = inputs.iter().map(|input| input.to(self.device)).collect::<Vec<Tensor>>();
        let mut output_ids = vec![self.first_output_ids()];
        let mut output_scores = vec![0f64];
        let mut topk = topk as i64;

        for step in 0..self.max_length {
            let scores = (self.next_token_probabilities(scorer, &inputs, &output_ids, temperature)?
                + 1e-12)
                .log()
                .to_kind(Kind::Double);
            let vocab_size = scores.size()[1];
            let num_candidates = topk.min(output_ids.len() as i64 * vocab_size);
            if step == 0 {
                inputs = inputs
                    .iter()
                    .map(|input| repeat_rows(input, num_candidates))
                    .collect();
            }

            let cumulative_scores = Tensor::from_slice(&output_scores)
                .to(self.device)
                .unsqueeze(1)
                + scores;
            let (top_scores, top_indices) =
                cumulative_scores
                    .view([-1])
                    .topk(num_candidates, -1, true, true);
            let top_scores = Vec::<f64>::try_from(&top_scores)?;
            let top_indices = Vec::<i64>::try_from(&top_indices)?;

            output_ids = top_indices
                .iter()
                .map(|index| {
                    let mut ids = output_ids[(index / vocab_size) as usize].clone();
                    ids.push(index % vocab_size);
                    ids
                })
                .collect();
            output_scores = top_scores;

            if output_ids[0].len() >= self.min_length {
                let best = argmax(&output_scores);
                if self.is_finished(&output_ids[best], min_ends) {
                    debug!("beam search finished after {} steps", step + 1);
                    return Ok(output_ids.swap_remove(best));
                }
                let unfinished = (0..output_ids.len())
                    .filter(|&index| !self.is_finished(&output_ids[index], min_ends))
                    .collect::<Vec<usize>>();
                if unfinished.len() < output_ids.len() {
                    let keep = Tensor::from_slice(
                        &unfinished.iter().map(|&index| index as i64).collect::<Vec<i64>>(),
                    )
                    .to(self.device);
                    inputs = inputs
                        .iter()
                        .map(|input| input.index_select(0, &keep))
                        .collect();
                    output_ids = unfinished.iter().map(|&index| output_ids[index].clone()).collect();
                    output_scores = unfinished.iter().map(|&index| output_scores[index]).collect();
                    topk = unfinished.len() as i64;
                }
            }
        }
        debug!("beam search reached the maximum length ({})", self.max_length);
        let best = argmax(&output_scores);
        Ok(output_ids.swap_remove(best))
    }

    /// Random sampling decoding
    ///
    /// # Arguments
    ///
    /// * `scorer` - `NextTokenScorer` producing the next token logits
    /// * `inputs` - model inputs for a single example (first dimension of size 1), repeated for every sample
    /// * `n` - number of outputs to sample
    /// * `topk` - if set, only sample among the `topk` most likely tokens
    /// * `topp` - if set, only sample among the smallest set of tokens with a cumulative probability of at least `topp`
    /// * `temperature` - softmax temperature applied to the logits
    /// * `min_ends` - number of end tokens a finished output must contain
    ///
    /// # Returns
    ///
    /// * `Vec<Vec<i64>>` sampled outputs in order of completion. Outputs still running at `max_length` come last.
    pub fn random_sample<S>(
        &self,
        scorer: &S,
        inputs: &[Tensor],
        n: usize,
        topk: Option<usize>,
        topp: Option<f64>,
        temperature: f64,
        min_ends: usize,
    ) -> Result<Vec<Vec<i64>>, Bert4RsError>
    where
        S: NextTokenScorer + ?Sized,
    {
        Self::validate_temperature(temperature)?;
        if topk == Some(0) {
            return Err(Bert4RsError::ValueError(
                "top-k sampling requires k > 0".to_string(),
            ));
        }
        if let Some(topp) = topp {
            if topp <= 0.0 {
                return Err(Bert4RsError::ValueError(format!(
                    "nucleus sampling requires top-p > 0 (got {})",
                    topp
                )));
            }
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut inputs = inputs.iter().map(|input| input.to(self.device)).collect::<Vec<Tensor>>();
        let mut output_ids = vec![self.first_output_ids()];
        let mut results = Vec::with_capacity(n);

        for step in 0..self.max_length {
            let mut probabilities =
                self.next_token_probabilities(scorer, &inputs, &output_ids, temperature)?;
            if step == 0 {
                probabilities = probabilities.repeat([n as i64, 1]);
                inputs = inputs
                    .iter()
                    .map(|input| repeat_rows(input, n as i64))
                    .collect();
                output_ids = vec![output_ids[0].clone(); n];
            }

            let k_indices = match topk {
                Some(topk) => {
                    let vocab_size = probabilities.size()[1];
                    let (values, indices) =
                        probabilities.topk((topk as i64).min(vocab_size), -1, true, true);
                    probabilities = normalize(&values);
                    Some(indices)
                }
                None => None,
            };
            let p_indices = match topp {
                Some(topp) => {
                    let (sorted, indices) = probabilities.sort(-1, true);
                    // a token is dropped once the tokens ranked before it reach `topp`
                    let preceding = sorted.cumsum(-1, Kind::Float) - &sorted;
                    probabilities = normalize(&sorted.masked_fill(&preceding.ge(topp), 0.0));
                    Some(indices)
                }
                None => None,
            };

            let mut sample_ids = probabilities.multinomial(1, false);
            if let Some(indices) = &p_indices {
                sample_ids = indices.gather(1, &sample_ids, false);
            }
            if let Some(indices) = &k_indices {
                sample_ids = indices.gather(1, &sample_ids, false);
            }
            let sample_ids = Vec::<i64>::try_from(&sample_ids.view([-1]))?;
            for (ids, sample_id) in output_ids.iter_mut().zip(sample_ids) {
                ids.push(sample_id);
            }

            if output_ids[0].len() >= self.min_length {
                let (finished, unfinished): (Vec<usize>, Vec<usize>) = (0..output_ids.len())
                    .partition(|&index| self.is_finished(&output_ids[index], min_ends));
                if !finished.is_empty() {
                    results.extend(finished.iter().map(|&index| output_ids[index].clone()));
                    if unfinished.is_empty() {
                        debug!("all samples finished after {} steps", step + 1);
                        return Ok(results);
                    }
                    let keep = Tensor::from_slice(
                        &unfinished.iter().map(|&index| index as i64).collect::<Vec<i64>>(),
                    )
                    .to(self.device);
                    inputs = inputs
                        .iter()
                        .map(|input| input.index_select(0, &keep))
                        .collect();
                    output_ids = unfinished.iter().map(|&index| output_ids[index].clone()).collect();
                }
            }
        }
        results.extend(output_ids);
        Ok(results)
    }
}

fn repeat_rows(input: &Tensor, times: i64) -> Tensor {
    let mut repeats = vec![1i64; input.dim()];
    if let Some(first) = repeats.first_mut() {
        *first = times;
    }
    input.repeat(repeats.as_slice())
}

fn normalize(probabilities: &Tensor) -> Tensor {
    probabilities / probabilities.sum_dim_intlist([-1i64].as_slice(), true, Kind::Float)
}

/// Index of the highest score (first one on ties)
fn argmax(scores: &[f64]) -> usize {
    scores
        .iter()
        .enumerate()
        .max_by_key(|(index, score)| (OrderedFloat(**score), Reverse(*index)))
        .map(|(index, _)| index)
        .unwrap_or(0)
}
