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

use tch::{Kind, Tensor};

const LOSS_PENALTY: f64 = 1e12;

/// Multi-label categorical cross-entropy for span logits.
///
/// Each (example, category) row of the span grid is treated as a multi-label classification over
/// all (start, end) cells: positive cells are pushed above 0 and negative cells below 0 through
/// `log(1 + sum(exp(s_neg))) + log(1 + sum(exp(-s_pos)))`.
///
/// # Arguments
///
/// * `y_pred` - span logits of shape (*batch size*, *num_categories*, *sequence_length*, *sequence_length*)
/// * `y_true` - binary labels with the same shape
///
/// # Returns
///
/// * scalar `Tensor` with the mean loss over examples and categories
pub fn multilabel_categorical_crossentropy(y_pred: &Tensor, y_true: &Tensor) -> Tensor {
    let size = y_pred.size();
    let rows = size[0] * size[1];
    // (b * c, s * s): one multi-label problem per (example, category), averaged over rows
    let y_pred = y_pred.reshape([rows, -1]);
    let y_true = y_true.reshape([rows, -1]).to_kind(y_pred.kind());

    let y_pred = (y_true.ones_like() - &y_true * 2.0) * y_pred;
    let y_pred_neg = &y_pred - &y_true * LOSS_PENALTY;
    let y_pred_pos = &y_pred - (y_true.ones_like() - &y_true) * LOSS_PENALTY;
    let zeros = y_pred.zeros_like().narrow(-1, 0, 1);
    let y_pred_neg = Tensor::cat(&[&y_pred_neg, &zeros], -1);
    let y_pred_pos = Tensor::cat(&[&y_pred_pos, &zeros], -1);

    let neg_loss = y_pred_neg.logsumexp([-1i64].as_slice(), false);
    let pos_loss = y_pred_pos.logsumexp([-1i64].as_slice(), false);
    (neg_loss + pos_loss).mean(Kind::Float)
}
