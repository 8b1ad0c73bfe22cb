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
use tch::{Device, Kind, Tensor};

/// Builds the sinusoid table of shape (*n_position*, *dim*): even columns hold
/// `sin(pos / 10000^(2i/dim))`, odd columns the matching cosine.
pub fn sinusoid_encoding_table(n_position: i64, dim: i64, device: Device) -> Tensor {
    let position = Tensor::arange(n_position, (Kind::Float, device)).unsqueeze(1);
    let div_term = (Tensor::arange_start_step(0, dim, 2, (Kind::Float, device))
        * (-(10000f64.ln()) / dim as f64))
        .exp();
    let angles = position * div_term.unsqueeze(0);
    Tensor::stack(&[angles.sin(), angles.cos()], -1).view([n_position, dim])
}

/// # Rotary position encoding
/// Rotates pairs of features of a query or key vector by an angle that depends on the token position,
/// so that the dot product between a rotated query and a rotated key only depends on their relative distance.
#[derive(Debug)]
pub struct RotaryPositionEncoding {
    cos_position: Tensor,
    sin_position: Tensor,
    max_position: i64,
}

impl RotaryPositionEncoding {
    /// Creates the encoding tables for sequences of up to `max_position` tokens and
    /// vectors of dimension `dim` (must be even).
    pub fn new(
        max_position: i64,
        dim: i64,
        device: Device,
    ) -> Result<RotaryPositionEncoding, Bert4RsError> {
        if dim <= 0 || dim % 2 != 0 {
            return Err(Bert4RsError::InvalidConfigurationError(format!(
                "rotary position encoding requires an even, positive dimension (got {})",
                dim
            )));
        }
        let table = sinusoid_encoding_table(max_position, dim, device);
        let cos = table.slice(1, 1, dim, 2);
        let sin = table.slice(1, 0, dim, 2);
        let cos_position = Tensor::stack(&[&cos, &cos], -1).view([max_position, dim]);
        let sin_position = Tensor::stack(&[&sin, &sin], -1).view([max_position, dim]);
        Ok(RotaryPositionEncoding {
            cos_position,
            sin_position,
            max_position,
        })
    }

    pub fn max_position(&self) -> i64 {
        self.max_position
    }

    /// Applies the rotation to `xs` of shape (*batch size*, *sequence_length*, *dim*).
    pub fn forward(&self, xs: &Tensor) -> Tensor {
        let size = xs.size();
        let (sequence_length, dim) = (size[1], size[2]);
        let rotated = Tensor::stack(
            &[xs.slice(-1, 1, dim, 2).neg(), xs.slice(-1, 0, dim, 2)],
            -1,
        )
        .reshape(size.as_slice());
        xs * self.cos_position.narrow(0, 0, sequence_length)
            + rotated * self.sin_position.narrow(0, 0, sequence_length)
    }
}
