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
use rust_bert::bert::BertConfig;
use rust_bert::t5::T5Config;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// # Utility to deserialize JSON config files
pub trait Config
where
    for<'de> Self: Deserialize<'de>,
{
    /// Loads a `Config` object from a JSON file. The format is expected to be aligned with the
    /// [Transformers library](https://github.com/huggingface/transformers) configuration files for
    /// model configurations, or with the field names of the crate configuration structures.
    ///
    /// # Arguments
    ///
    /// * `path` - `Path` to the configuration JSON file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bert4rs::pipelines::span_ner::TrainingConfig;
    /// use bert4rs::Config;
    ///
    /// let config_path = std::path::Path::new("path/to/training_config.json");
    /// let config = TrainingConfig::from_file(config_path)?;
    /// # Ok::<(), bert4rs::Bert4RsError>(())
    /// ```
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Bert4RsError> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            Bert4RsError::IOError(format!("{} ({})", e, path.to_string_lossy()))
        })?;
        let br = BufReader::new(f);
        let config: Self = serde_json::from_reader(br)?;
        Ok(config)
    }
}

impl Config for BertConfig {}

impl Config for T5Config {}
