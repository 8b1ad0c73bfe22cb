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

use std::env;
use std::path::PathBuf;

use bert4rs::pipelines::title_generation::{TitleGenerationConfig, TitleGenerator};
use rust_bert::resources::LocalResource;

/// Generates titles with a Chinese T5 PEGASUS checkpoint converted to the `.ot` format.
/// `T5_DIR` points to the directory holding `config.json`, `vocab.txt` and `model.ot`.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let model_dir = PathBuf::from(env::var("T5_DIR").unwrap_or_else(|_| "chinese_t5_pegasus_base".into()));

    //    Set-up model
    let config = TitleGenerationConfig::new(
        LocalResource::from(model_dir.join("model.ot")),
        LocalResource::from(model_dir.join("config.json")),
        LocalResource::from(model_dir.join("vocab.txt")),
    );
    let title_generator = TitleGenerator::new(config)?;

    //    Run model
    let input = "今天天气不错啊";
    println!("{}", title_generator.generate(input, 1)?);
    for title in title_generator.generate_sampled(input, 3, Some(5), Some(0.95))? {
        println!("{}", title);
    }

    Ok(())
}
