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

use bert4rs::global_pointer::{BertGlobalPointer, GlobalPointerConfig};
use bert4rs::pipelines::span_ner::{
    load_corpus, EntityCategories, GlobalPointerTrainer, SpanEvaluator, SpanNerDataLoader,
    TrainingCallback, TrainingConfig,
};
use bert4rs::pipelines::tokenization::CharTokenizer;
use bert4rs::Config;
use rust_bert::bert::BertConfig;
use tch::{nn, Device};

/// Trains an Efficient Global Pointer on the People's Daily NER corpus (`example.train` / `example.dev`,
/// one `<character> <tag>` pair per line) on top of a Chinese BERT checkpoint converted to the `.ot` format.
///
/// Locations are read from the environment:
/// - `BERT_DIR`: directory with `config.json`, `vocab.txt` and `model.ot`
/// - `NER_DATA_DIR`: directory with `example.train` and `example.dev`
/// - `TRAINING_CONFIG` (optional): JSON `TrainingConfig`
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let bert_dir = PathBuf::from(env::var("BERT_DIR").unwrap_or_else(|_| "chinese_L-12_H-768_A-12".into()));
    let data_dir = PathBuf::from(env::var("NER_DATA_DIR").unwrap_or_else(|_| "china-people-daily-ner-corpus".into()));
    let training_config = match env::var("TRAINING_CONFIG") {
        Ok(path) => TrainingConfig::from_file(path)?,
        Err(_) => TrainingConfig::default(),
    };

    let device = Device::cuda_if_available();
    let categories = EntityCategories::default();
    let tokenizer = CharTokenizer::from_file(bert_dir.join("vocab.txt"), true)?;

    let train = load_corpus(data_dir.join("example.train"), &categories, training_config.max_len)?;
    let valid = load_corpus(data_dir.join("example.dev"), &categories, training_config.max_len)?;
    let train_loader = SpanNerDataLoader::new(
        &train,
        &tokenizer,
        &categories,
        training_config.batch_size,
        training_config.max_len,
        true,
        device,
    )?;
    let valid_loader = SpanNerDataLoader::new(
        &valid,
        &tokenizer,
        &categories,
        training_config.batch_size,
        training_config.max_len,
        false,
        device,
    )?;

    //    Set-up model
    let mut vs = nn::VarStore::new(device);
    let bert_config = BertConfig::from_file(bert_dir.join("config.json"))?;
    let global_pointer_config = GlobalPointerConfig {
        hidden_size: bert_config.hidden_size,
        num_categories: categories.len() as i64,
        pad_token_id: tokenizer.pad_id(),
        ..Default::default()
    };
    let model = BertGlobalPointer::new(vs.root(), &bert_config, &global_pointer_config)?;
    let missing = vs.load_partial(bert_dir.join("model.ot"))?;
    println!("{} variables initialized randomly", missing.len());

    //    Train
    let mut evaluator = SpanEvaluator::new(
        &valid_loader,
        Some(training_config.checkpoint_path.clone()),
    );
    let trainer = GlobalPointerTrainer::new(training_config);
    trainer.fit(
        &model,
        &vs,
        &train_loader,
        &mut [&mut evaluator as &mut dyn TrainingCallback<BertGlobalPointer>],
    )?;
    println!("best f1: {:.5}", evaluator.best_f1());

    Ok(())
}
