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

use bert4rs::pipelines::span_ner::{EntityCategories, SpanNerConfig, SpanNerModel};
use rust_bert::resources::LocalResource;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let bert_dir = PathBuf::from(env::var("BERT_DIR").unwrap_or_else(|_| "chinese_L-12_H-768_A-12".into()));
    let checkpoint = PathBuf::from(env::var("CHECKPOINT").unwrap_or_else(|_| "best_model.ot".into()));

    //    Set-up model
    let config = SpanNerConfig::new(
        LocalResource::from(checkpoint),
        LocalResource::from(bert_dir.join("config.json")),
        LocalResource::from(bert_dir.join("vocab.txt")),
        EntityCategories::default(),
    );
    let ner_model = SpanNerModel::new(config)?;

    //    Define input
    let input = [
        "我们变而以书会友，以书结缘，把欧美、港台流行的食品类图谱、画册、工具书汇集一堂。",
        "在北京大学召开的座谈会上，李明介绍了海峡两岸的交流情况。",
    ];

    //    Run model
    let output = ner_model.predict(&input)?;
    for entities in output {
        for entity in entities {
            println!("{:?}", entity);
        }
    }

    Ok(())
}
