extern crate anyhow;

use bert4rs::pipelines::title_generation::{
    AutoRegressiveDecoder, NextTokenScorer, T5StepScorer, TitleGenerationConfig, TitleGenerator,
};
use bert4rs::{Bert4RsError, Config};
use rust_bert::resources::LocalResource;
use rust_bert::t5::{T5Config, T5ForConditionalGeneration};
use std::cell::Cell;
use std::io::Write;
use tch::{nn, no_grad, Device, Kind, Tensor};

const VOCAB: [&str; 12] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "今", "天", "气", "不", "错", "啊", "好",
];

const T5_CONFIG: &str = r#"{
    "dropout_rate": 0.0,
    "d_model": 16,
    "d_ff": 32,
    "d_kv": 4,
    "decoder_start_token_id": 0,
    "eos_token_id": 1,
    "initializer_factor": 1.0,
    "is_encoder_decoder": true,
    "layer_norm_epsilon": 1e-6,
    "num_heads": 4,
    "num_layers": 2,
    "output_past": true,
    "pad_token_id": 0,
    "relative_attention_num_buckets": 8,
    "vocab_size": 12
}"#;

fn write_resources(directory: &std::path::Path) -> anyhow::Result<()> {
    let mut vocab = std::fs::File::create(directory.join("vocab.txt"))?;
    for token in VOCAB.iter() {
        writeln!(vocab, "{}", token)?;
    }
    std::fs::write(directory.join("config.json"), T5_CONFIG)?;

    let vs = nn::VarStore::new(Device::Cpu);
    let config = T5Config::from_file(directory.join("config.json"))?;
    let _ = T5ForConditionalGeneration::new(vs.root(), &config);
    vs.save(directory.join("model.ot"))?;
    Ok(())
}

#[test]
fn t5_scorer_returns_last_position_logits() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_resources(directory.path())?;
    let mut vs = nn::VarStore::new(Device::Cpu);
    let config = T5Config::from_file(directory.path().join("config.json"))?;
    let model = T5ForConditionalGeneration::new(vs.root(), &config);
    vs.load(directory.path().join("model.ot"))?;

    let source = Tensor::from_slice(&[2i64, 5, 6, 7, 3]).view([1, 5]);
    let encoder_hidden_states = no_grad(|| model.encode(&source, None)).repeat([3, 1, 1]);
    let output_ids = Tensor::from_slice(&[2i64, 8, 2, 9, 2, 10]).view([3, 2]);

    let scorer = T5StepScorer::new(&model);
    let logits = no_grad(|| scorer.score_next(&[encoder_hidden_states], &output_ids))?;
    assert_eq!(logits.size(), vec![3, VOCAB.len() as i64]);
    assert!(scorer.score_next(&[], &output_ids).is_err());
    Ok(())
}

#[test]
fn title_generator_decodes_with_beam_search_and_sampling() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    write_resources(directory.path())?;

    let mut config = TitleGenerationConfig::new(
        LocalResource::from(directory.path().join("model.ot")),
        LocalResource::from(directory.path().join("config.json")),
        LocalResource::from(directory.path().join("vocab.txt")),
    );
    config.max_length = 6;
    config.device = Device::Cpu;
    let title_generator = TitleGenerator::new(config)?;

    let greedy = title_generator.generate("今天天气不错啊", 1)?;
    assert_eq!(greedy, title_generator.generate("今天天气不错啊", 1)?);
    assert!(!greedy.contains("[CLS]"));
    assert!(!greedy.contains("[SEP]"));
    assert!(greedy.chars().count() <= 6);

    let beam = title_generator.generate("今天天气不错啊", 3)?;
    assert!(beam.chars().count() <= 6);

    let sampled = title_generator.generate_sampled("今天天气不错啊", 3, Some(2), Some(0.9))?;
    assert_eq!(sampled.len(), 3);
    Ok(())
}

#[test]
fn decoder_calls_scorer_until_end_token() -> anyhow::Result<()> {
    let calls = Cell::new(0);
    // always prefers token 4, the end token becomes the favourite from the third step
    let scorer = |_: &[Tensor], output_ids: &Tensor| -> Result<Tensor, Bert4RsError> {
        calls.set(calls.get() + 1);
        let rows = output_ids.size()[0];
        let favourite = if output_ids.size()[1] >= 3 { 3 } else { 4 };
        let logits = Tensor::zeros([rows, 6], (Kind::Float, Device::Cpu));
        let _ = logits.narrow(1, favourite, 1).fill_(8.0);
        Ok(logits)
    };

    let decoder = AutoRegressiveDecoder::new(Some(2), 3, 20, Device::Cpu);
    let output = decoder.beam_search(&scorer, &[], 2, 1.0, 1)?;
    assert_eq!(output, vec![2, 4, 4, 3]);
    assert_eq!(calls.get(), 3);

    // two end tokens are required before stopping
    let output = decoder.beam_search(&scorer, &[], 1, 1.0, 2)?;
    assert_eq!(output.iter().filter(|&&id| id == 3).count(), 2);
    assert_eq!(output.last(), Some(&3));
    Ok(())
}
