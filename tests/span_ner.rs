extern crate anyhow;

use bert4rs::global_pointer::{BertGlobalPointer, GlobalPointerConfig, SpanLogitsModel};
use bert4rs::pipelines::span_ner::{
    evaluate, parse_corpus, EntityCategories, GlobalPointerTrainer, SpanEvaluator,
    SpanNerConfig, SpanNerDataLoader, SpanNerModel, TrainingCallback, TrainingConfig,
};
use bert4rs::pipelines::tokenization::CharTokenizer;
use bert4rs::Config;
use rust_bert::bert::BertConfig;
use rust_bert::resources::LocalResource;
use std::io::Write;
use tch::{nn, no_grad, Device, Tensor};

const CORPUS: &str = "中 B-LOC\n国 I-LOC\n很 O\n大 O\n\n李 B-PER\n明 I-PER\n在 O\n北 B-LOC\n京 I-LOC\n\n大 O\n学 B-ORG\n很 I-ORG\n";
const VOCAB: [&str; 15] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "中", "国", "很", "大", "李", "明", "在", "北",
    "京", "学",
];

fn vocab_file() -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    for token in VOCAB.iter() {
        writeln!(file, "{}", token)?;
    }
    Ok(file)
}

fn tiny_bert_config() -> BertConfig {
    BertConfig {
        hidden_size: 32,
        intermediate_size: 64,
        num_attention_heads: 4,
        num_hidden_layers: 1,
        vocab_size: VOCAB.len() as i64,
        max_position_embeddings: 32,
        hidden_dropout_prob: 0.0,
        attention_probs_dropout_prob: 0.0,
        ..Default::default()
    }
}

fn tiny_head_config() -> GlobalPointerConfig {
    GlobalPointerConfig {
        hidden_size: 32,
        head_size: 8,
        num_categories: 3,
        max_position_embeddings: 32,
        use_rotary: true,
        pad_token_id: 0,
    }
}

#[test]
fn corpus_to_label_grids() -> anyhow::Result<()> {
    let vocab = vocab_file()?;
    let tokenizer = CharTokenizer::from_file(vocab.path(), true)?;
    let categories = EntityCategories::default();
    let examples = parse_corpus(CORPUS, &categories, 32)?;
    assert_eq!(examples.len(), 3);

    let loader = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 2, 32, false, Device::Cpu)?;
    assert_eq!(loader.num_batches(), 2);
    let batches = loader.iter().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(batches.len(), 2);

    let first = &batches[0];
    assert_eq!(first.token_ids.size(), vec![2, 5]);
    assert_eq!(first.labels.size(), vec![2, 3, 5, 5]);
    // 中国 -> LOC (0, 1); 李明 -> PER (0, 1); 北京 -> LOC (3, 4)
    assert_eq!(first.labels.double_value(&[0, 0, 0, 1]), 1.0);
    assert_eq!(first.labels.double_value(&[1, 2, 0, 1]), 1.0);
    assert_eq!(first.labels.double_value(&[1, 0, 3, 4]), 1.0);
    assert_eq!(first.labels.sum(tch::Kind::Float).double_value(&[]), 3.0);
    // first example is right-padded
    assert_eq!(first.token_ids.int64_value(&[0, 4]), 0);

    let second = &batches[1];
    assert_eq!(second.token_ids.size(), vec![1, 3]);
    assert_eq!(second.labels.double_value(&[0, 1, 1, 2]), 1.0);
    Ok(())
}

#[test]
fn perfect_predictions_score_one() -> anyhow::Result<()> {
    struct Oracle<'a> {
        loader: &'a SpanNerDataLoader,
    }

    impl SpanLogitsModel for Oracle<'_> {
        fn span_logits(
            &self,
            token_ids: &Tensor,
            _train: bool,
        ) -> Result<Tensor, bert4rs::Bert4RsError> {
            // the loader is not shuffled, so batches come back in the same order
            for batch in self.loader.iter() {
                let batch = batch?;
                if batch.token_ids.equal(token_ids) {
                    return Ok(batch.labels * 2.0 - 1.0);
                }
            }
            Err(bert4rs::Bert4RsError::ValueError("unknown batch".to_string()))
        }
    }

    let vocab = vocab_file()?;
    let tokenizer = CharTokenizer::from_file(vocab.path(), true)?;
    let categories = EntityCategories::default();
    let examples = parse_corpus(CORPUS, &categories, 32)?;
    let loader = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 2, 32, false, Device::Cpu)?;

    let metrics = evaluate(&Oracle { loader: &loader }, &loader)?;
    assert!((metrics.f1 - 1.0).abs() < 1e-6);
    assert!((metrics.precision - 1.0).abs() < 1e-6);
    assert!((metrics.recall - 1.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn training_saves_a_reloadable_checkpoint() -> anyhow::Result<()> {
    tch::manual_seed(0);
    let device = Device::Cpu;
    let vocab = vocab_file()?;
    let tokenizer = CharTokenizer::from_file(vocab.path(), true)?;
    let categories = EntityCategories::default();
    let examples = parse_corpus(CORPUS, &categories, 32)?;
    let train_loader = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 2, 32, true, device)?;
    let valid_loader = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 2, 32, false, device)?;

    let vs = nn::VarStore::new(device);
    let model = BertGlobalPointer::new(vs.root(), &tiny_bert_config(), &tiny_head_config())?;

    let checkpoint_dir = tempfile::tempdir()?;
    let checkpoint_path = checkpoint_dir.path().join("best_model.ot");
    let config = TrainingConfig {
        epochs: 3,
        steps_per_epoch: Some(3),
        batch_size: 2,
        learning_rate: 1e-3,
        max_len: 32,
        checkpoint_path: checkpoint_path.clone(),
    };

    let mut evaluator = SpanEvaluator::new(&valid_loader, Some(checkpoint_path.clone()));
    let history = GlobalPointerTrainer::new(config).fit(
        &model,
        &vs,
        &train_loader,
        &mut [&mut evaluator as &mut dyn TrainingCallback<BertGlobalPointer>],
    )?;

    assert_eq!(history.len(), 3);
    assert_eq!(history[2].steps, 9);
    assert!(history.iter().all(|logs| logs.loss.is_finite()));
    assert_eq!(evaluator.history().len(), 3);
    let best = evaluator
        .history()
        .iter()
        .map(|metrics| metrics.f1)
        .fold(0f64, f64::max);
    assert_eq!(evaluator.best_f1(), best);
    // epsilon smoothing keeps the F1 strictly positive, so the first evaluation always saves
    assert!(checkpoint_path.exists());

    // a snapshot of the current variables reloads to identical logits
    let snapshot_path = checkpoint_dir.path().join("snapshot.ot");
    vs.save(&snapshot_path)?;
    let mut reloaded_vs = nn::VarStore::new(device);
    let reloaded = BertGlobalPointer::new(reloaded_vs.root(), &tiny_bert_config(), &tiny_head_config())?;
    reloaded_vs.load(&snapshot_path)?;

    let token_ids = Tensor::from_slice(&[5i64, 6, 7, 8, 0]).view([1, 5]);
    let original_logits = no_grad(|| model.span_logits(&token_ids, false))?;
    let reloaded_logits = no_grad(|| reloaded.span_logits(&token_ids, false))?;
    assert!(original_logits.equal(&reloaded_logits));
    Ok(())
}

#[test]
fn span_ner_model_predicts_from_checkpoint() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let vocab = vocab_file()?;
    let directory = tempfile::tempdir()?;

    let config_path = directory.path().join("config.json");
    serde_json::to_writer(std::fs::File::create(&config_path)?, &tiny_bert_config())?;
    let weights_path = directory.path().join("model.ot");
    let vs = nn::VarStore::new(device);
    let _ = BertGlobalPointer::new(vs.root(), &BertConfig::from_file(&config_path)?, &tiny_head_config())?;
    vs.save(&weights_path)?;

    let mut config = SpanNerConfig::new(
        LocalResource::from(weights_path),
        LocalResource::from(config_path),
        LocalResource::from(vocab.path().to_path_buf()),
        EntityCategories::default(),
    );
    config.global_pointer = tiny_head_config();
    config.device = device;
    let model = SpanNerModel::new(config)?;

    let input = ["中国很大", "", "李明在北京"];
    let output = model.predict(&input)?;
    assert_eq!(output.len(), 3);
    assert!(output[1].is_empty());
    for (text, entities) in input.iter().zip(output.iter()) {
        let characters = text.chars().collect::<Vec<char>>();
        for entity in entities {
            assert!(entity.start <= entity.end);
            assert!(entity.end < characters.len());
            assert!(entity.score > 0.0);
            assert_eq!(
                entity.text,
                characters[entity.start..=entity.end].iter().collect::<String>()
            );
            assert!(["LOC", "ORG", "PER"].contains(&entity.label.as_str()));
        }
    }
    Ok(())
}

#[test]
fn span_ner_model_reads_hidden_size_from_bert_config() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let vocab = vocab_file()?;
    let directory = tempfile::tempdir()?;

    let config_path = directory.path().join("config.json");
    serde_json::to_writer(std::fs::File::create(&config_path)?, &tiny_bert_config())?;
    let weights_path = directory.path().join("model.ot");
    let vs = nn::VarStore::new(device);
    let head_config = GlobalPointerConfig {
        hidden_size: 32,
        num_categories: 3,
        ..Default::default()
    };
    let _ = BertGlobalPointer::new(vs.root(), &tiny_bert_config(), &head_config)?;
    vs.save(&weights_path)?;

    // the head keeps its default hidden size of 768, the 32-wide encoder config must win
    let mut config = SpanNerConfig::new(
        LocalResource::from(weights_path),
        LocalResource::from(config_path),
        LocalResource::from(vocab.path().to_path_buf()),
        EntityCategories::default(),
    );
    config.device = device;
    assert_eq!(config.global_pointer.hidden_size, 768);
    let model = SpanNerModel::new(config)?;

    let output = model.predict(&["李明在北京"])?;
    assert_eq!(output.len(), 1);
    Ok(())
}

#[test]
fn training_without_step_limit_makes_one_pass_per_epoch() -> anyhow::Result<()> {
    tch::manual_seed(0);
    let device = Device::Cpu;
    let vocab = vocab_file()?;
    let tokenizer = CharTokenizer::from_file(vocab.path(), true)?;
    let categories = EntityCategories::default();
    let examples = parse_corpus(CORPUS, &categories, 32)?;
    let train_loader = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 2, 32, true, device)?;
    assert_eq!(train_loader.num_batches(), 2);

    let vs = nn::VarStore::new(device);
    let model = BertGlobalPointer::new(vs.root(), &tiny_bert_config(), &tiny_head_config())?;
    let config = TrainingConfig {
        epochs: 2,
        steps_per_epoch: None,
        batch_size: 2,
        learning_rate: 1e-3,
        max_len: 32,
        checkpoint_path: "unused.ot".into(),
    };

    let mut callbacks: Vec<&mut dyn TrainingCallback<BertGlobalPointer>> = Vec::new();
    let history = GlobalPointerTrainer::new(config).fit(&model, &vs, &train_loader, &mut callbacks)?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].steps, 2);
    assert_eq!(history[1].steps, 4);
    Ok(())
}

#[test]
fn shuffled_loader_visits_every_example_once() -> anyhow::Result<()> {
    tch::manual_seed(7);
    let vocab = vocab_file()?;
    let tokenizer = CharTokenizer::from_file(vocab.path(), true)?;
    let categories = EntityCategories::default();
    let examples = parse_corpus(CORPUS, &categories, 32)?;
    let ordered = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 1, 32, false, Device::Cpu)?;
    let shuffled = SpanNerDataLoader::new(&examples, &tokenizer, &categories, 1, 32, true, Device::Cpu)?;

    let first_tokens = |loader: &SpanNerDataLoader| -> anyhow::Result<Vec<i64>> {
        let mut tokens = Vec::new();
        for batch in loader.iter() {
            tokens.push(batch?.token_ids.int64_value(&[0, 0]));
        }
        Ok(tokens)
    };
    let expected = first_tokens(&ordered)?;
    assert_eq!(expected, vec![5, 9, 8]);
    for _ in 0..3 {
        let mut visited = first_tokens(&shuffled)?;
        visited.sort_unstable();
        let mut sorted = expected.clone();
        sorted.sort_unstable();
        assert_eq!(visited, sorted);
    }
    Ok(())
}
