extern crate anyhow;

use bert4rs::global_pointer::{
    multilabel_categorical_crossentropy, BertGlobalPointer, EfficientGlobalPointer,
    GlobalPointerConfig, SpanLogitsModel,
};
use rust_bert::bert::BertConfig;
use tch::nn::OptimizerConfig;
use tch::{nn, no_grad, Device, Kind, Tensor};

fn tiny_bert_config() -> BertConfig {
    BertConfig {
        hidden_size: 32,
        intermediate_size: 64,
        num_attention_heads: 4,
        num_hidden_layers: 2,
        vocab_size: 32,
        max_position_embeddings: 64,
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
        max_position_embeddings: 64,
        use_rotary: true,
        pad_token_id: 0,
    }
}

#[test]
fn bert_global_pointer_masks_padding_and_lower_triangle() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let vs = nn::VarStore::new(device);
    let model = BertGlobalPointer::new(vs.root(), &tiny_bert_config(), &tiny_head_config())?;

    let token_ids = Tensor::from_slice(&[5i64, 6, 7, 8, 9, 10, 0, 0]).view([2, 4]);
    let logits = no_grad(|| model.span_logits(&token_ids, false))?;
    assert_eq!(logits.size(), vec![2, 3, 4, 4]);

    for category in 0..3 {
        for start in 0..4 {
            for end in 0..4 {
                let first = logits.double_value(&[0, category, start, end]);
                let second = logits.double_value(&[1, category, start, end]);
                if start > end {
                    assert!(first < -1e11);
                    assert!(second < -1e11);
                } else {
                    assert!(first.is_finite());
                    assert!(first.abs() < 1e6);
                }
                if start >= 2 || end >= 2 {
                    assert_eq!(second, f64::NEG_INFINITY);
                }
            }
        }
    }
    Ok(())
}

#[test]
fn span_scores_do_not_depend_on_padding() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let vs = nn::VarStore::new(device);
    let model = BertGlobalPointer::new(vs.root(), &tiny_bert_config(), &tiny_head_config())?;

    let short = Tensor::from_slice(&[5i64, 6, 7]).view([1, 3]);
    let padded = Tensor::from_slice(&[5i64, 6, 7, 0, 0]).view([1, 5]);
    let short_logits = no_grad(|| model.span_logits(&short, false))?;
    let padded_logits = no_grad(|| model.span_logits(&padded, false))?;

    let valid = padded_logits.narrow(2, 0, 3).narrow(3, 0, 3);
    let upper = short_logits.triu(0);
    let difference = (upper - valid.triu(0)).abs().max().double_value(&[]);
    assert!(difference < 1e-3);
    Ok(())
}

#[test]
fn mismatched_hidden_sizes_are_rejected() {
    let vs = nn::VarStore::new(Device::Cpu);
    let config = GlobalPointerConfig {
        hidden_size: 64,
        ..tiny_head_config()
    };
    assert!(BertGlobalPointer::new(vs.root(), &tiny_bert_config(), &config).is_err());
}

#[test]
fn loss_decreases_with_adam() -> anyhow::Result<()> {
    tch::manual_seed(42);
    let device = Device::Cpu;
    let vs = nn::VarStore::new(device);
    let config = tiny_head_config();
    let head = EfficientGlobalPointer::new(vs.root(), &config)?;

    let hidden_states = Tensor::randn([2, 6, 32], (Kind::Float, device));
    let token_ids = Tensor::from_slice(&[3i64, 4, 5, 6, 7, 8, 3, 4, 5, 6, 0, 0]).view([2, 6]);
    let labels = Tensor::zeros([2, 3, 6, 6], (Kind::Float, device));
    let _ = labels.get(0).get(0).get(1).get(2).fill_(1.0);
    let _ = labels.get(0).get(2).get(4).get(4).fill_(1.0);
    let _ = labels.get(1).get(1).get(0).get(3).fill_(1.0);

    let mut optimizer = nn::Adam::default().build(&vs, 1e-2)?;
    let initial_loss =
        multilabel_categorical_crossentropy(&head.forward(&hidden_states, &token_ids)?, &labels)
            .double_value(&[]);
    assert!(initial_loss.is_finite());
    for _ in 0..30 {
        let logits = head.forward(&hidden_states, &token_ids)?;
        let loss = multilabel_categorical_crossentropy(&logits, &labels);
        optimizer.backward_step(&loss);
    }
    let final_loss =
        multilabel_categorical_crossentropy(&head.forward(&hidden_states, &token_ids)?, &labels)
            .double_value(&[]);

    assert!(final_loss.is_finite());
    assert!(final_loss < initial_loss);
    Ok(())
}
