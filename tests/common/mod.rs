//! Builds a tiny, randomly initialised BERT classifier directory on disk.

use std::io::Write;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use npoclass::model::{BertForSequenceClassification, Config};
use tempfile::TempDir;

pub mod fixtures;

use fixtures::{label_encoder_protocol2, VOCAB};

pub const BROAD_CATEGORIES: &[&str] = &["I", "II", "III", "IV", "IX", "V", "VI", "VII", "VIII", "X"];
pub const MAJOR_GROUPS: &[&str] = &["A", "B", "C", "D", "E", "F"];

fn config_json(num_labels: usize) -> String {
    let id2label: serde_json::Map<String, serde_json::Value> = (0..num_labels)
        .map(|i| (i.to_string(), format!("LABEL_{i}").into()))
        .collect();
    serde_json::json!({
        "architectures": ["BertForSequenceClassification"],
        "model_type": "bert",
        "vocab_size": VOCAB.len(),
        "hidden_size": 16,
        "num_hidden_layers": 2,
        "num_attention_heads": 2,
        "intermediate_size": 32,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "attention_probs_dropout_prob": 0.1,
        "max_position_embeddings": 512,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": true,
        "classifier_dropout": null,
        "id2label": id2label
    })
    .to_string()
}

fn write_weights(dir: &Path, num_labels: usize) {
    let config = Config::from_json(&config_json(num_labels)).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BertForSequenceClassification::load(vb, &config.bert_config, num_labels).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();
}

/// A model directory for `bc` with [`BROAD_CATEGORIES`] and a matching
/// `le_major_group.pkl` of the wrong width.
pub fn model_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();
    std::fs::write(path.join("config.json"), config_json(BROAD_CATEGORIES.len())).unwrap();
    fixtures::write_vocab(path);
    std::fs::write(
        path.join("le_broad_cat.pkl"),
        label_encoder_protocol2(BROAD_CATEGORIES),
    )
    .unwrap();
    std::fs::write(
        path.join("le_major_group.pkl"),
        label_encoder_protocol2(MAJOR_GROUPS),
    )
    .unwrap();
    write_weights(path, BROAD_CATEGORIES.len());
    dir
}

fn torch_int(out: &mut Vec<u8>, value: usize) {
    out.push(b'J');
    out.extend_from_slice(&(value as i32).to_le_bytes());
}

/// `name: _rebuild_tensor_v2(persistent_load(('storage', FloatStorage, key,
/// 'cpu', numel)), 0, size, stride, False, {})` for a contiguous tensor.
fn torch_tensor_entry(name: &str, key: &str, dims: &[usize], numel: usize) -> Vec<u8> {
    let mut p = Vec::new();
    fixtures::unicode(&mut p, name);
    fixtures::global(&mut p, "torch._utils", "_rebuild_tensor_v2");
    p.extend_from_slice(&[b'(', b'(']);
    fixtures::unicode(&mut p, "storage");
    fixtures::global(&mut p, "torch", "FloatStorage");
    fixtures::unicode(&mut p, key);
    fixtures::unicode(&mut p, "cpu");
    torch_int(&mut p, numel);
    p.extend_from_slice(&[b't', b'Q']);
    torch_int(&mut p, 0);

    p.push(b'(');
    for &dim in dims {
        torch_int(&mut p, dim);
    }
    p.push(b't');

    let mut strides = vec![0; dims.len()];
    let mut stride = 1;
    for (i, &dim) in dims.iter().enumerate().rev() {
        strides[i] = stride;
        stride *= dim;
    }
    p.push(b'(');
    for stride in strides {
        torch_int(&mut p, stride);
    }
    p.extend_from_slice(&[b't', b'K', 0, b'}', b't', b'R']);
    p
}

/// Replaces `model.safetensors` with the same weights in the `torch.save`
/// zip layout, as `pytorch_model.bin`.
pub fn convert_to_pytorch_checkpoint(dir: &Path) {
    let safetensors = dir.join("model.safetensors");
    let tensors = candle_core::safetensors::load(&safetensors, &Device::Cpu).unwrap();
    let mut names: Vec<&String> = tensors.keys().collect();
    names.sort();

    let file = std::fs::File::create(dir.join("pytorch_model.bin")).unwrap();
    let mut archive = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    let mut pickle = vec![0x80, 2, b'}', b'('];
    for (key, name) in names.into_iter().enumerate() {
        let tensor = &tensors[name];
        let data: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        archive
            .start_file(format!("archive/data/{key}"), options)
            .unwrap();
        for value in &data {
            archive.write_all(&value.to_le_bytes()).unwrap();
        }
        pickle.extend(torch_tensor_entry(name, &key.to_string(), tensor.dims(), data.len()));
    }
    pickle.extend_from_slice(&[b'u', b'.']);

    archive.start_file("archive/data.pkl", options).unwrap();
    archive.write_all(&pickle).unwrap();
    archive.finish().unwrap();
    std::fs::remove_file(safetensors).unwrap();
}
