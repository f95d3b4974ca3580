use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::device;
use crate::encoder::{EncodedBatch, Encoder, Input, MAX_SEQ_LEN};
use crate::error::{Error, Result};
use crate::label_encoder::{Granularity, LabelEncoder};
use crate::model::{BertForSequenceClassification, Config};
use crate::prediction::{postprocess, Prediction};

/// Inputs per forward pass.
pub const BATCH_SIZE: usize = 32;

/// Fine-tuned classifier, tokenizer and label encoder loaded from one model
/// directory and bound to one device.
pub struct ModelBundle {
    model: BertForSequenceClassification,
    encoder: Encoder,
    labels: LabelEncoder,
    device: Device,
}

impl ModelBundle {
    pub fn load<P: AsRef<Path>>(
        path: P,
        granularity: Granularity,
        device: Device,
    ) -> Result<Self> {
        let dir = path.as_ref();

        let config = Config::from_file(&dir.join("config.json"))?;
        let num_labels = config.num_labels()?;

        let labels = LabelEncoder::load(dir, granularity)?;
        if labels.len() != num_labels {
            return Err(Error::LabelEncoder(format!(
                "{} has {} classes but the model predicts {num_labels} labels",
                granularity.artifact_stem(),
                labels.len()
            )));
        }

        let encoder = Encoder::load(dir, config.pad_token_id())?;

        let vb = Self::weights(dir, &device)?;
        let model = BertForSequenceClassification::load(vb, &config.bert_config, num_labels)?;

        Ok(Self {
            model,
            encoder,
            labels,
            device,
        })
    }

    /// Memory-maps `model.safetensors`, or reads `pytorch_model.bin` when
    /// the checkpoint was saved in the PyTorch format.
    fn weights(dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
        let safetensors = dir.join("model.safetensors");
        if safetensors.exists() {
            tracing::info!(path = %safetensors.display(), "loading classifier weights");
            // SAFETY: the safetensors file is memory-mapped and must not change
            // while the model is alive.
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[&safetensors], DType::F32, device)
            }?;
            return Ok(vb);
        }

        let pth = dir.join("pytorch_model.bin");
        if pth.exists() {
            tracing::info!(path = %pth.display(), "loading classifier weights");
            return Ok(VarBuilder::from_pth(&pth, DType::F32, device)?);
        }

        Err(Error::io(
            &safetensors,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "neither model.safetensors nor pytorch_model.bin found",
            ),
        ))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Encodes, predicts in batches of [`BATCH_SIZE`], and packages one
    /// prediction per input in input order.
    pub fn classify(&self, input: &Input) -> Result<Vec<Prediction>> {
        device::seed(&self.device)?;

        tracing::debug!(inputs = input.len(), "encoding inputs");
        let encoded = self.encoder.encode(input)?;
        let probabilities = self.predict(&encoded)?;
        postprocess(probabilities, &self.labels)
    }

    /// Sigmoid probabilities for every encoded row, in row order.
    fn predict(&self, encoded: &EncodedBatch) -> Result<Vec<Vec<f32>>> {
        let batches = encoded.len().div_ceil(BATCH_SIZE);
        let mut probabilities = Vec::with_capacity(encoded.len());

        for (i, (ids, masks)) in encoded
            .input_ids
            .chunks(BATCH_SIZE)
            .zip(encoded.attention_masks.chunks(BATCH_SIZE))
            .enumerate()
        {
            tracing::debug!(batch = i + 1, of = batches, size = ids.len(), "predicting");
            let input_ids = self.to_tensor(ids)?;
            let attention_mask = self.to_tensor(masks)?;
            let token_type_ids = input_ids.zeros_like()?;

            let logits = self
                .model
                .forward(&input_ids, &token_type_ids, &attention_mask)?;
            let probs = candle_nn::ops::sigmoid(&logits)?;
            probabilities.extend(probs.to_vec2::<f32>()?);
        }

        Ok(probabilities)
    }

    fn to_tensor(&self, rows: &[Vec<u32>]) -> Result<Tensor> {
        let flat: Vec<u32> = rows.iter().flatten().copied().collect();
        Ok(Tensor::from_vec(flat, (rows.len(), MAX_SEQ_LEN), &self.device)?)
    }
}
