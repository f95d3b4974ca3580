use std::collections::HashMap;
use std::path::Path;

use candle_transformers::models::bert::Config as BertConfig;
use serde::Deserialize;

use crate::error::{Error, Result};

/// `config.json` of a `BertForSequenceClassification` checkpoint.
#[derive(Debug, Clone)]
pub struct Config {
    pub bert_config: BertConfig,
    pub classifier_config: ClassifierConfig,
}

/// Classification-head fields that the BERT encoder config does not carry.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub id2label: HashMap<String, String>,
    pub num_labels: Option<usize>,
}

impl ClassifierConfig {
    /// Output width of the classification head.
    ///
    /// An explicit `num_labels` wins over the size of `id2label`.
    pub fn num_labels(&self) -> Option<usize> {
        self.num_labels
            .or_else(|| (!self.id2label.is_empty()).then_some(self.id2label.len()))
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&raw)
    }

    /// Both halves read the whole document, so shared keys such as
    /// `hidden_size` stay visible to each.
    pub fn from_json(raw: &str) -> Result<Self> {
        let bert_config: BertConfig = serde_json::from_str(raw)?;
        let classifier_config: ClassifierConfig = serde_json::from_str(raw)?;
        Ok(Self {
            bert_config,
            classifier_config,
        })
    }

    pub fn num_labels(&self) -> Result<usize> {
        match self.classifier_config.num_labels() {
            Some(0) | None => Err(Error::Config(
                "config.json declares neither num_labels nor id2label".to_string(),
            )),
            Some(n) => Ok(n),
        }
    }

    pub fn pad_token_id(&self) -> u32 {
        self.bert_config.pad_token_id as u32
    }
}
