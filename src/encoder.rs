//! Text → fixed-length BERT inputs.

use std::path::Path;

use serde::Deserialize;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::error::{Error, Result};

/// Every input is padded or truncated to this many tokens.
pub const MAX_SEQ_LEN: usize = 256;

const PAD_TOKEN: &str = "[PAD]";
const UNK_TOKEN: &str = "[UNK]";
const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";

/// One string or an ordered list of strings to classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Single(String),
    Batch(Vec<String>),
}

impl Input {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Single(text) => vec![text.as_str()],
            Self::Batch(texts) => texts.iter().map(String::as_str).collect(),
        }
    }
}

impl From<String> for Input {
    fn from(text: String) -> Self {
        Self::Single(text)
    }
}

impl From<&str> for Input {
    fn from(text: &str) -> Self {
        Self::Single(text.to_string())
    }
}

impl From<Vec<String>> for Input {
    fn from(texts: Vec<String>) -> Self {
        Self::Batch(texts)
    }
}

impl From<Vec<&str>> for Input {
    fn from(texts: Vec<&str>) -> Self {
        Self::Batch(texts.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Input {
    fn from(texts: &[&str]) -> Self {
        Self::Batch(texts.iter().map(|t| t.to_string()).collect())
    }
}

/// Aligned token-id and attention-mask rows, one per input, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_masks: Vec<Vec<u32>>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TokenizerConfig {
    #[serde(default = "default_lower_case")]
    do_lower_case: bool,
}

fn default_lower_case() -> bool {
    true
}

/// Wraps the checkpoint's tokenizer with fixed 256-token padding and
/// truncation.
pub struct Encoder {
    tokenizer: Tokenizer,
}

impl Encoder {
    /// Loads `tokenizer.json` from `model_dir`, or builds a BERT WordPiece
    /// tokenizer from `vocab.txt` when the fast tokenizer file is absent.
    pub fn load(model_dir: &Path, pad_id: u32) -> Result<Self> {
        let fast = model_dir.join("tokenizer.json");
        let mut tokenizer = if fast.exists() {
            tracing::info!(path = %fast.display(), "loading tokenizer");
            Tokenizer::from_file(&fast)?
        } else {
            Self::from_vocab(model_dir)?
        };

        let pad_token = tokenizer
            .id_to_token(pad_id)
            .unwrap_or_else(|| PAD_TOKEN.to_string());
        tokenizer
            .with_padding(Some(PaddingParams {
                strategy: PaddingStrategy::Fixed(MAX_SEQ_LEN),
                pad_id,
                pad_token,
                ..Default::default()
            }))
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))?;
        Ok(Self { tokenizer })
    }

    fn from_vocab(model_dir: &Path) -> Result<Tokenizer> {
        let vocab = model_dir.join("vocab.txt");
        if !vocab.exists() {
            return Err(Error::io(
                &vocab,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "neither tokenizer.json nor vocab.txt found",
                ),
            ));
        }
        let lower_case = Self::lower_case(model_dir)?;
        tracing::info!(path = %vocab.display(), lower_case, "building WordPiece tokenizer");

        let vocab_path = vocab.to_string_lossy().into_owned();
        let wordpiece = WordPiece::from_file(&vocab_path)
            .unk_token(UNK_TOKEN.to_string())
            .build()?;
        let mut tokenizer = Tokenizer::new(wordpiece);
        let special = |token: &str| {
            tokenizer.token_to_id(token).ok_or_else(|| {
                Error::Tokenizer(format!("vocab.txt has no {token} token").into())
            })
        };
        let sep = (SEP_TOKEN.to_string(), special(SEP_TOKEN)?);
        let cls = (CLS_TOKEN.to_string(), special(CLS_TOKEN)?);

        tokenizer
            .with_normalizer(Some(BertNormalizer::new(true, true, None, lower_case)))
            .with_pre_tokenizer(Some(BertPreTokenizer))
            .with_post_processor(Some(BertProcessing::new(sep, cls)));
        Ok(tokenizer)
    }

    fn lower_case(model_dir: &Path) -> Result<bool> {
        let path = model_dir.join("tokenizer_config.json");
        if !path.exists() {
            return Ok(true);
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let config: TokenizerConfig = serde_json::from_str(&raw)?;
        Ok(config.do_lower_case)
    }

    /// `[CLS] text [SEP]`, padded/truncated to [`MAX_SEQ_LEN`]. Empty text
    /// is a valid input.
    pub fn encode(&self, input: &Input) -> Result<EncodedBatch> {
        let encodings = self.tokenizer.encode_batch(input.texts(), true)?;
        Ok(EncodedBatch {
            input_ids: encodings.iter().map(|e| e.get_ids().to_vec()).collect(),
            attention_masks: encodings
                .iter()
                .map(|e| e.get_attention_mask().to_vec())
                .collect(),
        })
    }
}
