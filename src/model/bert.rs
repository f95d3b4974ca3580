use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};

/// `tanh(W · h[CLS] + b)`, the pooled representation BERT feeds its heads.
#[derive(Clone)]
struct BertPooler {
    dense: Linear,
}

impl BertPooler {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let dense = linear(config.hidden_size, config.hidden_size, vb.pp("dense"))?;
        Ok(Self { dense })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let cls = hidden_states.i((.., 0))?;
        self.dense.forward(&cls)?.tanh()
    }
}

/// BERT encoder with pooler and linear classification head, laid out like a
/// `BertForSequenceClassification` checkpoint (`bert.*`, `classifier.*`).
///
/// Dropout only matters during training and is not part of the forward pass.
pub struct BertForSequenceClassification {
    bert: BertModel,
    pooler: BertPooler,
    classifier: Linear,
}

impl BertForSequenceClassification {
    pub fn load(vb: VarBuilder, config: &BertConfig, num_labels: usize) -> Result<Self> {
        let pooler = BertPooler::load(vb.pp("bert").pp("pooler"), config)?;
        let classifier = linear(config.hidden_size, num_labels, vb.pp("classifier"))?;
        let bert = BertModel::load(vb.pp("bert"), config)?;
        Ok(Self {
            bert,
            pooler,
            classifier,
        })
    }

    /// Returns `(batch, num_labels)` logits.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        let hidden_states = self
            .bert
            .forward(input_ids, token_type_ids, Some(attention_mask))?;
        let pooled = self.pooler.forward(&hidden_states)?;
        self.classifier.forward(&pooled)
    }
}
