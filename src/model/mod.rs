mod bert;
mod config;

pub use bert::BertForSequenceClassification;
pub use config::{ClassifierConfig, Config};
