//! NTEE category classification of nonprofit descriptions with a
//! fine-tuned BERT sequence classifier.
//!
//! ```no_run
//! use npoclass::{ClassifyOptions, NpoClass};
//!
//! let classifier = NpoClass::new();
//! let options = ClassifyOptions::new(true, "npoclass_model/", "bc")?;
//! let predictions = classifier.classify("Community food bank serving families", &options)?;
//! println!("{} ({})", predictions[0].recommended, predictions[0].confidence);
//! # Ok::<(), npoclass::Error>(())
//! ```

pub mod classifier;
pub mod context;
pub mod device;
pub mod encoder;
pub mod error;
pub mod label_encoder;
pub mod model;
pub mod pickle;
pub mod prediction;

#[cfg(test)]
#[path = "../tests/common/fixtures.rs"]
mod fixtures;

pub use classifier::{ModelBundle, BATCH_SIZE};
pub use context::{ClassifyOptions, NpoClass, DEFAULT_MODEL_PATH};
pub use encoder::{Input, MAX_SEQ_LEN};
pub use error::{Error, Result};
pub use label_encoder::{Granularity, LabelEncoder};
pub use prediction::{Confidence, Prediction};
