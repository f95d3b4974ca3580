//! Index ↔ NTEE label mapping, read from the fitted scikit-learn
//! `LabelEncoder` stored next to the model.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pickle::{self, Value};

/// NTEE taxonomy level the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Granularity {
    /// `bc`: broad category.
    #[default]
    #[serde(rename = "bc")]
    BroadCategory,
    /// `mg`: major group.
    #[serde(rename = "mg")]
    MajorGroup,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BroadCategory => "bc",
            Self::MajorGroup => "mg",
        }
    }

    /// File stem of the label-encoder artifact for this granularity.
    pub fn artifact_stem(&self) -> &'static str {
        match self {
            Self::BroadCategory => "le_broad_cat",
            Self::MajorGroup => "le_major_group",
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bc" => Ok(Self::BroadCategory),
            "mg" => Ok(Self::MajorGroup),
            other => Err(Error::InvalidGranularity(other.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered class labels; model output index `i` means `classes()[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonClasses {
    Bare(Vec<String>),
    Wrapped { classes: Vec<String> },
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::LabelEncoder("label encoder has no classes".to_string()));
        }
        Ok(Self { classes })
    }

    /// Loads `<stem>.pkl` from `model_dir`, or `<stem>.json` when no pickle
    /// is present.
    pub fn load(model_dir: &Path, granularity: Granularity) -> Result<Self> {
        let pkl = artifact_path(model_dir, granularity);
        let json = pkl.with_extension("json");
        let path = if !pkl.exists() && json.exists() {
            json
        } else {
            pkl
        };
        tracing::info!(path = %path.display(), %granularity, "loading label encoder");
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&bytes)
        } else {
            Self::from_pickle(&bytes)
        }
    }

    /// Accepts `["A", "B", …]` or `{"classes": ["A", "B", …]}`.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let parsed: JsonClasses = serde_json::from_slice(bytes)
            .map_err(|e| Error::LabelEncoder(format!("invalid label encoder JSON: {e}")))?;
        match parsed {
            JsonClasses::Bare(classes) | JsonClasses::Wrapped { classes } => Self::new(classes),
        }
    }

    pub fn from_pickle(bytes: &[u8]) -> Result<Self> {
        let root = pickle::from_slice(bytes)?;
        let classes = match root.state().and_then(|state| state.get("classes_")) {
            Some(classes) => classes,
            None if root.class_name().is_some() => {
                return Err(Error::LabelEncoder(format!(
                    "{} has no fitted classes_",
                    root.class_name().unwrap_or_default()
                )))
            }
            // A bare array or list pickled on its own.
            None => &root,
        };
        Self::new(decode_classes(classes)?)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Label for a model output index.
    pub fn inverse_transform(&self, index: usize) -> Result<&str> {
        self.classes.get(index).map(String::as_str).ok_or_else(|| {
            Error::LabelEncoder(format!(
                "index {index} out of range for {} classes",
                self.classes.len()
            ))
        })
    }
}

/// Converts the pickled `classes_` value into label strings.
fn decode_classes(value: &Value) -> Result<Vec<String>> {
    if let Some(items) = value.as_seq() {
        return items.iter().map(scalar_label).collect();
    }
    match value.class_name() {
        Some("_reconstruct") => decode_reconstructed(value),
        Some("_frombuffer") => decode_frombuffer(value),
        _ => Err(Error::LabelEncoder(format!(
            "classes_ is a {} ({}), expected a NumPy array",
            value.kind(),
            value.class_name().unwrap_or("?")
        ))),
    }
}

/// `ndarray.__reduce__` layout: `_reconstruct(ndarray, (0,), b'b')` followed
/// by `BUILD (version, shape, dtype, is_fortran, data)`.
fn decode_reconstructed(array: &Value) -> Result<Vec<String>> {
    let state = array
        .state()
        .and_then(Value::as_seq)
        .ok_or_else(|| Error::LabelEncoder("ndarray without state".to_string()))?;
    let state = match state {
        [_version, rest @ ..] if state.len() == 5 => rest,
        _ => state,
    };
    let [shape, dtype, _is_fortran, data] = state else {
        return Err(Error::LabelEncoder(format!(
            "unexpected ndarray state of {} items",
            state.len()
        )));
    };
    decode_array(shape, &DType::from_value(dtype)?, data)
}

/// Protocol 5 layout: `_frombuffer(buffer, dtype, shape, order)`.
fn decode_frombuffer(array: &Value) -> Result<Vec<String>> {
    match array.args().and_then(Value::as_seq) {
        Some([data, dtype, shape, ..]) => decode_array(shape, &DType::from_value(dtype)?, data),
        _ => Err(Error::LabelEncoder("malformed _frombuffer arguments".to_string())),
    }
}

fn decode_array(shape: &Value, dtype: &DType, data: &Value) -> Result<Vec<String>> {
    let len = match shape.as_seq() {
        Some([n]) => n
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Error::LabelEncoder("invalid array shape".to_string()))?,
        _ => {
            return Err(Error::LabelEncoder(
                "classes_ must be a one-dimensional array".to_string(),
            ))
        }
    };

    let labels = match (dtype.kind, data) {
        ('O', Value::List(items)) => items.iter().map(scalar_label).collect::<Result<Vec<_>>>()?,
        ('O', other) => {
            return Err(Error::LabelEncoder(format!(
                "object array data is a {}, expected a list",
                other.kind()
            )))
        }
        (_, Value::Bytes(bytes)) => dtype.decode_buffer(bytes)?,
        (_, other) => {
            return Err(Error::LabelEncoder(format!(
                "array data is a {}, expected bytes",
                other.kind()
            )))
        }
    };

    if labels.len() != len {
        return Err(Error::LabelEncoder(format!(
            "array shape says {len} classes, data holds {}",
            labels.len()
        )));
    }
    Ok(labels)
}

fn scalar_label(value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bytes(b) => String::from_utf8(b.clone())
            .map_err(|e| Error::LabelEncoder(format!("non UTF-8 label: {e}"))),
        // NumPy scalars inside object arrays: `scalar(dtype, raw_bytes)`.
        obj if obj.class_name() == Some("scalar") => match obj.args().and_then(Value::as_seq) {
            Some([dtype, Value::Bytes(raw)]) => {
                let mut labels = DType::from_value(dtype)?.decode_buffer(raw)?;
                labels
                    .pop()
                    .ok_or_else(|| Error::LabelEncoder("empty NumPy scalar".to_string()))
            }
            _ => Err(Error::LabelEncoder("malformed NumPy scalar".to_string())),
        },
        other => Err(Error::LabelEncoder(format!(
            "unsupported label type {}",
            other.kind()
        ))),
    }
}

/// The parts of a pickled `numpy.dtype` needed to slice a raw buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DType {
    kind: char,
    itemsize: usize,
    big_endian: bool,
}

impl DType {
    /// Reads `dtype('<U4', False, True)` plus its `BUILD` state
    /// `(3, '<', None, None, None, elsize, alignment, flags)`.
    fn from_value(value: &Value) -> Result<Self> {
        if value.class_name() != Some("dtype") {
            return Err(Error::LabelEncoder(format!(
                "expected numpy.dtype, found {}",
                value.kind()
            )));
        }
        let spec = value
            .args()
            .and_then(Value::as_seq)
            .and_then(|args| args.first())
            .and_then(Value::as_str)
            .ok_or_else(|| Error::LabelEncoder("dtype without type string".to_string()))?;
        let byte_order = value
            .state()
            .and_then(Value::as_seq)
            .and_then(|state| state.get(1))
            .and_then(Value::as_str)
            .unwrap_or("|");
        Self::parse(spec, byte_order)
    }

    fn parse(spec: &str, byte_order: &str) -> Result<Self> {
        let mut chars = spec.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::LabelEncoder("empty dtype".to_string()))?;
        let unsupported = || Error::LabelEncoder(format!("unsupported dtype '{spec}'"));
        let count: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        let itemsize = match (kind, count) {
            ('U', n) => n.checked_mul(4).ok_or_else(unsupported)?,
            ('i' | 'u', 1 | 2 | 4 | 8) => count,
            ('S' | 'O', n) => n,
            _ => return Err(unsupported()),
        };
        Ok(Self {
            kind,
            itemsize,
            big_endian: byte_order == ">",
        })
    }

    fn decode_buffer(&self, bytes: &[u8]) -> Result<Vec<String>> {
        if self.itemsize == 0 || bytes.len() % self.itemsize != 0 {
            return Err(Error::LabelEncoder(format!(
                "buffer of {} bytes is not a multiple of itemsize {}",
                bytes.len(),
                self.itemsize
            )));
        }
        bytes
            .chunks(self.itemsize)
            .map(|item| self.decode_item(item))
            .collect()
    }

    fn decode_item(&self, item: &[u8]) -> Result<String> {
        match self.kind {
            'U' => item
                .chunks(4)
                .map(|c| {
                    if self.big_endian {
                        BigEndian::read_u32(c)
                    } else {
                        LittleEndian::read_u32(c)
                    }
                })
                .take_while(|&cp| cp != 0)
                .map(|cp| {
                    char::from_u32(cp)
                        .ok_or_else(|| Error::LabelEncoder(format!("invalid code point {cp:#x}")))
                })
                .collect(),
            'S' => {
                let end = item.iter().position(|&b| b == 0).unwrap_or(item.len());
                String::from_utf8(item[..end].to_vec())
                    .map_err(|e| Error::LabelEncoder(format!("non UTF-8 label: {e}")))
            }
            'i' | 'u' => {
                let signed = self.kind == 'i';
                let n = item.len();
                let value = match (self.big_endian, signed) {
                    (false, true) => LittleEndian::read_int(item, n).to_string(),
                    (false, false) => LittleEndian::read_uint(item, n).to_string(),
                    (true, true) => BigEndian::read_int(item, n).to_string(),
                    (true, false) => BigEndian::read_uint(item, n).to_string(),
                };
                Ok(value)
            }
            kind => Err(Error::LabelEncoder(format!(
                "cannot decode dtype kind '{kind}' from a buffer"
            ))),
        }
    }
}

/// Path of the pickled encoder for `granularity` inside `model_dir`.
pub fn artifact_path(model_dir: &Path, granularity: Granularity) -> PathBuf {
    model_dir.join(format!("{}.pkl", granularity.artifact_stem()))
}
