//! Vocabulary and hand-assembled `LabelEncoder` pickles shared by the unit
//! and integration tests.
//!
//! The pickles are shaped like `pickle.dump(LabelEncoder().fit(classes))`
//! under the protocols scikit-learn models are commonly saved with.
#![allow(dead_code)]

use std::path::Path;

pub const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "food", "bank", "for", "animal",
    "shelter", "arts", "museum", "youth", "soccer", "league", "church", "health", "clinic",
    "school", "community", "##s", "and", "a", "of", "housing", "legal", "aid", ".", ",",
];

pub fn write_vocab(dir: &Path) {
    std::fs::write(dir.join("vocab.txt"), VOCAB.join("\n")).unwrap();
}

pub fn unicode(out: &mut Vec<u8>, s: &str) {
    out.push(b'X');
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

pub fn global(out: &mut Vec<u8>, module: &str, name: &str) {
    out.push(b'c');
    out.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
}

/// `SHORT_BINUNICODE` followed by `MEMOIZE`.
fn short(out: &mut Vec<u8>, s: &str) {
    out.push(0x8c);
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    out.push(0x94);
}

fn stack_global(out: &mut Vec<u8>, module: &str, name: &str) {
    short(out, module);
    short(out, name);
    out.extend_from_slice(&[0x93, 0x94]);
}

/// In-band bytes: `SHORT_BINBYTES` up to 255 bytes, `BINBYTES` above.
fn bytes(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() < 256 {
        out.push(b'C');
        out.push(data.len() as u8);
    } else {
        out.push(b'B');
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// `dtype(type_str, False, True)` with its `BUILD` state.
fn dtype(out: &mut Vec<u8>, type_str: &str, byte_order: &str, elsize: i32, protocol4: bool) {
    if protocol4 {
        stack_global(out, "numpy", "dtype");
        short(out, type_str);
    } else {
        global(out, "numpy", "dtype");
        unicode(out, type_str);
    }
    out.extend_from_slice(&[0x89, 0x88, 0x87, b'R', b'(', b'K', 3]);
    if protocol4 {
        short(out, byte_order);
    } else {
        unicode(out, byte_order);
    }
    out.extend_from_slice(b"NNN");
    out.push(b'J');
    out.extend_from_slice(&elsize.to_le_bytes());
    out.push(b'J');
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&[b'K', 8, b't', b'b']);
}

/// Fixed-width little-endian UCS-4 buffer, as NumPy stores `<U` arrays.
fn ucs4(classes: &[&str]) -> (usize, Vec<u8>) {
    let width = classes.iter().map(|c| c.chars().count()).max().unwrap_or(1);
    let mut buffer = Vec::new();
    for class in classes {
        let mut chars: Vec<u32> = class.chars().map(u32::from).collect();
        chars.resize(width, 0);
        for cp in chars {
            buffer.extend_from_slice(&cp.to_le_bytes());
        }
    }
    (width, buffer)
}

/// Protocol 2, object-dtype `classes_`.
pub fn label_encoder_protocol2(classes: &[&str]) -> Vec<u8> {
    let mut p = vec![0x80, 2];
    global(&mut p, "sklearn.preprocessing._label", "LabelEncoder");
    p.extend_from_slice(&[b'q', 0, b')', 0x81, b'q', 1, b'}', b'q', 2, b'(']);
    unicode(&mut p, "classes_");
    global(&mut p, "numpy.core.multiarray", "_reconstruct");
    global(&mut p, "numpy", "ndarray");
    p.extend_from_slice(&[b'K', 0, 0x85]);
    global(&mut p, "_codecs", "encode");
    unicode(&mut p, "b");
    unicode(&mut p, "latin1");
    p.extend_from_slice(&[0x86, b'R', 0x87, b'R', b'(', b'K', 1, b'M']);
    p.extend_from_slice(&(classes.len() as u16).to_le_bytes());
    p.push(0x85);
    dtype(&mut p, "O8", "|", -1, false);
    p.extend_from_slice(&[0x89, b']', b'(']);
    for class in classes {
        unicode(&mut p, class);
    }
    p.extend_from_slice(&[b'e', b't', b'b']);
    unicode(&mut p, "_sklearn_version");
    unicode(&mut p, "1.3.2");
    p.extend_from_slice(&[b'u', b'b', b'.']);
    p
}

/// Protocol 4 prefix up to the `classes_` key, then `_reconstruct(ndarray,
/// (0,), b'b')` and the opening of its state tuple.
fn protocol4_head(len: usize) -> Vec<u8> {
    let mut p = vec![0x80, 4, 0x95];
    p.extend_from_slice(&0u64.to_le_bytes());
    stack_global(&mut p, "sklearn.preprocessing._label", "LabelEncoder");
    p.extend_from_slice(&[b')', 0x81, 0x94, b'}', 0x94, b'(']);
    short(&mut p, "classes_");
    stack_global(&mut p, "numpy.core.multiarray", "_reconstruct");
    stack_global(&mut p, "numpy", "ndarray");
    p.extend_from_slice(&[b'K', 0, 0x85, 0x94]);
    bytes(&mut p, b"b");
    p.extend_from_slice(&[0x94, 0x87, 0x94, b'R', 0x94]);
    p.extend_from_slice(&[b'(', b'K', 1, b'M']);
    p.extend_from_slice(&(len as u16).to_le_bytes());
    p.extend_from_slice(&[0x85, 0x94]);
    p
}

fn protocol4_tail(p: &mut Vec<u8>) {
    p.extend_from_slice(&[b't', 0x94, b'b']);
    short(p, "_sklearn_version");
    short(p, "1.3.2");
    p.extend_from_slice(&[b'u', b'b', b'.']);
}

/// Protocol 4, `<U` dtype `classes_` with its buffer stored in-band as bytes.
pub fn label_encoder_protocol4_unicode(classes: &[&str]) -> Vec<u8> {
    let (width, buffer) = ucs4(classes);
    let mut p = protocol4_head(classes.len());
    dtype(&mut p, &format!("U{width}"), "<", (width * 4) as i32, true);
    p.push(0x89);
    bytes(&mut p, &buffer);
    p.push(0x94);
    protocol4_tail(&mut p);
    p
}

/// Protocol 4, object-dtype `classes_`.
pub fn label_encoder_protocol4_object(classes: &[&str]) -> Vec<u8> {
    let mut p = protocol4_head(classes.len());
    dtype(&mut p, "O8", "|", -1, true);
    p.extend_from_slice(&[0x89, b']', 0x94, b'(']);
    for class in classes {
        short(&mut p, class);
    }
    p.push(b'e');
    protocol4_tail(&mut p);
    p
}

/// Protocol 5, `<U` dtype `classes_` passed in-band through `_frombuffer`.
pub fn label_encoder_protocol5_unicode(classes: &[&str]) -> Vec<u8> {
    let (width, buffer) = ucs4(classes);
    let mut p = vec![0x80, 5, 0x95];
    p.extend_from_slice(&0u64.to_le_bytes());
    stack_global(&mut p, "sklearn.preprocessing._label", "LabelEncoder");
    p.extend_from_slice(&[b')', 0x81, 0x94, b'}', 0x94, b'(']);
    short(&mut p, "classes_");
    stack_global(&mut p, "numpy.core.numeric", "_frombuffer");
    p.push(b'(');
    p.push(0x8e);
    p.extend_from_slice(&(buffer.len() as u64).to_le_bytes());
    p.extend_from_slice(&buffer);
    dtype(&mut p, &format!("U{width}"), "<", (width * 4) as i32, true);
    p.extend_from_slice(&[b'K', classes.len() as u8, 0x85]);
    short(&mut p, "C");
    p.extend_from_slice(&[b't', b'R', 0x94, b'u', b'b', b'.']);
    p
}
