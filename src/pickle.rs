//! Decoder for the subset of Python's pickle format that fitted
//! scikit-learn estimators are saved in.
//!
//! The decoder never executes anything. Globals stay symbolic, and calls
//! (`REDUCE`, `NEWOBJ`) become [`Value::Object`] nodes carrying the callable,
//! its arguments and any state attached by a later `BUILD`. The one call that
//! is evaluated is `_codecs.encode(text, "latin1")`, the way protocol 2 spells
//! a `bytes` literal.
//!
//! Protocols 0 through 5 are accepted as long as the stream sticks to plain
//! data, globals and object construction. Out-of-band buffers, persistent ids
//! and the extension registry are rejected.

use std::collections::HashMap;
use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

const HIGHEST_PROTOCOL: u8 = 5;

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const REDUCE: u8 = b'R';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';

    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    pub const BYTEARRAY8: u8 = 0x96;
    pub const NEXT_BUFFER: u8 = 0x97;
    pub const READONLY_BUFFER: u8 = 0x98;
}

/// A decoded pickle value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Global {
        module: String,
        name: String,
    },
    Object {
        callable: Box<Value>,
        args: Box<Value>,
        state: Option<Box<Value>>,
    },
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Items of a tuple or list.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Self::Tuple(items) | Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a string key in a dict.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Name of the global this object was constructed from, if any.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::Object { callable, .. } => match callable.as_ref() {
                Self::Global { name, .. } => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn args(&self) -> Option<&Value> {
        match self {
            Self::Object { args, .. } => Some(args),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<&Value> {
        match self {
            Self::Object { state, .. } => state.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Global { .. } => "global",
            Self::Object { .. } => "object",
        }
    }
}

/// Decodes a complete pickle stream.
pub fn from_slice(bytes: &[u8]) -> Result<Value> {
    Machine::new(bytes).run()
}

fn truncated(_: std::io::Error) -> Error {
    Error::Pickle("unexpected end of stream".to_string())
}

struct Machine<'a> {
    input: Cursor<&'a [u8]>,
    stack: Vec<Value>,
    marks: Vec<usize>,
    // Entries are snapshots taken at PUT time. Estimator pickles never
    // mutate a container after fetching it back from the memo.
    memo: HashMap<u32, Value>,
}

impl<'a> Machine<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            input: Cursor::new(bytes),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value> {
        loop {
            let opcode = self.input.read_u8().map_err(truncated)?;
            match opcode {
                op::STOP => break,
                op::PROTO => {
                    let proto = self.input.read_u8().map_err(truncated)?;
                    if proto > HIGHEST_PROTOCOL {
                        return Err(Error::Pickle(format!(
                            "unsupported protocol {proto}"
                        )));
                    }
                }
                op::FRAME => {
                    // Frames only hint at buffering; the payload follows inline.
                    self.input.read_u64::<LittleEndian>().map_err(truncated)?;
                }
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    self.pop()?;
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }

                op::NONE => self.stack.push(Value::None),
                op::NEWTRUE => self.stack.push(Value::Bool(true)),
                op::NEWFALSE => self.stack.push(Value::Bool(false)),
                op::INT => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        other => Value::Int(parse_int(other)?),
                    };
                    self.stack.push(value);
                }
                op::LONG => {
                    let line = self.read_line()?;
                    let value = parse_int(line.trim_end_matches('L'))?;
                    self.stack.push(Value::Int(value));
                }
                op::BININT => {
                    let v = self.input.read_i32::<LittleEndian>().map_err(truncated)?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                op::BININT1 => {
                    let v = self.input.read_u8().map_err(truncated)?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                op::BININT2 => {
                    let v = self.input.read_u16::<LittleEndian>().map_err(truncated)?;
                    self.stack.push(Value::Int(i64::from(v)));
                }
                op::LONG1 => {
                    let len = usize::from(self.input.read_u8().map_err(truncated)?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Int(decode_long(&bytes)?));
                }
                op::LONG4 => {
                    let len = self.read_len_i32()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Int(decode_long(&bytes)?));
                }
                op::FLOAT => {
                    let line = self.read_line()?;
                    let v = line
                        .parse::<f64>()
                        .map_err(|_| Error::Pickle(format!("invalid float literal {line:?}")))?;
                    self.stack.push(Value::Float(v));
                }
                op::BINFLOAT => {
                    let v = self.input.read_f64::<BigEndian>().map_err(truncated)?;
                    self.stack.push(Value::Float(v));
                }

                op::SHORT_BINUNICODE => {
                    let len = usize::from(self.input.read_u8().map_err(truncated)?);
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::Str(s));
                }
                op::BINUNICODE => {
                    let len = self.input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::Str(s));
                }
                op::BINUNICODE8 => {
                    let len = self.read_len_u64()?;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::Str(s));
                }
                op::UNICODE => {
                    let line = self.read_line()?;
                    self.stack.push(Value::Str(line));
                }
                op::SHORT_BINSTRING => {
                    let len = usize::from(self.input.read_u8().map_err(truncated)?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(latin1(&bytes)));
                }
                op::BINSTRING => {
                    let len = self.read_len_i32()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Str(latin1(&bytes)));
                }
                op::SHORT_BINBYTES => {
                    let len = usize::from(self.input.read_u8().map_err(truncated)?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Bytes(bytes));
                }
                op::BINBYTES => {
                    let len = self.input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Bytes(bytes));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let len = self.read_len_u64()?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Bytes(bytes));
                }
                op::READONLY_BUFFER => {
                    self.top()?;
                }

                op::EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(opcode - op::TUPLE1 + 1);
                    let items = self.pop_n(n)?;
                    self.stack.push(Value::Tuple(items));
                }
                op::EMPTY_LIST => self.stack.push(Value::List(Vec::new())),
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                op::APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                op::EMPTY_DICT => self.stack.push(Value::Dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark()?;
                    let entries = pairs(items)?;
                    self.stack.push(Value::Dict(entries));
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.extend_dict(vec![(key, value)])?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    self.extend_dict(pairs(items)?)?;
                }
                op::EMPTY_SET => self.stack.push(Value::Set(Vec::new())),
                op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    match self.top_mut()? {
                        Value::Set(set) => set.extend(items),
                        other => {
                            return Err(Error::Pickle(format!(
                                "ADDITEMS on {}",
                                other.kind()
                            )))
                        }
                    }
                }
                op::FROZENSET => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Set(items));
                }

                op::GLOBAL => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.stack.push(Value::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.stack.push(Value::Global { module, name })
                        }
                        (m, n) => {
                            return Err(Error::Pickle(format!(
                                "STACK_GLOBAL expects two str, got {} and {}",
                                m.kind(),
                                n.kind()
                            )))
                        }
                    }
                }
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.stack.push(reduce(callable, args)?);
                }
                op::NEWOBJ => {
                    let args = self.pop()?;
                    let cls = self.pop()?;
                    self.stack.push(Value::Object {
                        callable: Box::new(cls),
                        args: Box::new(args),
                        state: None,
                    });
                }
                op::NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let args = self.pop()?;
                    let cls = self.pop()?;
                    self.stack.push(Value::Object {
                        callable: Box::new(cls),
                        args: Box::new(args),
                        state: None,
                    });
                }
                op::BUILD => {
                    let new_state = self.pop()?;
                    match self.top_mut()? {
                        Value::Object { state, .. } => *state = Some(Box::new(new_state)),
                        other => {
                            return Err(Error::Pickle(format!("BUILD on {}", other.kind())))
                        }
                    }
                }

                op::PUT => {
                    let line = self.read_line()?;
                    let key = parse_memo_key(&line)?;
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                op::BINPUT => {
                    let key = u32::from(self.input.read_u8().map_err(truncated)?);
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                op::LONG_BINPUT => {
                    let key = self.input.read_u32::<LittleEndian>().map_err(truncated)?;
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                op::MEMOIZE => {
                    let key = self.memo.len() as u32;
                    let top = self.top()?.clone();
                    self.memo.insert(key, top);
                }
                op::GET => {
                    let line = self.read_line()?;
                    let key = parse_memo_key(&line)?;
                    self.push_memo(key)?;
                }
                op::BINGET => {
                    let key = u32::from(self.input.read_u8().map_err(truncated)?);
                    self.push_memo(key)?;
                }
                op::LONG_BINGET => {
                    let key = self.input.read_u32::<LittleEndian>().map_err(truncated)?;
                    self.push_memo(key)?;
                }

                op::NEXT_BUFFER => {
                    return Err(Error::Pickle(
                        "out-of-band buffers are not supported".to_string(),
                    ))
                }
                other => {
                    return Err(Error::Pickle(format!(
                        "unsupported opcode 0x{other:02x} at offset {}",
                        self.input.position() - 1
                    )))
                }
            }
        }

        if !self.marks.is_empty() {
            return Err(Error::Pickle("unterminated MARK at STOP".to_string()));
        }
        match self.stack.len() {
            1 => self.pop(),
            n => Err(Error::Pickle(format!(
                "expected one value on the stack at STOP, found {n}"
            ))),
        }
    }

    fn pop(&mut self) -> Result<Value> {
        if self.marks.last().is_some_and(|&m| m >= self.stack.len()) {
            return Err(Error::Pickle("pop across MARK".to_string()));
        }
        self.stack
            .pop()
            .ok_or_else(|| Error::Pickle("stack underflow".to_string()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() < floor + n {
            return Err(Error::Pickle("stack underflow".to_string()));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| Error::Pickle("no MARK on the stack".to_string()))?;
        Ok(self.stack.split_off(mark))
    }

    fn top(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| Error::Pickle("stack underflow".to_string()))
    }

    fn top_mut(&mut self) -> Result<&mut Value> {
        self.stack
            .last_mut()
            .ok_or_else(|| Error::Pickle("stack underflow".to_string()))
    }

    fn extend_list(&mut self, items: Vec<Value>) -> Result<()> {
        match self.top_mut()? {
            Value::List(list) => {
                list.extend(items);
                Ok(())
            }
            other => Err(Error::Pickle(format!("APPEND on {}", other.kind()))),
        }
    }

    fn extend_dict(&mut self, entries: Vec<(Value, Value)>) -> Result<()> {
        match self.top_mut()? {
            Value::Dict(dict) => {
                dict.extend(entries);
                Ok(())
            }
            other => Err(Error::Pickle(format!("SETITEM on {}", other.kind()))),
        }
    }

    fn push_memo(&mut self, key: u32) -> Result<()> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Pickle(format!("memo key {key} not found")))?;
        self.stack.push(value);
        Ok(())
    }

    fn remaining(&self) -> usize {
        let len = self.input.get_ref().len() as u64;
        len.saturating_sub(self.input.position()) as usize
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(truncated(std::io::ErrorKind::UnexpectedEof.into()));
        }
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf).map_err(truncated)?;
        Ok(buf)
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|e| Error::Pickle(format!("invalid UTF-8 string: {e}")))
    }

    fn read_len_i32(&mut self) -> Result<usize> {
        let len = self.input.read_i32::<LittleEndian>().map_err(truncated)?;
        usize::try_from(len).map_err(|_| Error::Pickle(format!("negative length {len}")))
    }

    fn read_len_u64(&mut self) -> Result<usize> {
        let len = self.input.read_u64::<LittleEndian>().map_err(truncated)?;
        usize::try_from(len).map_err(|_| Error::Pickle(format!("length {len} out of range")))
    }

    fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        self.input.read_until(b'\n', &mut buf).map_err(truncated)?;
        if buf.pop() != Some(b'\n') {
            return Err(truncated(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|e| Error::Pickle(format!("invalid text line: {e}")))
    }
}

fn reduce(callable: Value, args: Value) -> Result<Value> {
    if let Value::Global { module, name } = &callable {
        if module == "_codecs" && name == "encode" {
            if let Some([Value::Str(text), Value::Str(encoding)]) = args.as_seq() {
                if encoding == "latin1" || encoding == "latin-1" {
                    return encode_latin1(text).map(Value::Bytes);
                }
            }
        }
    }
    Ok(Value::Object {
        callable: Box::new(callable),
        args: Box::new(args),
        state: None,
    })
}

fn encode_latin1(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| Error::Pickle(format!("character {c:?} is not latin-1")))
        })
        .collect()
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(Error::Pickle("odd number of items for dict".to_string()));
    }
    let mut entries = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        entries.push((k, v));
    }
    Ok(entries)
}

/// Little-endian two's complement, as written by `LONG1`/`LONG4`.
fn decode_long(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(Error::Pickle(format!(
            "integer of {} bytes does not fit in i64",
            bytes.len()
        )));
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(LittleEndian::read_i64(&buf))
}

fn parse_int(text: &str) -> Result<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| Error::Pickle(format!("invalid integer literal {text:?}")))
}

fn parse_memo_key(text: &str) -> Result<u32> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| Error::Pickle(format!("invalid memo key {text:?}")))
}
