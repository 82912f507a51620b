//! Minimal unpickler for numpy object arrays.
//!
//! `np.save` writes `dtype=object` arrays as a pickled `ndarray`. Id arrays
//! saved that way are plain Python strings (occasionally ints or bytes), so
//! this reader only runs the opcodes such a stream uses and returns the
//! element list found in the array's `__setstate__` tuple. Classes are never
//! resolved or instantiated.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<PyValue>),
    Tuple(Vec<PyValue>),
    /// Dicts are kept opaque.
    Dict,
    Global(String, String),
    /// Result of REDUCE; `state` is filled by a later BUILD.
    Object {
        callable: Box<PyValue>,
        state: Option<Box<PyValue>>,
    },
    Mark,
}

impl fmt::Display for PyValue {
    /// Mirrors Python's `str()` for the scalar cases that show up in id arrays.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyValue::None => f.write_str("None"),
            PyValue::Bool(true) => f.write_str("True"),
            PyValue::Bool(false) => f.write_str("False"),
            PyValue::Int(i) => write!(f, "{i}"),
            PyValue::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            PyValue::Float(x) => write!(f, "{x}"),
            PyValue::Str(s) => f.write_str(s),
            PyValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            other => write!(f, "{other:?}"),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| format!("pickle truncated at offset {}", self.pos))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let mut a = [0u8; 8];
        a.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(a))
    }

    fn line(&mut self) -> Result<String, String> {
        let rest = &self.buf[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| "unterminated GLOBAL operand".to_string())?;
        let text = String::from_utf8_lossy(&rest[..nl]).into_owned();
        self.pos += nl + 1;
        Ok(text)
    }
}

struct Machine {
    stack: Vec<PyValue>,
    memo: Vec<Option<PyValue>>,
    /// Every memo write costs at least one opcode byte, so no valid index
    /// reaches the stream length.
    memo_limit: usize,
}

impl Machine {
    fn pop(&mut self) -> Result<PyValue, String> {
        self.stack.pop().ok_or_else(|| "pickle stack underflow".to_string())
    }

    fn top_mut(&mut self) -> Result<&mut PyValue, String> {
        self.stack.last_mut().ok_or_else(|| "pickle stack underflow".to_string())
    }

    /// Pop everything above the most recent MARK, discarding the mark.
    fn pop_to_mark(&mut self) -> Result<Vec<PyValue>, String> {
        let mark = self
            .stack
            .iter()
            .rposition(|v| matches!(v, PyValue::Mark))
            .ok_or_else(|| "MARK not found".to_string())?;
        let items = self.stack.split_off(mark + 1);
        self.stack.pop();
        Ok(items)
    }

    fn memo_put(&mut self, idx: usize) -> Result<(), String> {
        if idx >= self.memo_limit {
            return Err(format!("memo index {idx} out of range"));
        }
        let top = self.stack.last().cloned().ok_or_else(|| "memoize on empty stack".to_string())?;
        if self.memo.len() <= idx {
            self.memo.resize(idx + 1, None);
        }
        self.memo[idx] = Some(top);
        Ok(())
    }

    fn memo_get(&mut self, idx: usize) -> Result<(), String> {
        let value = self
            .memo
            .get(idx)
            .cloned()
            .flatten()
            .ok_or_else(|| format!("memo slot {idx} is empty"))?;
        self.stack.push(value);
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<PyValue>) -> Result<(), String> {
        match self.top_mut()? {
            PyValue::List(list) => {
                list.extend(items);
                Ok(())
            }
            other => Err(format!("APPEND target is not a list: {other:?}")),
        }
    }
}

fn signed_le(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut acc: i64 = if negative { -1 } else { 0 };
    for &b in bytes.iter().rev() {
        acc = (acc << 8) | b as i64;
    }
    acc
}

/// Run a pickle stream and return the object left by STOP.
pub fn unpickle(data: &[u8]) -> Result<PyValue, String> {
    let mut r = Reader { buf: data, pos: 0 };
    let mut m = Machine {
        stack: Vec::new(),
        memo: Vec::new(),
        memo_limit: data.len(),
    };

    loop {
        let op = r.u8()?;
        match op {
            0x80 => {
                r.u8()?;
            }
            0x95 => {
                r.u64()?;
            }
            b'.' => return m.pop(),
            b'(' => m.stack.push(PyValue::Mark),
            b'N' => m.stack.push(PyValue::None),
            0x88 => m.stack.push(PyValue::Bool(true)),
            0x89 => m.stack.push(PyValue::Bool(false)),
            b'K' => m.stack.push(PyValue::Int(r.u8()? as i64)),
            b'M' => m.stack.push(PyValue::Int(r.u16()? as i64)),
            b'J' => m.stack.push(PyValue::Int(r.u32()? as i32 as i64)),
            0x8a => {
                let n = r.u8()? as usize;
                if n > 8 {
                    return Err(format!("LONG1 of {n} bytes exceeds i64"));
                }
                m.stack.push(PyValue::Int(signed_le(r.take(n)?)));
            }
            b'G' => {
                let mut a = [0u8; 8];
                a.copy_from_slice(r.take(8)?);
                m.stack.push(PyValue::Float(f64::from_be_bytes(a)));
            }
            0x8c => {
                let n = r.u8()? as usize;
                m.stack.push(PyValue::Str(String::from_utf8_lossy(r.take(n)?).into_owned()));
            }
            b'X' => {
                let n = r.u32()? as usize;
                m.stack.push(PyValue::Str(String::from_utf8_lossy(r.take(n)?).into_owned()));
            }
            0x8d => {
                let n = r.u64()? as usize;
                m.stack.push(PyValue::Str(String::from_utf8_lossy(r.take(n)?).into_owned()));
            }
            b'C' | b'U' => {
                let n = r.u8()? as usize;
                m.stack.push(PyValue::Bytes(r.take(n)?.to_vec()));
            }
            b'B' | b'T' => {
                let n = r.u32()? as usize;
                m.stack.push(PyValue::Bytes(r.take(n)?.to_vec()));
            }
            0x8e => {
                let n = r.u64()? as usize;
                m.stack.push(PyValue::Bytes(r.take(n)?.to_vec()));
            }
            b'c' => {
                let module = r.line()?;
                let name = r.line()?;
                m.stack.push(PyValue::Global(module, name));
            }
            0x93 => {
                let name = m.pop()?.to_string();
                let module = m.pop()?.to_string();
                m.stack.push(PyValue::Global(module, name));
            }
            b')' => m.stack.push(PyValue::Tuple(Vec::new())),
            0x85 => {
                let a = m.pop()?;
                m.stack.push(PyValue::Tuple(vec![a]));
            }
            0x86 => {
                let b = m.pop()?;
                let a = m.pop()?;
                m.stack.push(PyValue::Tuple(vec![a, b]));
            }
            0x87 => {
                let c = m.pop()?;
                let b = m.pop()?;
                let a = m.pop()?;
                m.stack.push(PyValue::Tuple(vec![a, b, c]));
            }
            b't' => {
                let items = m.pop_to_mark()?;
                m.stack.push(PyValue::Tuple(items));
            }
            b']' => m.stack.push(PyValue::List(Vec::new())),
            b'l' => {
                let items = m.pop_to_mark()?;
                m.stack.push(PyValue::List(items));
            }
            b'a' => {
                let item = m.pop()?;
                m.extend_list(vec![item])?;
            }
            b'e' => {
                let items = m.pop_to_mark()?;
                m.extend_list(items)?;
            }
            b'}' => m.stack.push(PyValue::Dict),
            b'd' => {
                m.pop_to_mark()?;
                m.stack.push(PyValue::Dict);
            }
            b's' => {
                m.pop()?;
                m.pop()?;
            }
            b'u' => {
                m.pop_to_mark()?;
            }
            b'q' => {
                let idx = r.u8()? as usize;
                m.memo_put(idx)?;
            }
            b'r' => {
                let idx = r.u32()? as usize;
                m.memo_put(idx)?;
            }
            0x94 => {
                let idx = m.memo.len();
                m.memo_put(idx)?;
            }
            b'h' => {
                let idx = r.u8()? as usize;
                m.memo_get(idx)?;
            }
            b'j' => {
                let idx = r.u32()? as usize;
                m.memo_get(idx)?;
            }
            b'R' => {
                let _args = m.pop()?;
                let callable = m.pop()?;
                m.stack.push(PyValue::Object {
                    callable: Box::new(callable),
                    state: None,
                });
            }
            b'b' => {
                let new_state = m.pop()?;
                match m.top_mut()? {
                    PyValue::Object { state, .. } => *state = Some(Box::new(new_state)),
                    other => return Err(format!("BUILD target is not an object: {other:?}")),
                }
            }
            other => {
                return Err(format!(
                    "unsupported pickle opcode 0x{other:02x} at offset {}",
                    r.pos - 1
                ))
            }
        }
    }
}

/// Elements of a pickled object ndarray, in storage order.
pub fn object_array_elements(data: &[u8]) -> Result<Vec<PyValue>, String> {
    match unpickle(data)? {
        PyValue::Object {
            state: Some(state), ..
        } => match *state {
            PyValue::Tuple(mut fields) => match fields.pop() {
                Some(PyValue::List(items)) => Ok(items),
                other => Err(format!("ndarray state does not end with an element list: {other:?}")),
            },
            other => Err(format!("ndarray state is not a tuple: {other:?}")),
        },
        other => Err(format!("pickle does not hold a reconstructed ndarray: {other:?}")),
    }
}
