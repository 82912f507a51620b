//! `.npy` array decoding.
//!
//! Supports format versions 1-3, either byte order, C or Fortran layout, and
//! the dtypes factor exports actually use: floats, integers, booleans, fixed
//! width byte and unicode strings, and pickled object arrays.

use crate::error::{RecoError, Result};
use crate::pickle;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Decoded element storage. Numeric arrays are widened; text arrays are kept
/// as strings so ids survive without precision loss.
#[derive(Debug, Clone, PartialEq)]
pub enum NpyData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl NpyData {
    pub fn len(&self) -> usize {
        match self {
            NpyData::Float(v) => v.len(),
            NpyData::Int(v) => v.len(),
            NpyData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub descr: String,
    pub shape: Vec<usize>,
    /// Always in C (row-major) order, whatever the file used.
    pub data: NpyData,
}

impl NdArray {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Numeric view as `f64`; `None` for text arrays.
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        match &self.data {
            NpyData::Float(v) => Some(v.clone()),
            NpyData::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            NpyData::Text(_) => None,
        }
    }

    /// Every element rendered as text, the way Python's `str()` would.
    pub fn to_text(&self) -> Vec<String> {
        match &self.data {
            NpyData::Text(v) => v.clone(),
            NpyData::Int(v) => v.iter().map(i64::to_string).collect(),
            NpyData::Float(v) => v
                .iter()
                .map(|x| pickle::PyValue::Float(*x).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Signed,
    Unsigned,
    Bool,
    Bytes,
    Unicode,
    Object,
}

#[derive(Debug, Clone, Copy)]
struct Dtype {
    endian: Endian,
    kind: Kind,
    size: usize,
}

fn parse_descr(descr: &str) -> std::result::Result<Dtype, String> {
    let mut chars = descr.chars();
    let (endian, rest) = match chars.next() {
        Some('<') | Some('|') | Some('=') => (Endian::Little, chars.as_str()),
        Some('>') => (Endian::Big, chars.as_str()),
        Some(_) => (Endian::Little, descr),
        None => return Err("empty dtype descriptor".into()),
    };
    let mut rest_chars = rest.chars();
    let kind = match rest_chars.next() {
        Some('f') => Kind::Float,
        Some('i') => Kind::Signed,
        Some('u') => Kind::Unsigned,
        Some('b') => Kind::Bool,
        Some('S') | Some('a') => Kind::Bytes,
        Some('U') => Kind::Unicode,
        Some('O') => Kind::Object,
        _ => return Err(format!("unsupported dtype `{descr}`")),
    };
    let size_txt = rest_chars.as_str();
    let size = if kind == Kind::Object && size_txt.is_empty() {
        8
    } else {
        size_txt
            .parse::<usize>()
            .map_err(|_| format!("unsupported dtype `{descr}`"))?
    };

    let supported = match kind {
        Kind::Float => matches!(size, 4 | 8),
        Kind::Signed | Kind::Unsigned => matches!(size, 1 | 2 | 4 | 8),
        Kind::Bool => size == 1,
        Kind::Bytes | Kind::Unicode => true,
        Kind::Object => true,
    };
    if !supported {
        return Err(format!("unsupported dtype `{descr}`"));
    }
    Ok(Dtype { endian, kind, size })
}

struct Header {
    descr: String,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Value text following `'key':` in the header dict literal.
fn dict_value<'h>(header: &'h str, key: &str) -> Option<&'h str> {
    let needle = format!("'{key}'");
    let start = header.find(&needle)? + needle.len();
    let rest = header[start..].trim_start();
    Some(rest.strip_prefix(':')?.trim_start())
}

fn parse_header(header: &str) -> std::result::Result<Header, String> {
    let descr_raw = dict_value(header, "descr").ok_or("header has no 'descr'")?;
    let quote = descr_raw
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or("structured dtypes are not supported")?;
    let descr_body = &descr_raw[1..];
    let end = descr_body.find(quote).ok_or("unterminated 'descr'")?;
    let descr = descr_body[..end].to_string();

    let fortran_raw = dict_value(header, "fortran_order").ok_or("header has no 'fortran_order'")?;
    let fortran_order = if fortran_raw.starts_with("True") {
        true
    } else if fortran_raw.starts_with("False") {
        false
    } else {
        return Err(format!("bad 'fortran_order' value: {fortran_raw}"));
    };

    let shape_raw = dict_value(header, "shape").ok_or("header has no 'shape'")?;
    let shape_body = shape_raw
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or("bad 'shape' tuple")?;
    let shape = shape_body
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("bad 'shape' tuple: {e}"))?;

    Ok(Header {
        descr,
        fortran_order,
        shape,
    })
}

fn read_uint(bytes: &[u8], endian: Endian) -> u64 {
    let mut acc = 0u64;
    match endian {
        Endian::Little => {
            for &b in bytes.iter().rev() {
                acc = (acc << 8) | b as u64;
            }
        }
        Endian::Big => {
            for &b in bytes {
                acc = (acc << 8) | b as u64;
            }
        }
    }
    acc
}

fn read_int(bytes: &[u8], endian: Endian) -> i64 {
    let raw = read_uint(bytes, endian);
    let bits = bytes.len() * 8;
    if bits >= 64 {
        raw as i64
    } else {
        // sign-extend
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    }
}

fn decode_elements(dtype: Dtype, body: &[u8], count: usize) -> std::result::Result<NpyData, String> {
    if dtype.kind == Kind::Object {
        let items = pickle::object_array_elements(body)?;
        if items.len() != count {
            return Err(format!("object array holds {} elements, shape implies {count}", items.len()));
        }
        return Ok(NpyData::Text(items.iter().map(ToString::to_string).collect()));
    }

    let elem = match dtype.kind {
        Kind::Unicode => dtype.size * 4,
        _ => dtype.size,
    };
    if elem == 0 {
        return Ok(NpyData::Text(vec![String::new(); count]));
    }
    let needed = count.checked_mul(elem).ok_or("array size overflows")?;
    if body.len() < needed {
        return Err(format!("data section has {} bytes, expected {needed}", body.len()));
    }
    let chunks = body[..needed].chunks_exact(elem);

    let data = match dtype.kind {
        Kind::Float => NpyData::Float(
            chunks
                .map(|c| {
                    let bits = read_uint(c, dtype.endian);
                    if dtype.size == 4 {
                        f32::from_bits(bits as u32) as f64
                    } else {
                        f64::from_bits(bits)
                    }
                })
                .collect(),
        ),
        Kind::Signed => NpyData::Int(chunks.map(|c| read_int(c, dtype.endian)).collect()),
        Kind::Unsigned => NpyData::Int(chunks.map(|c| read_uint(c, dtype.endian) as i64).collect()),
        Kind::Bool => NpyData::Int(chunks.map(|c| (c[0] != 0) as i64).collect()),
        Kind::Bytes => NpyData::Text(
            chunks
                .map(|c| {
                    let end = c.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    String::from_utf8_lossy(&c[..end]).into_owned()
                })
                .collect(),
        ),
        Kind::Unicode => NpyData::Text(
            chunks
                .map(|c| {
                    c.chunks_exact(4)
                        .map(|cp| read_uint(cp, dtype.endian) as u32)
                        .take_while(|&cp| cp != 0)
                        .map(|cp| char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect()
                })
                .collect(),
        ),
        Kind::Object => unreachable!("object arrays return early"),
    };
    Ok(data)
}

/// Reorder a column-major buffer into row-major order.
fn fortran_to_c<T: Clone>(values: &[T], shape: &[usize]) -> Vec<T> {
    if shape.len() < 2 {
        return values.to_vec();
    }
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    let mut c_strides = vec![1usize; shape.len()];
    for d in (0..shape.len() - 1).rev() {
        c_strides[d] = c_strides[d + 1] * shape[d + 1];
    }
    let mut f_strides = vec![1usize; shape.len()];
    for d in 1..shape.len() {
        f_strides[d] = f_strides[d - 1] * shape[d - 1];
    }
    for flat in 0..n {
        let mut rem = flat;
        let mut src = 0;
        for d in 0..shape.len() {
            let idx = rem / c_strides[d];
            rem %= c_strides[d];
            src += idx * f_strides[d];
        }
        out.push(values[src].clone());
    }
    out
}

fn reorder(data: NpyData, shape: &[usize]) -> NpyData {
    match data {
        NpyData::Float(v) => NpyData::Float(fortran_to_c(&v, shape)),
        NpyData::Int(v) => NpyData::Int(fortran_to_c(&v, shape)),
        NpyData::Text(v) => NpyData::Text(fortran_to_c(&v, shape)),
    }
}

/// Decode a complete `.npy` file. `key` only labels errors.
pub fn parse_npy(key: &str, bytes: &[u8]) -> Result<NdArray> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(RecoError::malformed(key, "missing .npy magic"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(RecoError::malformed(key, "truncated header"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(RecoError::malformed(key, format!("unsupported .npy version {v}"))),
    };
    let body_start = header_start + header_len;
    if bytes.len() < body_start {
        return Err(RecoError::malformed(key, "truncated header"));
    }
    let header_text = String::from_utf8_lossy(&bytes[header_start..body_start]);
    let header = parse_header(&header_text).map_err(|e| RecoError::malformed(key, e))?;
    let dtype = parse_descr(&header.descr).map_err(|e| RecoError::malformed(key, e))?;

    let count = header
        .shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| RecoError::malformed(key, "shape overflows"))?;
    let mut data =
        decode_elements(dtype, &bytes[body_start..], count).map_err(|e| RecoError::malformed(key, e))?;
    if header.fortran_order {
        data = reorder(data, &header.shape);
    }

    Ok(NdArray {
        descr: header.descr,
        shape: header.shape,
        data,
    })
}
