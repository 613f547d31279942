use super::error::BencodeError;
use super::value::Value;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Recursion limit; wire inputs never legitimately nest this deep.
const MAX_DEPTH: usize = 64;

/// Decodes a complete value from `input`.
///
/// The whole slice must be consumed; trailing bytes are an error so a
/// truncated or concatenated payload cannot be mistaken for a valid one.
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let mut cursor = Decoder::new(input);
    let value = cursor.value(0)?;
    if !cursor.at_end() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos == self.input.len()
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep(MAX_DEPTH));
        }
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            byte => Err(BencodeError::UnexpectedByte {
                byte,
                at: self.pos,
            }),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.bump();
        let start = self.pos;
        while self.peek()? != b'e' {
            self.bump();
        }
        let digits = &self.input[start..self.pos];
        self.bump();

        let text = std::str::from_utf8(digits)
            .map_err(|_| BencodeError::MalformedInteger("non-ascii digits".into()))?;
        if text.is_empty() {
            return Err(BencodeError::MalformedInteger("empty".into()));
        }
        // Canonical form forbids leading zeros and negative zero.
        if text == "-0" || (text.len() > 1 && (text.starts_with('0') || text.starts_with("-0"))) {
            return Err(BencodeError::MalformedInteger(text.into()));
        }
        let n: i64 = text
            .parse()
            .map_err(|_| BencodeError::MalformedInteger(text.into()))?;
        Ok(Value::Integer(n))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let len_start = self.pos;
        while self.peek()? != b':' {
            self.bump();
        }
        let len: usize = std::str::from_utf8(&self.input[len_start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::MalformedLength(len_start))?;
        self.bump();

        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.input.len())
            .ok_or(BencodeError::UnexpectedEof(self.pos))?;
        let bytes = Bytes::copy_from_slice(&self.input[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.bump();
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.bump();
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.bump();
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::NonStringKey);
            }
            let key = self.byte_string()?;
            let val = self.value(depth + 1)?;
            entries.insert(key, val);
        }
        self.bump();
        Ok(Value::Dict(entries))
    }
}
