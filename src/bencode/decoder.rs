use super::Bencode;
use crate::error::{LeechError, Result};
use std::collections::BTreeMap;

/// Decode exactly one bencode value. Trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Bencode> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value()?;

    if decoder.pos != data.len() {
        return Err(LeechError::bencode(decoder.pos, "trailing data"));
    }

    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| LeechError::bencode(self.pos, "unexpected end of input"))
    }

    fn value(&mut self) -> Result<Bencode> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.number_until(b'e')?;
                Ok(Bencode::Int(n))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value()?);
                }
                self.pos += 1;
                Ok(Bencode::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(LeechError::bencode(self.pos, "dictionary key must be a string"));
                    }
                    let key = self.bytes()?.to_vec();
                    let value = self.value()?;
                    dict.insert(key, value);
                }
                self.pos += 1;
                Ok(Bencode::Dict(dict))
            }
            b'0'..=b'9' => Ok(Bencode::Bytes(self.bytes()?.to_vec())),
            other => Err(LeechError::bencode(
                self.pos,
                format!("invalid token {:?}", other as char),
            )),
        }
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.number_until(b':')?;
        let len = usize::try_from(len)
            .map_err(|_| LeechError::bencode(start, "negative string length"))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| LeechError::bencode(start, "string length exceeds input"))?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Parse ASCII digits up to `terminator` and consume the terminator
    fn number_until(&mut self, terminator: u8) -> Result<i64> {
        let start = self.pos;
        let len = self.data[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| LeechError::bencode(start, "unterminated number"))?;

        let digits = std::str::from_utf8(&self.data[start..start + len])
            .map_err(|_| LeechError::bencode(start, "number is not ASCII"))?;
        let n = digits
            .parse::<i64>()
            .map_err(|_| LeechError::bencode(start, format!("invalid number {:?}", digits)))?;

        self.pos = start + len + 1;
        Ok(n)
    }
}
