use super::{MAX_DEPTH, Map, PackStreamError, Structure, Value, marker};

/// Decodes one value starting at `offset`, returning it together with the
/// number of bytes it occupied.
pub fn decode(buf: &[u8], offset: usize) -> Result<(Value, usize), PackStreamError> {
    let mut cursor = Cursor { buf, pos: offset };
    let value = cursor.value(0)?;
    Ok((value, cursor.pos - offset))
}

/// Decodes a buffer that must hold exactly one value.
pub fn decode_exact(buf: &[u8]) -> Result<Value, PackStreamError> {
    let (value, used) = decode(buf, 0)?;
    match buf.len() - used {
        0 => Ok(value),
        n => Err(PackStreamError::TrailingBytes(n)),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], PackStreamError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(PackStreamError::Truncated {
                what,
                offset: self.pos,
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], PackStreamError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, PackStreamError> {
        Ok(self.take(1, what)?[0])
    }

    fn size(&mut self, width: usize, what: &'static str) -> Result<usize, PackStreamError> {
        Ok(match width {
            1 => self.u8(what)? as usize,
            2 => u16::from_be_bytes(self.array(what)?) as usize,
            _ => u32::from_be_bytes(self.array(what)?) as usize,
        })
    }

    fn value(&mut self, depth: usize) -> Result<Value, PackStreamError> {
        if depth > MAX_DEPTH {
            return Err(PackStreamError::TooDeep);
        }

        let offset = self.pos;
        let m = self.u8("marker")?;
        let high = m & 0xF0;
        let low = (m & 0x0F) as usize;

        let value = match m {
            0x00..=0x7F | 0xF0..=0xFF => Value::Integer(m as i8 as i64),
            marker::NULL => Value::Null,
            marker::FALSE => Value::Boolean(false),
            marker::TRUE => Value::Boolean(true),
            marker::FLOAT_64 => Value::Float(f64::from_be_bytes(self.array("float")?)),
            marker::INT_8 => Value::Integer(self.u8("int8")? as i8 as i64),
            marker::INT_16 => Value::Integer(i16::from_be_bytes(self.array("int16")?) as i64),
            marker::INT_32 => Value::Integer(i32::from_be_bytes(self.array("int32")?) as i64),
            marker::INT_64 => Value::Integer(i64::from_be_bytes(self.array("int64")?)),
            marker::BYTES_8 | marker::BYTES_16 | marker::BYTES_32 => {
                let len = self.size(1 << (m - marker::BYTES_8), "bytes size")?;
                Value::Bytes(self.take(len, "bytes")?.to_vec())
            }
            _ if high == marker::TINY_STRING => self.string(low, offset)?,
            marker::STRING_8 | marker::STRING_16 | marker::STRING_32 => {
                let len = self.size(1 << (m - marker::STRING_8), "string size")?;
                self.string(len, offset)?
            }
            _ if high == marker::TINY_LIST => self.list(low, depth)?,
            marker::LIST_8 | marker::LIST_16 | marker::LIST_32 => {
                let len = self.size(1 << (m - marker::LIST_8), "list size")?;
                self.list(len, depth)?
            }
            _ if high == marker::TINY_MAP => self.map(low, depth)?,
            marker::MAP_8 | marker::MAP_16 | marker::MAP_32 => {
                let len = self.size(1 << (m - marker::MAP_8), "map size")?;
                self.map(len, depth)?
            }
            _ if high == marker::TINY_STRUCT => {
                let signature = self.u8("structure signature")?;
                let mut fields = Vec::with_capacity(low);
                for _ in 0..low {
                    fields.push(self.value(depth + 1)?);
                }
                Value::Structure(Structure { signature, fields })
            }
            _ => return Err(PackStreamError::UnknownMarker { marker: m, offset }),
        };

        Ok(value)
    }

    fn string(&mut self, len: usize, offset: usize) -> Result<Value, PackStreamError> {
        let bytes = self.take(len, "string")?;
        let s = std::str::from_utf8(bytes).map_err(|_| PackStreamError::InvalidUtf8 { offset })?;
        Ok(Value::String(s.to_string()))
    }

    fn list(&mut self, len: usize, depth: usize) -> Result<Value, PackStreamError> {
        // Every element takes at least one byte, so a size larger than
        // what is left cannot be honest.
        let mut items = Vec::with_capacity(len.min(self.buf.len() - self.pos));
        for _ in 0..len {
            items.push(self.value(depth + 1)?);
        }
        Ok(Value::List(items))
    }

    fn map(&mut self, len: usize, depth: usize) -> Result<Value, PackStreamError> {
        let mut map = Map::new();
        for _ in 0..len {
            let offset = self.pos;
            let key = match self.value(depth + 1)? {
                Value::String(key) => key,
                _ => return Err(PackStreamError::NonStringKey { offset }),
            };
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}
