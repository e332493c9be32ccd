use bytes::{BufMut, BytesMut};

use super::{MAX_STRUCT_FIELDS, PackStreamError, Structure, Value, marker};

/// Encodes a value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64);
    encode_into(value, &mut buf);
    buf.to_vec()
}

/// Appends the encoding of `value` to `buf`.
pub fn encode_into(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Null => buf.put_u8(marker::NULL),
        Value::Boolean(true) => buf.put_u8(marker::TRUE),
        Value::Boolean(false) => buf.put_u8(marker::FALSE),
        Value::Integer(i) => put_int(*i, buf),
        Value::Float(f) => {
            buf.put_u8(marker::FLOAT_64);
            buf.put_f64(*f);
        }
        Value::Bytes(b) => {
            put_size(b.len(), None, [marker::BYTES_8, marker::BYTES_16, marker::BYTES_32], buf);
            buf.put_slice(b);
        }
        Value::String(s) => put_str(s, buf),
        Value::List(items) => {
            put_size(
                items.len(),
                Some(marker::TINY_LIST),
                [marker::LIST_8, marker::LIST_16, marker::LIST_32],
                buf,
            );
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(map) => {
            put_size(
                map.len(),
                Some(marker::TINY_MAP),
                [marker::MAP_8, marker::MAP_16, marker::MAP_32],
                buf,
            );
            for (key, value) in map {
                put_str(key, buf);
                encode_into(value, buf);
            }
        }
        Value::Structure(s) => put_struct(s, buf),
    }
}

/// Checks that `value` can be encoded without loss. Structures are the only
/// values with a hard size limit, so values built outside the decoder should
/// pass through here before [`encode`].
pub fn check_encodable(value: &Value) -> Result<(), PackStreamError> {
    match value {
        Value::List(items) => items.iter().try_for_each(check_encodable),
        Value::Map(map) => map.values().try_for_each(check_encodable),
        Value::Structure(s) if s.fields.len() > MAX_STRUCT_FIELDS => {
            Err(PackStreamError::TooManyFields {
                signature: s.signature,
                fields: s.fields.len(),
            })
        }
        Value::Structure(s) => s.fields.iter().try_for_each(check_encodable),
        _ => Ok(()),
    }
}

fn put_int(i: i64, buf: &mut BytesMut) {
    if (-16..=127).contains(&i) {
        buf.put_i8(i as i8);
    } else if let Ok(i) = i8::try_from(i) {
        buf.put_u8(marker::INT_8);
        buf.put_i8(i);
    } else if let Ok(i) = i16::try_from(i) {
        buf.put_u8(marker::INT_16);
        buf.put_i16(i);
    } else if let Ok(i) = i32::try_from(i) {
        buf.put_u8(marker::INT_32);
        buf.put_i32(i);
    } else {
        buf.put_u8(marker::INT_64);
        buf.put_i64(i);
    }
}

fn put_str(s: &str, buf: &mut BytesMut) {
    put_size(
        s.len(),
        Some(marker::TINY_STRING),
        [marker::STRING_8, marker::STRING_16, marker::STRING_32],
        buf,
    );
    buf.put_slice(s.as_bytes());
}

/// Writes the marker and size prefix shared by every sized type. Byte
/// arrays have no tiny form, so `tiny` is `None` for them.
fn put_size(len: usize, tiny: Option<u8>, sized: [u8; 3], buf: &mut BytesMut) {
    match tiny {
        Some(tiny) if len <= 0x0F => buf.put_u8(tiny | len as u8),
        _ if len <= u8::MAX as usize => {
            buf.put_u8(sized[0]);
            buf.put_u8(len as u8);
        }
        _ if len <= u16::MAX as usize => {
            buf.put_u8(sized[1]);
            buf.put_u16(len as u16);
        }
        _ => {
            debug_assert!(len <= u32::MAX as usize, "value too large for PackStream");
            buf.put_u8(sized[2]);
            buf.put_u32(len as u32);
        }
    }
}

/// Structures over the field limit are cut short; see [`check_encodable`].
fn put_struct(s: &Structure, buf: &mut BytesMut) {
    debug_assert!(
        s.fields.len() <= MAX_STRUCT_FIELDS,
        "structure 0x{:02X} has {} fields",
        s.signature,
        s.fields.len()
    );
    let fields = &s.fields[..s.fields.len().min(MAX_STRUCT_FIELDS)];

    buf.put_u8(marker::TINY_STRUCT | fields.len() as u8);
    buf.put_u8(s.signature);
    for field in fields {
        encode_into(field, buf);
    }
}
