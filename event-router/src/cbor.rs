use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use minicbor::data::Type;
use minicbor::Decoder;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Nesting limit for arrays, maps and tags.
pub const MAX_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum CborError {
    #[error("malformed CBOR item")]
    Decode(#[from] minicbor::decode::Error),
    #[error("CBOR nesting exceeds {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("{0} trailing bytes after the CBOR item")]
    TrailingBytes(usize),
    #[error("unsupported CBOR map key of type {0}")]
    UnsupportedMapKey(String),
    #[error("unexpected CBOR break")]
    UnexpectedBreak,
    #[error("unknown CBOR type {0}")]
    UnknownType(u8),
}

/// Decodes one CBOR item into the JSON tree the rest of the router works on.
///
/// - text and integer map keys become strings
/// - byte strings become base64 text
/// - tags are dropped, keeping the tagged item
/// - undefined, simple values and non-finite floats become null
pub fn decode(input: &[u8]) -> Result<Value, CborError> {
    let mut decoder = Decoder::new(input);
    let value = decode_value(&mut decoder, 0)?;

    let trailing = input.len().saturating_sub(decoder.position());
    if trailing > 0 {
        return Err(CborError::TrailingBytes(trailing));
    }
    Ok(value)
}

fn decode_value(dec: &mut Decoder, depth: usize) -> Result<Value, CborError> {
    if depth > MAX_DEPTH {
        return Err(CborError::TooDeep);
    }

    let ty = dec.datatype()?;
    let value = match ty {
        Type::Bool => Value::Bool(dec.bool()?),
        Type::Null => {
            dec.null()?;
            Value::Null
        }
        Type::Undefined => {
            dec.undefined()?;
            Value::Null
        }
        Type::Simple => {
            dec.simple()?;
            Value::Null
        }
        Type::U8
        | Type::U16
        | Type::U32
        | Type::U64
        | Type::I8
        | Type::I16
        | Type::I32
        | Type::I64
        | Type::Int => integer(i128::from(dec.int()?)),
        Type::F16 | Type::F32 | Type::F64 => Number::from_f64(dec.f64()?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Type::Bytes | Type::BytesIndef => {
            let mut bytes = Vec::new();
            for chunk in dec.bytes_iter()? {
                bytes.extend_from_slice(chunk?);
            }
            Value::String(STANDARD.encode(bytes))
        }
        Type::String | Type::StringIndef => {
            let mut text = String::new();
            for chunk in dec.str_iter()? {
                text.push_str(chunk?);
            }
            Value::String(text)
        }
        Type::Array | Type::ArrayIndef => {
            let mut items = Vec::new();
            match dec.array()? {
                Some(len) => {
                    for _ in 0..len {
                        items.push(decode_value(dec, depth + 1)?);
                    }
                }
                None => {
                    while !at_break(dec)? {
                        items.push(decode_value(dec, depth + 1)?);
                    }
                    skip_break(dec);
                }
            }
            Value::Array(items)
        }
        Type::Map | Type::MapIndef => {
            let mut fields = Map::new();
            match dec.map()? {
                Some(len) => {
                    for _ in 0..len {
                        let (key, value) = decode_entry(dec, depth + 1)?;
                        fields.insert(key, value);
                    }
                }
                None => {
                    while !at_break(dec)? {
                        let (key, value) = decode_entry(dec, depth + 1)?;
                        fields.insert(key, value);
                    }
                    skip_break(dec);
                }
            }
            Value::Object(fields)
        }
        Type::Tag => {
            dec.tag()?;
            decode_value(dec, depth + 1)?
        }
        Type::Break => return Err(CborError::UnexpectedBreak),
        Type::Unknown(code) => return Err(CborError::UnknownType(code)),
    };
    Ok(value)
}

fn decode_entry(dec: &mut Decoder, depth: usize) -> Result<(String, Value), CborError> {
    let key = match decode_value(dec, depth)? {
        Value::String(key) => key,
        Value::Number(key) => key.to_string(),
        Value::Bool(key) => key.to_string(),
        other => return Err(CborError::UnsupportedMapKey(kind_of(&other).to_string())),
    };
    Ok((key, decode_value(dec, depth)?))
}

fn integer(value: i128) -> Value {
    if let Ok(value) = u64::try_from(value) {
        Value::from(value)
    } else if let Ok(value) = i64::try_from(value) {
        Value::from(value)
    } else {
        // Below i64::MIN, JSON numbers cannot carry it losslessly
        Value::String(value.to_string())
    }
}

fn at_break(dec: &mut Decoder) -> Result<bool, CborError> {
    Ok(matches!(dec.datatype()?, Type::Break))
}

fn skip_break(dec: &mut Decoder) {
    dec.set_position(dec.position() + 1);
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
