use super::error::BencodeError;
use super::value::Value;
use std::io::Write;

/// Encodes a value into its canonical byte form.
///
/// Dictionaries are emitted in ascending key order (the `BTreeMap` order),
/// so equal values always serialize to identical bytes. Digests and
/// signatures throughout the crate are computed over this form.
///
/// # Errors
///
/// Returns an error only if writing to the output buffer fails.
///
/// # Examples
///
/// ```
/// use mbit::bencode::{encode, Value};
///
/// let msg = Value::List(vec![Value::Integer(3), Value::Integer(0)]);
/// assert_eq!(encode(&msg).unwrap(), b"li3ei0ee");
/// ```
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut out = Vec::with_capacity(64);
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value<W: Write>(value: &Value, out: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => write!(out, "i{}e", i)?,
        Value::Bytes(b) => {
            write!(out, "{}:", b.len())?;
            out.write_all(b)?;
        }
        Value::List(items) => {
            out.write_all(b"l")?;
            for item in items {
                write_value(item, out)?;
            }
            out.write_all(b"e")?;
        }
        Value::Dict(entries) => {
            out.write_all(b"d")?;
            for (key, val) in entries {
                write!(out, "{}:", key.len())?;
                out.write_all(key)?;
                write_value(val, out)?;
            }
            out.write_all(b"e")?;
        }
    }
    Ok(())
}
