//! Order-preserving JSON rendering of raw MessagePack.
//!
//! The typed [`crate::Manifest`] loses map ordering; inspection dumps need
//! the manifest exactly as the server sent it. This renders a
//! [`rmpv::Value`] to JSON keeping map order, stringifying numeric keys in
//! raw decimal form, and formatting floats to 17 decimals with
//! trailing-zero trimming so repeated dumps of one manifest are
//! byte-identical.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rmpv::Value;

use crate::Result;

/// Decode a MessagePack buffer and render it as ordered JSON.
pub fn msgpack_to_json(data: &[u8]) -> Result<String> {
    let value = rmpv::decode::read_value(&mut &data[..])?;
    let mut out = String::new();
    write_value(&mut out, &value);
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Nil => out.push_str("null"),
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::F32(f) => out.push_str(&format_float(f64::from(*f))),
        Value::F64(f) => out.push_str(&format_float(*f)),
        Value::String(s) => write_string(out, &String::from_utf8_lossy(s.as_bytes())),
        Value::Binary(b) => write_string(out, &BASE64.encode(b)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Map(entries) => {
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, &key_text(key));
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
        Value::Ext(_, data) => write_string(out, &BASE64.encode(data)),
    }
}

/// Map keys become strings: numbers keep their raw decimal form.
fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::F32(f) => format_float(f64::from(*f)),
        Value::F64(f) => format_float(*f),
        Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 17 decimal places, trailing zeros trimmed but never past the first
/// decimal: stable across dumps and round-trippable.
fn format_float(f: f64) -> String {
    let raw = format!("{f:.17}");
    match raw.split_once('.') {
        Some((int_part, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{int_part}.0")
            } else {
                format!("{int_part}.{frac}")
            }
        }
        None => format!("{raw}.0"),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    #[test]
    fn test_map_order_preserved() {
        let value = Value::Map(vec![
            (Value::from("zeta"), Value::from(1)),
            (Value::from("alpha"), Value::from(2)),
            (Value::from(10), Value::from("numeric key")),
        ]);

        let json = msgpack_to_json(&encode(&value)).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":2,"10":"numeric key"}"#);
    }

    #[test]
    fn test_float_formatting() {
        let value = Value::Map(vec![
            (Value::from("half"), Value::F64(0.5)),
            (Value::from("whole"), Value::F64(3.0)),
        ]);

        let json = msgpack_to_json(&encode(&value)).unwrap();
        assert_eq!(json, r#"{"half":0.5,"whole":3.0}"#);
    }

    #[test]
    fn test_nested_and_scalar_values() {
        let value = Value::Map(vec![
            (
                Value::from("list"),
                Value::Array(vec![Value::Nil, Value::Boolean(true), Value::from(-7)]),
            ),
            (Value::from("text"), Value::from("with \"quotes\"")),
        ]);

        let json = msgpack_to_json(&encode(&value)).unwrap();
        assert_eq!(
            json,
            r#"{"list":[null,true,-7],"text":"with \"quotes\""}"#
        );
    }

    #[test]
    fn test_repeat_dumps_are_identical() {
        let value = Value::Map(vec![
            (Value::from("f"), Value::F32(0.25)),
            (Value::from("g"), Value::F64(1.0 / 3.0)),
        ]);
        let data = encode(&value);

        assert_eq!(
            msgpack_to_json(&data).unwrap(),
            msgpack_to_json(&data).unwrap()
        );
    }
}
