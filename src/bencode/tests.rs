use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;

#[test]
fn decode_integers() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-7e").unwrap(), Value::Integer(-7));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn decode_rejects_non_canonical_integers() {
    assert!(decode(b"i-0e").is_err());
    assert!(decode(b"i007e").is_err());
    assert!(decode(b"ie").is_err());
}

#[test]
fn decode_byte_strings() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Bytes::new()));
}

#[test]
fn decode_rejects_truncated_string() {
    assert!(decode(b"10:short").is_err());
}

#[test]
fn decode_list_and_dict() {
    let list = decode(b"l4:spami42ee").unwrap();
    let items = list.as_list().unwrap();
    assert_eq!(items[0].as_str(), Some("spam"));
    assert_eq!(items[1].as_integer(), Some(42));

    let dict = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    assert_eq!(dict.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
    assert_eq!(dict.get(b"spam").and_then(|v| v.as_str()), Some("eggs"));
}

#[test]
fn decode_rejects_integer_dict_key() {
    assert!(matches!(
        decode(b"di1e3:mooe"),
        Err(BencodeError::NonStringKey)
    ));
}

#[test]
fn decode_rejects_trailing_data() {
    assert!(matches!(
        decode(b"i42eextra"),
        Err(BencodeError::TrailingData)
    ));
}

#[test]
fn encode_shapes() {
    assert_eq!(encode(&Value::Integer(-42)).unwrap(), b"i-42e");
    assert_eq!(encode(&Value::string("spam")).unwrap(), b"4:spam");

    let list = Value::List(vec![Value::string("spam"), Value::Integer(42)]);
    assert_eq!(encode(&list).unwrap(), b"l4:spami42ee");

    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"b"), Value::Integer(2));
    dict.insert(Bytes::from_static(b"a"), Value::Integer(1));
    assert_eq!(encode(&Value::Dict(dict)).unwrap(), b"d1:ai1e1:bi2ee");
}

#[test]
fn roundtrip_is_identity_on_canonical_input() {
    let original: &[u8] = b"d5:filesld6:lengthi12e4:pathl9:hello.txteee4:name5:helloe";
    let decoded = decode(original).unwrap();
    assert_eq!(encode(&decoded).unwrap(), original);

    let nested: &[u8] = b"d4:listl4:spami42eee";
    assert_eq!(encode(&decode(nested).unwrap()).unwrap(), nested);
}

#[test]
fn u32_coercion_bounds() {
    assert_eq!(Value::Integer(7).as_u32(), Some(7));
    assert_eq!(Value::Integer(-1).as_u32(), None);
    assert_eq!(Value::Integer(i64::from(u32::MAX) + 1).as_u32(), None);
    assert_eq!(Value::string("7").as_u32(), None);
}

#[test]
fn nesting_limit_holds() {
    let mut deep = Vec::new();
    deep.extend(std::iter::repeat(b'l').take(80));
    deep.extend(std::iter::repeat(b'e').take(80));
    assert!(matches!(
        decode(&deep),
        Err(BencodeError::NestingTooDeep(_))
    ));
}
