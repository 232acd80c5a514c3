use super::Bencode;
use bytes::{BufMut, BytesMut};

/// Encode a value into canonical bencode (dictionary keys sorted)
pub fn encode(value: &Bencode) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_value(value, &mut buf);
    buf.to_vec()
}

fn write_bytes(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}

fn write_value(value: &Bencode, buf: &mut BytesMut) {
    match value {
        Bencode::Int(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Bencode::Bytes(b) => write_bytes(b, buf),
        Bencode::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                write_value(item, buf);
            }
            buf.put_u8(b'e');
        }
        Bencode::Dict(dict) => {
            buf.put_u8(b'd');
            for (key, value) in dict {
                write_bytes(key, buf);
                write_value(value, buf);
            }
            buf.put_u8(b'e');
        }
    }
}
