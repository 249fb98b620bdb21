/// Minimal protobuf wire format encoder, enough for ONNX models.
#[derive(Default)]
pub struct ProtoWriter {
    buf: Vec<u8>,
}

const VARINT: u8 = 0;
const LEN: u8 = 2;
const FIXED32: u8 = 5;

impl ProtoWriter {
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn varint(&mut self, mut val: u64) {
        while val >= 0x80 {
            self.buf.push((val as u8) | 0x80);
            val >>= 7;
        }

        self.buf.push(val as u8);
    }

    fn tag(&mut self, field: u32, wire_type: u8) {
        self.varint((u64::from(field) << 3) | u64::from(wire_type));
    }

    pub fn int64(&mut self, field: u32, val: i64) {
        self.tag(field, VARINT);
        self.varint(val as u64);
    }

    pub fn float(&mut self, field: u32, val: f32) {
        self.tag(field, FIXED32);
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn bytes(&mut self, field: u32, val: &[u8]) {
        self.tag(field, LEN);
        self.varint(val.len() as u64);
        self.buf.extend_from_slice(val);
    }

    pub fn string(&mut self, field: u32, val: &str) {
        self.bytes(field, val.as_bytes());
    }

    pub fn message(&mut self, field: u32, f: impl FnOnce(&mut ProtoWriter)) {
        let mut inner = ProtoWriter::default();
        f(&mut inner);
        self.bytes(field, &inner.buf);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WireValue<'a> {
    Varint(u64),
    Fixed32(u32),
    Fixed64(u64),
    Bytes(&'a [u8]),
}

impl<'a> WireValue<'a> {
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            WireValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            WireValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::Varint(val) => Some(*val as i64),
            _ => None,
        }
    }
}

fn read_varint(bytes: &[u8], offset: &mut usize) -> Option<u64> {
    let mut val = 0u64;

    for shift in (0..64).step_by(7) {
        let byte = *bytes.get(*offset)?;
        *offset += 1;
        val |= u64::from(byte & 0x7f) << shift;

        if byte & 0x80 == 0 {
            return Some(val);
        }
    }

    None
}

/// Splits an encoded message into its top level fields, `None` if the
/// message is malformed.
pub fn decode_fields(bytes: &[u8]) -> Option<Vec<(u32, WireValue<'_>)>> {
    let mut offset = 0;
    let mut fields = Vec::new();

    while offset < bytes.len() {
        let key = read_varint(bytes, &mut offset)?;
        let field = u32::try_from(key >> 3).ok()?;

        let value = match (key & 7) as u8 {
            VARINT => WireValue::Varint(read_varint(bytes, &mut offset)?),
            FIXED32 => {
                let word = bytes.get(offset..offset + 4)?;
                offset += 4;
                WireValue::Fixed32(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            }
            1 => {
                let word = bytes.get(offset..offset + 8)?;
                offset += 8;
                let mut buf = [0; 8];
                buf.copy_from_slice(word);
                WireValue::Fixed64(u64::from_le_bytes(buf))
            }
            LEN => {
                let len = usize::try_from(read_varint(bytes, &mut offset)?).ok()?;
                let slice = bytes.get(offset..offset.checked_add(len)?)?;
                offset += len;
                WireValue::Bytes(slice)
            }
            _ => return None,
        };

        fields.push((field, value));
    }

    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_encoding() {
        let mut writer = ProtoWriter::default();
        writer.int64(1, 300);
        assert_eq!(writer.into_bytes(), vec![0x08, 0xac, 0x02]);

        let mut writer = ProtoWriter::default();
        writer.int64(2, -1);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 11);
        assert_eq!(decode_fields(&bytes), Some(vec![(2, WireValue::Varint(u64::MAX))]));
    }

    #[test]
    fn nested_messages() {
        let mut writer = ProtoWriter::default();
        writer.message(7, |w| {
            w.string(1, "abc");
            w.float(2, 1.5);
        });

        let bytes = writer.into_bytes();
        let outer = decode_fields(&bytes).unwrap();
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].0, 7);

        let inner = decode_fields(outer[0].1.as_bytes().unwrap()).unwrap();
        assert_eq!(inner[0], (1, WireValue::Bytes(b"abc")));
        assert_eq!(inner[1], (2, WireValue::Fixed32(1.5f32.to_bits())));
    }

    #[test]
    fn malformed_input() {
        assert!(decode_fields(&[0x0a, 0x05, 0x01]).is_none());
        assert!(decode_fields(&[0xff]).is_none());
    }
}
