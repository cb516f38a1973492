//! Structural value encoding for bus payloads.
//!
//! A schema-less, length-prefixed binary form used to carry typed method
//! arguments: fixed-width little-endian integers and floats, a single 0/1
//! byte for bool, u32-length-prefixed UTF-8 strings and sequences, fixed
//! arrays and records as their elements back-to-back.
//!
//! The law is `decode(encode(v)) == v` for every encodable value. Types
//! outside the supported set simply do not implement [`Encode`]/[`Decode`],
//! so unsupported payloads are rejected at compile time rather than at
//! runtime.

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("truncated input: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
}

/// Serialize into the structural wire form.
pub trait Encode {
    fn encode_into(&self, buf: &mut Vec<u8>);
}

/// The symmetric inverse of [`Encode`].
pub trait Decode: Sized {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError>;
}

/// Encode a value into a fresh buffer.
pub fn encode<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode_into(&mut buf);
    buf
}

/// Decode a value from a payload. Trailing bytes are ignored.
pub fn decode<T: Decode>(mut input: &[u8]) -> Result<T, CodecError> {
    T::decode_from(&mut input)
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::Truncated {
            needed: n - input.len(),
        });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

macro_rules! fixed_width {
    ($($ty:ty),* $(,)?) => {$(
        impl Encode for $ty {
            fn encode_into(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }
        }

        impl Decode for $ty {
            fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let raw = take(input, WIDTH)?;
                let mut bytes = [0u8; WIDTH];
                bytes.copy_from_slice(raw);
                Ok(<$ty>::from_le_bytes(bytes))
            }
        }
    )*};
}

fixed_width!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Encode for bool {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(*self as u8);
    }
}

impl Decode for bool {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(take(input, 1)?[0] != 0)
    }
}

impl Encode for str {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode_into(buf);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.as_str().encode_into(buf);
    }
}

impl Decode for String {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let len = u32::decode_from(input)? as usize;
        let raw = take(input, len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode_into(buf);
        for element in self {
            element.encode_into(buf);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.as_slice().encode_into(buf);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let len = u32::decode_from(input)? as usize;
        let mut out = Vec::new();
        for _ in 0..len {
            out.push(T::decode_from(input)?);
        }
        Ok(out)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        for element in self {
            element.encode_into(buf);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
        let mut slots = Vec::with_capacity(N);
        for _ in 0..N {
            slots.push(T::decode_from(input)?);
        }
        match slots.try_into() {
            Ok(array) => Ok(array),
            Err(_) => unreachable!(),
        }
    }
}

// Records encode as their fields in declaration order; tuples carry that
// shape for ad-hoc payloads.
macro_rules! record {
    ($($field:ident),+) => {
        impl<$($field: Encode),+> Encode for ($($field,)+) {
            fn encode_into(&self, buf: &mut Vec<u8>) {
                #[allow(non_snake_case)]
                let ($($field,)+) = self;
                $($field.encode_into(buf);)+
            }
        }

        impl<$($field: Decode),+> Decode for ($($field,)+) {
            fn decode_from(input: &mut &[u8]) -> Result<Self, CodecError> {
                Ok(($($field::decode_from(input)?,)+))
            }
        }
    };
}

record!(A);
record!(A, B);
record!(A, B, C);
record!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let encoded = encode(&value);
        let decoded: T = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn integers_roundtrip() {
        roundtrip(true);
        roundtrip(false);
        roundtrip(-5i8);
        roundtrip(-1234i16);
        roundtrip(-123456i32);
        roundtrip(i64::MIN);
        roundtrip(0xffu8);
        roundtrip(0xffffu16);
        roundtrip(0xdead_beefu32);
        roundtrip(u64::MAX);
    }

    #[test]
    fn floats_roundtrip() {
        roundtrip(1.5f32);
        roundtrip(-0.25f64);
        roundtrip(f64::INFINITY);
    }

    #[test]
    fn strings_roundtrip() {
        roundtrip(String::new());
        roundtrip("hello".to_string());
        roundtrip("grüße 🦀".to_string());
    }

    #[test]
    fn string_is_length_prefixed_utf8() {
        assert_eq!(encode("ab"), vec![2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn sequences_roundtrip() {
        roundtrip(Vec::<u32>::new());
        roundtrip(vec![1u32, 2, 3]);
        roundtrip(vec!["a".to_string(), "b".to_string()]);
        roundtrip(vec![vec![1u8], vec![2, 3]]);
    }

    #[test]
    fn arrays_roundtrip() {
        roundtrip([1u8, 2, 3, 4]);
        roundtrip([0.5f64, -0.5]);
    }

    #[test]
    fn records_roundtrip() {
        roundtrip((7u32, "name".to_string()));
        roundtrip((true, vec![1u16, 2], "x".to_string()));
    }

    #[test]
    fn array_has_no_length_prefix() {
        assert_eq!(encode(&[1u8, 2]), vec![1, 2]);
        assert_eq!(encode(&vec![1u8, 2]), vec![2, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let encoded = encode(&0xdead_beefu32);
        let err = decode::<u32>(&encoded[..2]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: 2 }));
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut encoded = encode("hello");
        encoded.truncate(6);
        assert!(decode::<String>(&encoded).is_err());
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut encoded = encode("ab");
        encoded[4] = 0xff;
        assert!(matches!(
            decode::<String>(&encoded).unwrap_err(),
            CodecError::InvalidUtf8
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut encoded = encode(&5u16);
        encoded.push(99);
        assert_eq!(decode::<u16>(&encoded).unwrap(), 5);
    }
}
