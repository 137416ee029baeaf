#[cfg(test)]
mod tests {
    use crate::encoding::{Decode, Encode, decode_from_slice, decode_vec, encode_to_vec, encode_vec};

    fn roundtrip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = encode_to_vec(&value).unwrap();
        let (decoded, consumed) = decode_from_slice::<T>(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_unsigned_roundtrips() {
        roundtrip(0u8);
        roundtrip(0xABu8);
        roundtrip(0xBEEFu16);
        roundtrip(0xDEAD_BEEFu32);
        roundtrip(u64::MAX);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);

        let bytes = encode_to_vec(&0x01020304_05060708u64).unwrap();
        assert_eq!(bytes[0], 0x08);
        assert_eq!(bytes[7], 0x01);
    }

    #[test]
    fn test_bool_roundtrip_and_rejection() {
        roundtrip(true);
        roundtrip(false);
        assert!(bool::decode_from(&[2]).is_err());
    }

    #[test]
    fn test_byte_array_roundtrip() {
        roundtrip(*b"CKVB");
        let bytes = encode_to_vec(&*b"CKVB").unwrap();
        assert_eq!(bytes.len(), 4); // no length prefix
    }

    #[test]
    fn test_byte_vec_roundtrip() {
        roundtrip(Vec::<u8>::new());
        roundtrip(b"hello world".to_vec());

        // [u32 len][bytes]
        let bytes = encode_to_vec(&b"abc".to_vec()).unwrap();
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..], b"abc");
    }

    #[test]
    fn test_slice_encoding_matches_vec() {
        let as_vec = encode_to_vec(&b"abc".to_vec()).unwrap();
        let as_slice = encode_to_vec(&b"abc".as_slice()).unwrap();
        assert_eq!(as_vec, as_slice);
    }

    #[test]
    fn test_vec_of_structs_roundtrip() {
        let items = vec![1u64, 2, 3, u64::MAX];
        let mut buf = Vec::new();
        encode_vec(&items, &mut buf).unwrap();
        let (decoded, consumed) = decode_vec::<u64>(&buf).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_truncated_input_fails() {
        assert!(u32::decode_from(&[1, 2]).is_err());
        assert!(u64::decode_from(&[]).is_err());
        // Length prefix claims 100 bytes, only 2 present.
        let mut buf = 100u32.to_le_bytes().to_vec();
        buf.extend_from_slice(&[0, 0]);
        assert!(<Vec<u8>>::decode_from(&buf).is_err());
    }
}
