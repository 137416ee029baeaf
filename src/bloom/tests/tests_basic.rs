#[cfg(test)]
mod tests {
    use crate::bloom::{BloomFilter, BloomVariant, HashFamily};
    use crate::encoding::{decode_from_slice, encode_to_vec};

    fn standard(expected: usize) -> BloomFilter {
        BloomFilter::new(expected, 100, BloomVariant::Standard, HashFamily::XxHash64).unwrap()
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = standard(1_000);
        for i in 0..1_000u32 {
            filter.insert(format!("key-{i:06}").as_bytes());
        }
        for i in 0..1_000u32 {
            assert!(
                filter.may_contain(format!("key-{i:06}").as_bytes()),
                "false negative for key-{i:06}"
            );
        }
    }

    #[test]
    fn test_absent_keys_mostly_rejected() {
        let mut filter = standard(1_000);
        for i in 0..1_000u32 {
            filter.insert(format!("present-{i}").as_bytes());
        }
        let false_positives = (0..1_000u32)
            .filter(|i| filter.may_contain(format!("absent-{i}").as_bytes()))
            .count();
        // Configured at 1%; anything under 5% proves the filter works.
        assert!(
            false_positives < 50,
            "false positive count too high: {false_positives}"
        );
    }

    #[test]
    fn test_empty_filter_rejects_everything() {
        let filter = standard(100);
        assert!(!filter.may_contain(b"anything"));
    }

    #[test]
    fn test_bits_per_key_constructor() {
        let filter =
            BloomFilter::with_bits_per_key(1_000, 10, BloomVariant::Standard, HashFamily::XxHash64)
                .unwrap();
        assert_eq!(filter.bit_count(), 10_000);
        // k = round(10 · ln 2) = 7
        assert_eq!(filter.hash_count(), 7);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut filter = BloomFilter::new(
            500,
            100,
            BloomVariant::Blocked,
            HashFamily::Murmur3_64,
        )
        .unwrap();
        for i in 0..500u32 {
            filter.insert(&i.to_le_bytes());
        }

        let bytes = encode_to_vec(&filter).unwrap();
        assert_eq!(bytes.len(), filter.encoded_len());
        let (decoded, consumed) = decode_from_slice::<BloomFilter>(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.bit_count(), filter.bit_count());
        assert_eq!(decoded.hash_count(), filter.hash_count());
        assert_eq!(decoded.variant(), filter.variant());
        assert_eq!(decoded.family(), filter.family());

        for i in 0..500u32 {
            assert!(decoded.may_contain(&i.to_le_bytes()));
        }
    }

    #[test]
    fn test_decode_rejects_bad_variant_tag() {
        let filter = standard(100);
        let mut bytes = encode_to_vec(&filter).unwrap();
        bytes[0] = 0xFF;
        assert!(decode_from_slice::<BloomFilter>(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let filter = standard(100);
        let mut bytes = encode_to_vec(&filter).unwrap();
        // Double the recorded bit count without growing the array.
        let bit_count = filter.bit_count() * 2;
        bytes[2..10].copy_from_slice(&bit_count.to_le_bytes());
        assert!(decode_from_slice::<BloomFilter>(&bytes).is_err());
    }
}
