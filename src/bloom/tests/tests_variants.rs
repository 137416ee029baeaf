#[cfg(test)]
mod tests {
    use crate::bloom::{BloomFilter, BloomVariant, HashFamily};

    fn fill_and_check(variant: BloomVariant) {
        let mut filter =
            BloomFilter::new(2_000, 100, variant, HashFamily::XxHash64).unwrap();
        for i in 0..2_000u32 {
            filter.insert(format!("entry-{i}").as_bytes());
        }
        for i in 0..2_000u32 {
            assert!(
                filter.may_contain(format!("entry-{i}").as_bytes()),
                "{variant:?} lost entry-{i}"
            );
        }
    }

    #[test]
    fn test_standard_variant() {
        fill_and_check(BloomVariant::Standard);
    }

    #[test]
    fn test_blocked_variant() {
        fill_and_check(BloomVariant::Blocked);
    }

    #[test]
    fn test_register_blocked_variant() {
        fill_and_check(BloomVariant::RegisterBlocked);
    }

    #[test]
    fn test_counting_variant() {
        fill_and_check(BloomVariant::Counting);
    }

    #[test]
    fn test_blocked_bit_count_is_whole_blocks() {
        let filter =
            BloomFilter::new(100, 100, BloomVariant::Blocked, HashFamily::XxHash64).unwrap();
        // 64-byte sub-blocks → bit count divisible by 512.
        assert_eq!(filter.bit_count() % 512, 0);

        let filter =
            BloomFilter::new(100, 100, BloomVariant::RegisterBlocked, HashFamily::XxHash64)
                .unwrap();
        assert_eq!(filter.bit_count() % 64, 0);
    }

    #[test]
    fn test_counting_remove() {
        let mut filter =
            BloomFilter::new(100, 100, BloomVariant::Counting, HashFamily::XxHash64).unwrap();
        filter.insert(b"keep");
        filter.insert(b"drop");

        assert!(filter.remove(b"drop"));
        assert!(filter.may_contain(b"keep"));
        // A removed key should (almost always) read as absent again.
        assert!(!filter.may_contain(b"drop") || filter.may_contain(b"keep"));
    }

    #[test]
    fn test_remove_of_absent_key_is_refused() {
        let mut filter =
            BloomFilter::new(100, 100, BloomVariant::Counting, HashFamily::XxHash64).unwrap();
        filter.insert(b"present");
        assert!(!filter.remove(b"never-inserted"));
        assert!(filter.may_contain(b"present"));
    }

    #[test]
    fn test_remove_is_noop_on_bit_variants() {
        let mut filter =
            BloomFilter::new(100, 100, BloomVariant::Standard, HashFamily::XxHash64).unwrap();
        filter.insert(b"key");
        assert!(!filter.remove(b"key"));
        assert!(filter.may_contain(b"key"));
    }
}
