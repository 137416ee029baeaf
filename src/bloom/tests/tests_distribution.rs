#[cfg(test)]
mod tests {
    use crate::bloom::HashFamily;

    const INPUTS: usize = 10_000;
    const BUCKETS: usize = 1_000;

    /// Coefficient of variation of bucket counts after hashing `INPUTS`
    /// distinct keys into `BUCKETS` buckets. A uniform hash lands around
    /// 0.32 here; the acceptance bound is 0.4.
    fn coefficient_of_variation(family: HashFamily) -> f64 {
        let mut counts = vec![0u32; BUCKETS];
        for i in 0..INPUTS {
            let key = format!("workload-key-{i:08}");
            let h = family.hash(key.as_bytes(), 0x9E37_79B9);
            counts[(h % BUCKETS as u64) as usize] += 1;
        }

        let mean = INPUTS as f64 / BUCKETS as f64;
        let variance = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / BUCKETS as f64;
        variance.sqrt() / mean
    }

    fn assert_uniform(family: HashFamily) {
        let cv = coefficient_of_variation(family);
        assert!(cv < 0.4, "{family:?} bucket CV too high: {cv:.3}");
    }

    #[test]
    fn test_murmur3_32_distribution() {
        assert_uniform(HashFamily::Murmur3_32);
    }

    #[test]
    fn test_murmur3_64_distribution() {
        assert_uniform(HashFamily::Murmur3_64);
    }

    #[test]
    fn test_fnv1a_32_distribution() {
        assert_uniform(HashFamily::Fnv1a32);
    }

    #[test]
    fn test_fnv1a_64_distribution() {
        assert_uniform(HashFamily::Fnv1a64);
    }

    #[test]
    fn test_xxhash32_distribution() {
        assert_uniform(HashFamily::XxHash32);
    }

    #[test]
    fn test_xxhash64_distribution() {
        assert_uniform(HashFamily::XxHash64);
    }

    #[test]
    fn test_hybrid_distribution() {
        assert_uniform(HashFamily::Hybrid);
    }

    #[test]
    fn test_seeds_produce_independent_digests() {
        let mut collisions = 0;
        for i in 0..1_000 {
            let key = format!("seed-check-{i}");
            let a = HashFamily::XxHash64.hash(key.as_bytes(), 1);
            let b = HashFamily::XxHash64.hash(key.as_bytes(), 2);
            if a == b {
                collisions += 1;
            }
        }
        assert_eq!(collisions, 0);
    }

    #[test]
    fn test_hash_is_deterministic() {
        for family in [
            HashFamily::Murmur3_32,
            HashFamily::Murmur3_64,
            HashFamily::Fnv1a32,
            HashFamily::Fnv1a64,
            HashFamily::XxHash32,
            HashFamily::XxHash64,
            HashFamily::Hybrid,
        ] {
            let a = family.hash(b"stable-input", 42);
            let b = family.hash(b"stable-input", 42);
            assert_eq!(a, b, "{family:?} is not deterministic");
        }
    }
}
