#[cfg(test)]
mod tests {
    use crate::bloom::optimal_params;

    #[test]
    fn test_one_percent_parameters() {
        // n = 10_000, p = 0.01 → m ≈ 95_851 bits, k ≈ 7.
        let (m, k) = optimal_params(10_000, 100).unwrap();
        assert!((95_000..97_000).contains(&m), "m = {m}");
        assert_eq!(k, 7);
    }

    #[test]
    fn test_ten_percent_parameters() {
        // n = 1_000, p = 0.1 → m ≈ 4_793 bits, k ≈ 3.
        let (m, k) = optimal_params(1_000, 1_000).unwrap();
        assert!((4_500..5_100).contains(&m), "m = {m}");
        assert_eq!(k, 3);
    }

    #[test]
    fn test_hash_count_clamped_to_sixteen() {
        // An absurdly low target rate would want k > 16.
        let (_, k) = optimal_params(10, 1).unwrap();
        assert!(k <= 16);
    }

    #[test]
    fn test_hash_count_at_least_one() {
        let (_, k) = optimal_params(1_000_000, 9_999).unwrap();
        assert!(k >= 1);
    }

    #[test]
    fn test_minimum_bit_count() {
        let (m, _) = optimal_params(1, 9_999).unwrap();
        assert!(m >= 64);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(optimal_params(0, 100).is_err());
        assert!(optimal_params(100, 0).is_err());
        assert!(optimal_params(100, 10_000).is_err());
    }
}
