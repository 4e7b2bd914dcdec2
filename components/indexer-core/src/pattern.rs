//! Bitmap pattern derivation for the (out-of-scope) visualization collaborator
//! (spec 6). Each accepted bitmap's enclosing block maps its transaction
//! output values to a compact digit string via value-bucketing.

use crate::models::BitmapPattern;

/// `bucket(v) = 1 if v·10⁻⁸ ≤ 10⁻²; 2 if ≤ 0.1; 3 if ≤ 1; 4 if ≤ 10;
/// 5 if ≤ 10²; 6 if ≤ 10³; 7 if ≤ 10⁴; 8 if ≤ 10⁵; 9 if ≤ 10⁶; 9 if >10⁶;
/// 1 if value is exactly 0` (spec 6). `v` is a satoshi amount; `v·10⁻⁸` is
/// the amount in whole bitcoin.
pub fn bucket(value_sats: u64) -> u8 {
    if value_sats == 0 {
        return 1;
    }
    let btc = value_sats as f64 * 1e-8;
    if btc <= 1e-2 {
        1
    } else if btc <= 0.1 {
        2
    } else if btc <= 1.0 {
        3
    } else if btc <= 10.0 {
        4
    } else if btc <= 1e2 {
        5
    } else if btc <= 1e3 {
        6
    } else if btc <= 1e4 {
        7
    } else if btc <= 1e5 {
        8
    } else {
        9
    }
}

/// Derives the pattern string for a bitmap claim from the enclosing block's
/// transaction output values, in block order.
pub fn derive_pattern(bitmap_number: u64, transaction_values: &[u64]) -> BitmapPattern {
    let squares: Vec<u8> = transaction_values.iter().copied().map(bucket).collect();
    let pattern_string: String = squares.iter().map(|d| d.to_string()).collect();
    BitmapPattern {
        bitmap_number,
        pattern_string,
        squares,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 1 ; "exactly zero")]
    #[test_case(1_000_000, 1 ; "one million sats is 0.01 btc, boundary included")]
    #[test_case(2_000_000, 2 ; "0.02 btc")]
    #[test_case(10_000_000, 3 ; "0.1 btc boundary included")]
    #[test_case(100_000_000, 3 ; "1 btc boundary included")]
    #[test_case(1_000_000_000, 4 ; "10 btc boundary included")]
    #[test_case(10_000_000_000, 5 ; "100 btc boundary included")]
    #[test_case(100_000_000_000, 6 ; "1000 btc boundary included")]
    #[test_case(1_000_000_000_000, 7 ; "10000 btc boundary included")]
    #[test_case(10_000_000_000_000, 8 ; "100000 btc boundary included")]
    #[test_case(100_000_000_000_000, 9 ; "1000000 btc boundary included")]
    #[test_case(1_000_000_000_000_000, 9 ; "above 1000000 btc stays 9")]
    fn bucket_matches_thresholds(sats: u64, expected: u8) {
        assert_eq!(bucket(sats), expected);
    }

    #[test]
    fn derive_pattern_keeps_squares_and_string_in_sync() {
        let pattern = derive_pattern(840_000, &[0, 50_000_000, 2_000_000_000]);
        assert_eq!(pattern.pattern_string, "134");
        assert_eq!(pattern.squares, vec![1, 3, 4]);
    }
}
