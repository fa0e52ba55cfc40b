//! Entropy and digit heuristics used by detectors and the scorer.

/// Shannon entropy of the byte distribution, in bits per byte.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for b in s.bytes() {
        counts[b as usize] += 1;
    }
    let len = s.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Logistic squash centered on `center` with slope `steepness`.
pub fn sigmoid(x: f64, center: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-(x - center) * steepness).exp())
}

/// Whether a run mixes letters and digits, the shape random secrets have.
pub fn has_mixed_classes(s: &str) -> bool {
    let mut letters = false;
    let mut digits = false;
    for c in s.chars() {
        letters |= c.is_ascii_alphabetic();
        digits |= c.is_ascii_digit();
        if letters && digits {
            return true;
        }
    }
    false
}

/// Luhn checksum over the digits of `s`, ignoring spaces and dashes.
/// Used as a confidence signal for card-like digit runs, never as a gate.
pub fn luhn_valid(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_run_is_zero() {
        assert_eq!(shannon_entropy("aaaaaaaa"), 0.0);
    }

    #[test]
    fn entropy_grows_with_variety() {
        let low = shannon_entropy("aaaabbbb");
        let high = shannon_entropy("a8Fk2qZ9xW4mP7vL");
        assert!(low < high);
        assert!(high > 3.5);
    }

    #[test]
    fn entropy_of_empty_is_zero() {
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn sigmoid_is_monotonic_around_center() {
        assert!(sigmoid(3.0, 4.0, 3.0) < 0.5);
        assert!(sigmoid(5.0, 4.0, 3.0) > 0.5);
        assert!((sigmoid(4.0, 4.0, 3.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mixed_classes_requires_both() {
        assert!(has_mixed_classes("abc123"));
        assert!(!has_mixed_classes("abcdef"));
        assert!(!has_mixed_classes("123456"));
    }

    #[test]
    fn luhn_accepts_valid_test_number() {
        // Standard test card number.
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("1234"));
    }
}
