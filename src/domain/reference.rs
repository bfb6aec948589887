use chrono::NaiveDate;
use rand::Rng;

const PREFIX: &str = "BB";
const SUFFIX_LEN: usize = 4;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Human-readable voucher codes: `BB-YYMMDD-XXXX`.
pub struct ReferenceNumber;

impl ReferenceNumber {
    /// One candidate; the caller re-rolls until it is unused.
    pub fn generate<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> String {
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!("{}-{}-{}", PREFIX, date.format("%y%m%d"), suffix)
    }

    pub fn is_well_formed(reference: &str) -> bool {
        let parts: Vec<&str> = reference.split('-').collect();
        match parts.as_slice() {
            [prefix, date, suffix] => {
                *prefix == PREFIX
                    && date.len() == 6
                    && date.chars().all(|c| c.is_ascii_digit())
                    && suffix.len() == SUFFIX_LEN
                    && suffix
                        .chars()
                        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            }
            _ => false,
        }
    }

    /// Normalise what staff type at the counter.
    pub fn normalize(input: &str) -> String {
        input.trim().to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_generate_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let reference = ReferenceNumber::generate(date, &mut rng);
            assert!(reference.starts_with("BB-250310-"), "{}", reference);
            assert!(ReferenceNumber::is_well_formed(&reference), "{}", reference);
        }
    }

    #[test]
    fn test_suffixes_vary() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let mut rng = rand::thread_rng();
        let seen: HashSet<String> = (0..50)
            .map(|_| ReferenceNumber::generate(date, &mut rng))
            .collect();
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_is_well_formed() {
        assert!(ReferenceNumber::is_well_formed("BB-250310-AB12"));
        assert!(!ReferenceNumber::is_well_formed("BB-250310-ab12"));
        assert!(!ReferenceNumber::is_well_formed("XX-250310-AB12"));
        assert!(!ReferenceNumber::is_well_formed("BB-25031-AB12"));
        assert!(!ReferenceNumber::is_well_formed("BB-250310-AB123"));
        assert!(!ReferenceNumber::is_well_formed("BB250310AB12"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(ReferenceNumber::normalize("  bb-250310-ab12 "), "BB-250310-AB12");
    }
}
