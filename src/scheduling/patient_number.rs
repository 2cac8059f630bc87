// src/scheduling/patient_number.rs

pub const FIRST_PATIENT_NUMBER: &str = "P000001";

/// Next clinic-scoped patient number after `last`, the number of the clinic's
/// most recently created patient.
///
/// Non-digit characters are stripped before parsing. A previous number with no
/// digits at all restarts the sequence at `P000001`. Arbitrarily long digit
/// runs keep incrementing rather than restarting.
pub fn next_patient_number(last: Option<&str>) -> String {
    let Some(last) = last else {
        return FIRST_PATIENT_NUMBER.to_string();
    };

    let digits: String = last.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        tracing::warn!(previous = last, "patient number has no digits, restarting sequence");
        return FIRST_PATIENT_NUMBER.to_string();
    }
    match digits.parse::<u128>() {
        Ok(n) => format!("P{:06}", n.saturating_add(1)),
        // Beyond u128: bump the decimal string itself.
        Err(_) => format!("P{}", increment_decimal(&digits)),
    }
}

fn increment_decimal(digits: &str) -> String {
    let mut out: Vec<u8> = digits.bytes().collect();
    for b in out.iter_mut().rev() {
        if *b == b'9' {
            *b = b'0';
        } else {
            *b += 1;
            return String::from_utf8_lossy(&out).into_owned();
        }
    }
    format!("1{}", String::from_utf8_lossy(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_patient_gets_p000001() {
        assert_eq!(next_patient_number(None), "P000001");
    }

    #[test]
    fn increments_and_repads() {
        assert_eq!(next_patient_number(Some("P000041")), "P000042");
        assert_eq!(next_patient_number(Some("P000099")), "P000100");
    }

    #[test]
    fn strips_non_digits_before_parsing() {
        assert_eq!(next_patient_number(Some("PX-0007")), "P000008");
    }

    #[test]
    fn grows_past_six_digits_instead_of_wrapping() {
        assert_eq!(next_patient_number(Some("P999999")), "P1000000");
    }

    #[test]
    fn digitless_previous_number_restarts() {
        assert_eq!(next_patient_number(Some("legacy")), "P000001");
    }

    #[test]
    fn very_long_numbers_keep_counting() {
        assert_eq!(
            next_patient_number(Some("P12345678901234567890")),
            "P12345678901234567891"
        );
        let past_u128 = format!("P{}", "9".repeat(40));
        assert_eq!(next_patient_number(Some(&past_u128)), format!("P1{}", "0".repeat(40)));
    }
}
