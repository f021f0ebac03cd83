//! Sanitization of tool-sourced text before it reaches a model.

use std::sync::OnceLock;

use regex::Regex;

pub const EMAIL_PLACEHOLDER: &str = "[EMAIL]";
pub const PHONE_PLACEHOLDER: &str = "[PHONE]";

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[\w.-]+@[\w.-]+\.\w+\b").expect("email pattern is a valid regex")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{10,15}\b").expect("phone pattern is a valid regex"))
}

/// Replace email addresses and 10-15 digit runs with fixed placeholders.
///
/// Passes repeat until the text stops changing, so `mask_pii(mask_pii(x)) == mask_pii(x)`.
/// Every changing pass removes at least one `@` or ten digits and adds neither, so the loop
/// terminates.
pub fn mask_pii(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let emails_masked = email_pattern().replace_all(&current, EMAIL_PLACEHOLDER);
        let masked = phone_pattern().replace_all(&emails_masked, PHONE_PLACEHOLDER).into_owned();
        if masked == current {
            return masked;
        }
        current = masked;
    }
}

pub fn contains_pii(text: &str) -> bool {
    email_pattern().is_match(text) || phone_pattern().is_match(text)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{contains_pii, mask_pii};

    #[test]
    fn email_and_phone_are_replaced_and_nothing_else_changes() {
        let masked = mask_pii("Contact jane.doe@example.com or 0612345678 about the villa.");
        assert_eq!(masked, "Contact [EMAIL] or [PHONE] about the villa.");
    }

    #[test]
    fn short_digit_runs_and_prices_are_left_alone() {
        let text = "3 bedrooms, 120 m2, listed at 450000 EUR in 2024";
        assert_eq!(mask_pii(text), text);
        assert!(!contains_pii(text));
    }

    #[test]
    fn overlapping_addresses_reach_a_fixpoint() {
        let once = mask_pii("a@b.c-d@e.f");
        assert_eq!(mask_pii(&once), once);
        assert!(!once.contains('@'));
    }

    #[test]
    fn long_digit_runs_beyond_fifteen_are_not_phone_numbers() {
        let text = "parcel 12345678901234567890";
        assert_eq!(mask_pii(text), text);
    }

    proptest! {
        #[test]
        fn masking_is_idempotent(input in "[a-z0-9@. \\-]{0,64}") {
            let once = mask_pii(&input);
            prop_assert_eq!(mask_pii(&once), once);
        }

        #[test]
        fn masked_text_contains_no_detectable_pii(
            local in "[a-z]{1,8}",
            domain in "[a-z]{1,8}",
            digits in "[0-9]{10,15}",
        ) {
            let input = format!("owner {local}@{domain}.com phone {digits}");
            let masked = mask_pii(&input);
            prop_assert!(!contains_pii(&masked));
        }
    }
}
