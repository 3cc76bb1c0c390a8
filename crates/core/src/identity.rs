//! Quote identity and validity assignment.
//!
//! Both values are computed exactly once, right after a new quote's first
//! insert, from the creation date passed in by the caller. Nothing here
//! reads ambient time.

use chrono::{Datelike, NaiveDate};

use crate::domain::quote::QuoteReference;
use crate::errors::DomainError;

/// Quotes expire at the end of the month they were created in. When the
/// month end is less than 5 days away the window would be uselessly short,
/// so validity rolls over to the 15th of the following month instead
/// (December rolls into January of the next year).
pub fn valid_until(created_on: NaiveDate) -> NaiveDate {
    let last_day = last_day_of_month(created_on);
    if (last_day - created_on).num_days() < 5 {
        let (year, month) = following_month(created_on);
        ymd(year, month, 15)
    } else {
        last_day
    }
}

/// Builds the `BIT-<initials>-<YYMMDD>-<seq>` reference: upper-cased first
/// letters of the owner's given and family names, the creation date, and
/// the quote's numeric sequence zero-padded to 5 digits.
pub fn quote_reference(
    first_name: &str,
    last_name: &str,
    created_on: NaiveDate,
    sequence: i64,
) -> Result<QuoteReference, DomainError> {
    let initials = owner_initials(first_name, last_name)?;
    Ok(reference_from_initials(&initials, created_on, sequence))
}

/// The 2-letter initials code, validated separately so a quote creation can
/// fail on a nameless owner before anything is persisted.
pub fn owner_initials(first_name: &str, last_name: &str) -> Result<String, DomainError> {
    let first = first_name.trim().chars().next().ok_or(DomainError::MissingActorName)?;
    let last = last_name.trim().chars().next().ok_or(DomainError::MissingActorName)?;
    Ok(first.to_uppercase().chain(last.to_uppercase()).collect())
}

pub fn reference_from_initials(
    initials: &str,
    created_on: NaiveDate,
    sequence: i64,
) -> QuoteReference {
    let date = created_on.format("%y%m%d");
    QuoteReference(format!("BIT-{initials}-{date}-{sequence:05}"))
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = following_month(date);
    ymd(year, month, 1).pred_opt().unwrap_or(date)
}

fn following_month(date: NaiveDate) -> (i32, u32) {
    if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    // Only called with day 1 or 15 of a real month.
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{quote_reference, valid_until};
    use crate::errors::DomainError;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
    }

    #[test]
    fn validity_is_month_end_when_enough_days_remain() {
        assert_eq!(valid_until(date(2025, 1, 10)), date(2025, 1, 31));
        assert_eq!(valid_until(date(2025, 1, 26)), date(2025, 1, 31));
    }

    #[test]
    fn validity_rolls_to_the_fifteenth_when_month_end_is_close() {
        // Jan 28: 3 days to month end.
        assert_eq!(valid_until(date(2025, 1, 28)), date(2025, 2, 15));
        assert_eq!(valid_until(date(2025, 1, 31)), date(2025, 2, 15));
    }

    #[test]
    fn validity_rolls_from_december_into_the_next_year() {
        assert_eq!(valid_until(date(2025, 12, 29)), date(2026, 1, 15));
    }

    #[test]
    fn validity_handles_leap_februaries() {
        assert_eq!(valid_until(date(2024, 2, 10)), date(2024, 2, 29));
        assert_eq!(valid_until(date(2024, 2, 27)), date(2024, 3, 15));
    }

    #[test]
    fn reference_matches_documented_format() {
        let reference = quote_reference("Maria", "Garcia", date(2025, 10, 28), 16)
            .expect("reference for a named owner");
        assert_eq!(reference.0, "BIT-MG-251028-00016");
    }

    #[test]
    fn reference_upper_cases_initials() {
        let reference = quote_reference("ana", "lopez", date(2026, 3, 2), 7)
            .expect("reference for a named owner");
        assert_eq!(reference.0, "BIT-AL-260302-00007");
    }

    #[test]
    fn reference_requires_both_name_parts() {
        let error = quote_reference("", "Garcia", date(2025, 10, 28), 16)
            .expect_err("empty given name must be rejected");
        assert_eq!(error, DomainError::MissingActorName);

        let error = quote_reference("Maria", "   ", date(2025, 10, 28), 16)
            .expect_err("blank family name must be rejected");
        assert_eq!(error, DomainError::MissingActorName);
    }
}
