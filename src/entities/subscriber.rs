// 📱 Subscriber Entity - one billable line attached to a BAN
//
// Natural key: (phone, owning BAN).

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberDraft {
    pub phone: Option<String>,
    pub plan: Option<String>,

    /// 0 when blank or not numeric.
    pub monthly_value: f64,
    pub remaining_payments: i64,
    pub contract_term: i64,

    /// `YYYY-MM-DD` when the cell held a recognizable date, otherwise the
    /// trimmed cell text.
    pub contract_end_date: Option<String>,
}

impl SubscriberDraft {
    /// Fixed-line products (FIJO, MPLS) have no device contract.
    pub fn is_fixed_line(&self) -> bool {
        self.plan
            .as_deref()
            .map(|plan| {
                let upper = plan.to_uppercase();
                upper.contains("FIJO") || upper.contains("MPLS")
            })
            .unwrap_or(false)
    }

    /// Fill a missing contract end date from the remaining payments,
    /// counted from the first day of `reference`'s month.
    pub fn derive_contract_end(&mut self, reference: NaiveDate) {
        if self.contract_end_date.is_some() || self.is_fixed_line() {
            return;
        }

        if let Some(end) = contract_end_from_payments(self.remaining_payments, reference) {
            self.contract_end_date = Some(end.format("%Y-%m-%d").to_string());
        }
    }
}

/// First of `reference`'s month plus `remaining` months. None when there is
/// nothing left to pay.
pub fn contract_end_from_payments(remaining: i64, reference: NaiveDate) -> Option<NaiveDate> {
    if remaining <= 0 {
        return None;
    }

    let months = u32::try_from(remaining).ok()?;
    let month_start = reference.with_day(1)?;
    month_start.checked_add_months(Months::new(months))
}

/// A persisted subscriber row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    pub id: i64,
    pub ban_id: i64,
    pub phone: String,
    pub plan: Option<String>,
    pub monthly_value: f64,
    pub remaining_payments: i64,
    pub contract_term: i64,
    pub contract_end_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_contract_end_from_payments() {
        assert_eq!(
            contract_end_from_payments(12, date(2025, 3, 17)),
            Some(date(2026, 3, 1))
        );
        assert_eq!(contract_end_from_payments(0, date(2025, 3, 17)), None);
        assert_eq!(contract_end_from_payments(-2, date(2025, 3, 17)), None);
    }

    #[test]
    fn test_derive_skips_fixed_line_plans() {
        let mut sub = SubscriberDraft {
            phone: Some("7875550001".to_string()),
            plan: Some("Internet Fijo 50M".to_string()),
            remaining_payments: 6,
            ..Default::default()
        };

        sub.derive_contract_end(date(2025, 1, 10));
        assert_eq!(sub.contract_end_date, None);

        sub.plan = Some("MPLS CORP".to_string());
        sub.derive_contract_end(date(2025, 1, 10));
        assert_eq!(sub.contract_end_date, None);
    }

    #[test]
    fn test_derive_keeps_explicit_date() {
        let mut sub = SubscriberDraft {
            plan: Some("VOLT412".to_string()),
            remaining_payments: 6,
            contract_end_date: Some("2027-01-01".to_string()),
            ..Default::default()
        };

        sub.derive_contract_end(date(2025, 1, 10));
        assert_eq!(sub.contract_end_date.as_deref(), Some("2027-01-01"));
    }

    #[test]
    fn test_derive_fills_missing_date() {
        let mut sub = SubscriberDraft {
            plan: Some("VOLT412".to_string()),
            remaining_payments: 6,
            ..Default::default()
        };

        sub.derive_contract_end(date(2025, 1, 10));
        assert_eq!(sub.contract_end_date.as_deref(), Some("2025-07-01"));

        println!("✅ Contract end date derived from remaining payments");
    }
}
