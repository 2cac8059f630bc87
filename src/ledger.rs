// src/ledger.rs
//
// Money totals over clinic transactions. Amounts are integer cents.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Refund,
    Expense,
}

impl TransactionType {
    pub const ALL: [TransactionType; 3] = [
        TransactionType::Payment,
        TransactionType::Refund,
        TransactionType::Expense,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Refund => "refund",
            TransactionType::Expense => "expense",
        }
    }

    pub fn parse(field: &str, s: &str) -> Result<Self, ApiError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ApiError::validation(format!("{field} must be one of payment, refund, expense")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    CreditCard,
    Easypaisa,
    Jazzcash,
    Insurance,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 6] = [
        PaymentMethod::Cash,
        PaymentMethod::BankTransfer,
        PaymentMethod::CreditCard,
        PaymentMethod::Easypaisa,
        PaymentMethod::Jazzcash,
        PaymentMethod::Insurance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::Easypaisa => "easypaisa",
            PaymentMethod::Jazzcash => "jazzcash",
            PaymentMethod::Insurance => "insurance",
        }
    }

    pub fn parse(field: &str, s: &str) -> Result<Self, ApiError> {
        Self::ALL.into_iter().find(|m| m.as_str() == s).ok_or_else(|| {
            let names: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
            ApiError::validation(format!("{field} must be one of {}", names.join(", ")))
        })
    }
}

/// The fields the reports read from a stored transaction.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub kind: TransactionType,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub transaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TypeTotal {
    pub count: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_payments_cents: i64,
    pub total_refunds_cents: i64,
    pub total_expenses_cents: i64,
    /// payments - refunds - expenses
    pub net_income_cents: i64,
    pub transaction_count: i64,
    pub payment_methods: BTreeMap<PaymentMethod, i64>,
    pub transaction_types: BTreeMap<TransactionType, TypeTotal>,
}

pub fn summarize(entries: &[LedgerEntry]) -> Summary {
    let mut s = Summary::default();

    for e in entries {
        match e.kind {
            TransactionType::Payment => s.total_payments_cents += e.amount_cents,
            TransactionType::Refund => s.total_refunds_cents += e.amount_cents,
            TransactionType::Expense => s.total_expenses_cents += e.amount_cents,
        }
        *s.payment_methods.entry(e.method).or_default() += e.amount_cents;
        let t = s.transaction_types.entry(e.kind).or_default();
        t.count += 1;
        t.amount_cents += e.amount_cents;
    }

    s.transaction_count = entries.len() as i64;
    s.net_income_cents = s.total_payments_cents - s.total_refunds_cents - s.total_expenses_cents;
    s
}

/* -------------------------
   Bucketed reports
--------------------------*/

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub payments_cents: i64,
    pub expenses_cents: i64,
    pub refunds_cents: i64,
    pub count: i64,
}

impl Bucket {
    fn add(&mut self, e: &LedgerEntry) {
        self.count += 1;
        match e.kind {
            TransactionType::Payment => self.payments_cents += e.amount_cents,
            TransactionType::Expense => self.expenses_cents += e.amount_cents,
            TransactionType::Refund => self.refunds_cents += e.amount_cents,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub total_transactions: i64,
    pub total_payments_cents: i64,
    pub total_expenses_cents: i64,
    pub total_refunds_cents: i64,
}

impl ReportTotals {
    fn of(entries: &[LedgerEntry]) -> Self {
        let mut all = Bucket::default();
        entries.iter().for_each(|e| all.add(e));
        Self {
            total_transactions: all.count,
            total_payments_cents: all.payments_cents,
            total_expenses_cents: all.expenses_cents,
            total_refunds_cents: all.refunds_cents,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HourBucket {
    /// "HH:00"
    pub hour: String,
    #[serde(flatten)]
    pub totals: Bucket,
}

#[derive(Debug, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub hourly: Vec<HourBucket>,
    pub summary: ReportTotals,
}

/// 24 buckets keyed by the hour each transaction was recorded (UTC).
/// Entries dated on other days are ignored.
pub fn daily_report(date: NaiveDate, entries: &[LedgerEntry]) -> DailyReport {
    let on_day: Vec<LedgerEntry> = entries
        .iter()
        .filter(|e| e.transaction_date == date)
        .cloned()
        .collect();

    let mut hourly: Vec<HourBucket> = (0..24)
        .map(|h| HourBucket {
            hour: format!("{h:02}:00"),
            totals: Bucket::default(),
        })
        .collect();

    for e in &on_day {
        hourly[e.created_at.hour() as usize].totals.add(e);
    }

    DailyReport {
        date,
        hourly,
        summary: ReportTotals::of(&on_day),
    }
}

#[derive(Debug, Serialize)]
pub struct DayBucket {
    pub day: u32,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub totals: Bucket,
}

#[derive(Debug, Serialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    pub daily: Vec<DayBucket>,
    pub summary: ReportTotals,
}

/// First and last calendar day of the month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ApiError::validation("year/month is not a valid month"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let last = next
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| ApiError::validation("year/month is out of range"))?;
    Ok((first, last))
}

/// One bucket per calendar day, keyed by transaction date.
pub fn monthly_report(year: i32, month: u32, entries: &[LedgerEntry]) -> Result<MonthlyReport, ApiError> {
    let (first, last) = month_bounds(year, month)?;

    let in_month: Vec<LedgerEntry> = entries
        .iter()
        .filter(|e| e.transaction_date >= first && e.transaction_date <= last)
        .cloned()
        .collect();

    let mut daily: Vec<DayBucket> = first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|date| DayBucket {
            day: date.day(),
            date,
            totals: Bucket::default(),
        })
        .collect();

    for e in &in_month {
        let idx = e.transaction_date.day0() as usize;
        daily[idx].totals.add(e);
    }

    Ok(MonthlyReport {
        year,
        month,
        daily,
        summary: ReportTotals::of(&in_month),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(kind: TransactionType, method: PaymentMethod, cents: i64, day: u32, hour: u32) -> LedgerEntry {
        LedgerEntry {
            kind,
            method,
            amount_cents: cents,
            transaction_date: NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
            created_at: Utc.with_ymd_and_hms(2026, 2, day, hour, 15, 0).unwrap(),
        }
    }

    fn sample() -> Vec<LedgerEntry> {
        use PaymentMethod::*;
        use TransactionType::*;
        vec![
            entry(Payment, Cash, 5_000, 3, 9),
            entry(Payment, CreditCard, 12_500, 3, 9),
            entry(Refund, Cash, 1_000, 3, 14),
            entry(Expense, BankTransfer, 3_000, 27, 11),
            entry(Payment, Jazzcash, 2_000, 28, 17),
        ]
    }

    #[test]
    fn summary_totals_and_net_income() {
        let s = summarize(&sample());
        assert_eq!(s.total_payments_cents, 19_500);
        assert_eq!(s.total_refunds_cents, 1_000);
        assert_eq!(s.total_expenses_cents, 3_000);
        assert_eq!(s.net_income_cents, 15_500);
        assert_eq!(s.transaction_count, 5);
        assert_eq!(s.payment_methods[&PaymentMethod::Cash], 6_000);
        assert_eq!(
            s.transaction_types[&TransactionType::Payment],
            TypeTotal { count: 3, amount_cents: 19_500 }
        );
        assert!(!s.payment_methods.contains_key(&PaymentMethod::Insurance));
    }

    #[test]
    fn empty_summary_is_zero() {
        assert_eq!(summarize(&[]), Summary::default());
    }

    #[test]
    fn summary_serializes_snake_case_keys() {
        let v = serde_json::to_value(summarize(&sample())).unwrap();
        assert_eq!(v["payment_methods"]["credit_card"], 12_500);
        assert_eq!(v["transaction_types"]["refund"]["count"], 1);
    }

    #[test]
    fn daily_report_buckets_by_creation_hour() {
        let r = daily_report(NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(), &sample());
        assert_eq!(r.hourly.len(), 24);
        assert_eq!(r.hourly[9].hour, "09:00");
        assert_eq!(r.hourly[9].totals.count, 2);
        assert_eq!(r.hourly[9].totals.payments_cents, 17_500);
        assert_eq!(r.hourly[14].totals.refunds_cents, 1_000);
        assert_eq!(r.summary.total_transactions, 3);
        assert_eq!(r.summary.total_expenses_cents, 0);
    }

    #[test]
    fn monthly_report_has_one_bucket_per_day() {
        let r = monthly_report(2026, 2, &sample()).unwrap();
        assert_eq!(r.daily.len(), 28);
        assert_eq!(r.daily[0].date, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(r.daily[2].totals.count, 3);
        assert_eq!(r.daily[26].totals.expenses_cents, 3_000);
        assert_eq!(r.daily[27].day, 28);
        assert_eq!(r.summary.total_payments_cents, 19_500);

        assert_eq!(monthly_report(2024, 2, &[]).unwrap().daily.len(), 29);
        assert_eq!(monthly_report(2026, 12, &[]).unwrap().daily.len(), 31);
    }

    #[test]
    fn invalid_months_are_rejected() {
        assert!(month_bounds(2026, 0).is_err());
        assert!(month_bounds(2026, 13).is_err());
    }

    #[test]
    fn enum_parsing() {
        assert_eq!(TransactionType::parse("transaction_type", "refund").unwrap(), TransactionType::Refund);
        assert!(TransactionType::parse("transaction_type", "gift").is_err());
        assert_eq!(
            PaymentMethod::parse("payment_method", "bank_transfer").unwrap(),
            PaymentMethod::BankTransfer
        );
        assert!(PaymentMethod::parse("payment_method", "cheque").is_err());
    }
}
