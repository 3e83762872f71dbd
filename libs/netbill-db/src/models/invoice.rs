use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

crate::string_enum!(InvoiceStatus {
    Draft => "draft",
    Pending => "pending",
    Paid => "paid",
    Overdue => "overdue",
    Cancelled => "cancelled",
});

crate::string_enum!(PaymentMethod {
    Cash => "cash",
    BankTransfer => "bank_transfer",
    Collector => "collector",
    Gateway => "gateway",
    Adjustment => "adjustment",
});

impl InvoiceStatus {
    /// Statuses that still expect money.
    pub fn is_open(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Pending | InvoiceStatus::Overdue)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub invoice_number: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub paid_amount: i64,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn outstanding(&self) -> i64 {
        (self.total_amount - self.paid_amount).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price: i64,
}

impl NewInvoiceItem {
    pub fn amount(&self) -> i64 {
        self.unit_price * self.quantity as i64
    }
}

/// Fully computed invoice ready for insertion.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub currency: String,
    pub notes: Option<String>,
    pub items: Vec<NewInvoiceItem>,
}

impl NewInvoice {
    /// Nothing to collect once discounts cover the subtotal, so such an invoice opens paid.
    pub fn opening_status(&self) -> InvoiceStatus {
        if self.total_amount <= 0 { InvoiceStatus::Paid } else { InvoiceStatus::Pending }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub collector_id: Option<Uuid>,
    pub notes: Option<String>,
    pub received_at: DateTime<Utc>,
    pub created_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub amount: i64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub collector_id: Option<Uuid>,
    pub notes: Option<String>,
    pub received_at: DateTime<Utc>,
    pub created_by_user_id: Uuid,
}

/// Month key used in invoice numbers: `YYYYMM`.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y%m").to_string()
}

/// `INV-YYYYMM-NNNN`.
pub fn format_invoice_number(month_key: &str, sequence: i64) -> String {
    format!("INV-{}-{:04}", month_key, sequence)
}

/// Aggregate row for the monthly summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct InvoiceStatusTotals {
    pub status: String,
    pub count: i64,
    pub total_amount: i64,
    pub paid_amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_number_is_zero_padded() {
        let key = month_key(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap());
        assert_eq!(format_invoice_number(&key, 1), "INV-202603-0001");
        assert_eq!(format_invoice_number(&key, 12345), "INV-202603-12345");
    }

    fn new_invoice(total_amount: i64) -> NewInvoice {
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        NewInvoice {
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            period_start: day,
            period_end: day,
            due_date: day,
            subtotal: 50_000,
            tax_amount: 0,
            discount_amount: 50_000 - total_amount,
            total_amount,
            currency: "IDR".into(),
            notes: None,
            items: Vec::new(),
        }
    }

    #[test]
    fn fully_discounted_invoice_opens_paid() {
        assert_eq!(new_invoice(0).opening_status(), InvoiceStatus::Paid);
        assert_eq!(new_invoice(1).opening_status(), InvoiceStatus::Pending);
    }

    #[test]
    fn item_amount_multiplies_quantity() {
        let item = NewInvoiceItem { description: "Internet 20Mbps".into(), quantity: 2, unit_price: 75_000 };
        assert_eq!(item.amount(), 150_000);
    }
}
