//! Three-phase collector cash flow: field visit, setoran, bank deposit.

use std::sync::Arc;

use anyhow::Context;
use netbill_db::models::collector::{CollectorVisit, VisitStatus};
use netbill_db::models::invoice::{Invoice, PaymentMethod};
use netbill_db::repositories::collector_repo::CollectorRepository;
use netbill_db::repositories::invoice_repo::InvoiceRepository;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::billing_service::{BillingError, BillingService, RecordPaymentInput, check_payment};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct VisitInput {
    pub invoice_id: Uuid,
    pub amount: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisitBatch {
    pub visit_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitFailure {
    pub visit_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SetoranReport {
    pub confirmed: Vec<CollectorVisit>,
    pub failed: Vec<VisitFailure>,
    pub reactivated_clients: Vec<Uuid>,
}

/// A field visit may not promise more cash than the invoice still lacks,
/// counting visits not yet handed over.
pub fn check_visit(invoice: &Invoice, awaiting_setoran: i64, amount: i64) -> Result<(), BillingError> {
    if amount <= 0 {
        return Err(BillingError::InvalidInput("amount must be positive".into()));
    }
    check_payment(invoice, invoice.paid_amount + awaiting_setoran, amount, PaymentMethod::Collector).map(|_| ())
}

/// Phase 3 only accepts visits whose cash already reached the office.
pub fn check_reconcilable(visit: &CollectorVisit) -> AppResult<()> {
    if visit.status.next() != Some(VisitStatus::Reconciled) {
        return Err(AppError::Conflict(format!(
            "visit {} is {} and cannot be reconciled",
            visit.id, visit.status
        )));
    }
    Ok(())
}

pub struct CollectorService {
    visits: CollectorRepository,
    invoices: InvoiceRepository,
    billing: Arc<BillingService>,
}

impl CollectorService {
    pub fn new(visits: CollectorRepository, invoices: InvoiceRepository, billing: Arc<BillingService>) -> Self {
        Self {
            visits,
            invoices,
            billing,
        }
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<VisitStatus>,
        collector_id: Option<Uuid>,
    ) -> AppResult<Vec<CollectorVisit>> {
        Ok(self.visits.list(tenant_id, status, collector_id).await?)
    }

    /// Phase 1: cash collected in the field. No payment exists yet.
    pub async fn visit_success(&self, tenant_id: Uuid, collector_id: Uuid, input: VisitInput) -> AppResult<CollectorVisit> {
        let invoice = self
            .invoices
            .get(tenant_id, input.invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound)?;
        let awaiting = self.visits.pending_amount_for_invoice(tenant_id, invoice.id).await?;
        check_visit(&invoice, awaiting, input.amount)?;

        let visit = self
            .visits
            .create_visit(
                tenant_id,
                collector_id,
                invoice.id,
                invoice.client_id,
                input.amount,
                input.notes.as_deref(),
            )
            .await?;
        info!(
            "Collector {} collected {} for invoice {}",
            collector_id, visit.amount, invoice.invoice_number
        );
        Ok(visit)
    }

    /// Phase 2: admin confirms the hand-over. Each visit settles in its own
    /// transaction; a failing visit is reported and stays `collected`.
    pub async fn confirm_setoran(&self, tenant_id: Uuid, admin_id: Uuid, visit_ids: &[Uuid]) -> AppResult<SetoranReport> {
        if visit_ids.is_empty() {
            return Err(AppError::InputInvalid("visit_ids must not be empty".into()));
        }
        let mut report = SetoranReport::default();

        for &visit_id in visit_ids {
            match self.deposit_one(tenant_id, admin_id, visit_id).await {
                Ok((visit, settled)) => {
                    if let Some(invoice) = settled {
                        if self.billing.after_paid(&invoice).await {
                            report.reactivated_clients.push(invoice.client_id);
                        }
                    }
                    report.confirmed.push(visit);
                }
                Err(e) => {
                    warn!("Setoran for visit {} rejected: {}", visit_id, e);
                    report.failed.push(VisitFailure {
                        visit_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Setoran confirmed by {}: {} ok, {} failed",
            admin_id,
            report.confirmed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn deposit_one(
        &self,
        tenant_id: Uuid,
        admin_id: Uuid,
        visit_id: Uuid,
    ) -> AppResult<(CollectorVisit, Option<Invoice>)> {
        let mut tx = self
            .visits
            .pool()
            .begin()
            .await
            .context("Failed to open setoran transaction")?;

        let visit = self
            .visits
            .get_for_update_tx(&mut tx, tenant_id, visit_id)
            .await?
            .ok_or_else(|| AppError::NotFound("collector visit not found".into()))?;
        if visit.status != VisitStatus::Collected {
            return Err(AppError::Conflict(format!("visit is already {}", visit.status)));
        }

        let input = RecordPaymentInput {
            invoice_id: visit.invoice_id,
            amount: visit.amount,
            method: PaymentMethod::Collector,
            reference: Some(format!("visit:{}", visit.id)),
            notes: visit.notes.clone(),
            received_at: Some(visit.visited_at),
            collector_id: Some(visit.collector_id),
        };
        let (payment, invoice, settled) = self.billing.apply_payment_tx(&mut tx, tenant_id, &input, admin_id).await?;
        let visit = self.visits.mark_deposited_tx(&mut tx, visit.id, admin_id, payment.id).await?;
        tx.commit().await.context("Failed to commit setoran")?;

        Ok((visit, settled.then_some(invoice)))
    }

    /// Phase 3: finance confirms the bank deposit. All visits must be
    /// `deposited`; otherwise nothing changes.
    pub async fn confirm_deposit(&self, tenant_id: Uuid, finance_id: Uuid, visit_ids: &[Uuid]) -> AppResult<Vec<CollectorVisit>> {
        if visit_ids.is_empty() {
            return Err(AppError::InputInvalid("visit_ids must not be empty".into()));
        }
        for &visit_id in visit_ids {
            let visit = self
                .visits
                .get(tenant_id, visit_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("collector visit {} not found", visit_id)))?;
            check_reconcilable(&visit)?;
        }

        let mut reconciled = Vec::with_capacity(visit_ids.len());
        for &visit_id in visit_ids {
            let visit = self
                .visits
                .mark_reconciled(tenant_id, visit_id, finance_id)
                .await?
                .ok_or_else(|| AppError::Conflict(format!("visit {} changed concurrently", visit_id)))?;
            reconciled.push(visit);
        }
        info!("💰 {} visits reconciled by {}", reconciled.len(), finance_id);
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use netbill_db::models::invoice::InvoiceStatus;

    use super::*;

    fn invoice(total: i64, paid: i64, status: InvoiceStatus) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            invoice_number: "INV-202603-0001".into(),
            period_start: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            subtotal: total,
            tax_amount: 0,
            discount_amount: 0,
            total_amount: total,
            paid_amount: paid,
            currency: "IDR".into(),
            status,
            paid_at: None,
            notes: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn visit(status: VisitStatus) -> CollectorVisit {
        CollectorVisit {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            collector_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            amount: 50_000,
            status,
            notes: None,
            visited_at: Utc::now(),
            deposited_at: None,
            deposit_confirmed_by: None,
            reconciled_at: None,
            reconciled_by: None,
            payment_id: None,
        }
    }

    #[test]
    fn visits_count_cash_awaiting_setoran() {
        let inv = invoice(150_000, 50_000, InvoiceStatus::Pending);
        assert!(check_visit(&inv, 0, 100_000).is_ok());
        assert!(matches!(
            check_visit(&inv, 60_000, 50_000),
            Err(BillingError::Overpayment { outstanding: 40_000 })
        ));
    }

    #[test]
    fn visits_reject_closed_invoices_and_bad_amounts() {
        assert!(matches!(
            check_visit(&invoice(100_000, 100_000, InvoiceStatus::Paid), 0, 1),
            Err(BillingError::InvoiceAlreadyPaid)
        ));
        assert!(matches!(
            check_visit(&invoice(100_000, 0, InvoiceStatus::Cancelled), 0, 1),
            Err(BillingError::InvoiceCancelled)
        ));
        assert!(matches!(
            check_visit(&invoice(100_000, 0, InvoiceStatus::Pending), 0, -5),
            Err(BillingError::InvalidInput(_))
        ));
    }

    #[test]
    fn only_deposited_visits_reconcile() {
        assert!(check_reconcilable(&visit(VisitStatus::Deposited)).is_ok());
        for status in [VisitStatus::Collected, VisitStatus::Reconciled] {
            let err = check_reconcilable(&visit(status)).unwrap_err();
            assert_eq!(err.code(), "conflict");
        }
    }
}
