use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use netbill_db::models::client::{Client, ClientStatus, ISOLIR_REASON_OVERDUE};
use netbill_db::repositories::client_repo::ClientRepository;
use netbill_db::repositories::invoice_repo::InvoiceRepository;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Client reads and guarded status writes used by the controller.
#[async_trait]
pub trait ClientStatusStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<Client>>;
    async fn overdue_candidates(&self, tenant_id: Uuid, today: NaiveDate) -> Result<Vec<Client>>;
    async fn has_other_overdue(&self, tenant_id: Uuid, client_id: Uuid, today: NaiveDate, exclude_invoice: Uuid) -> Result<bool>;
    async fn transition(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        from: ClientStatus,
        to: ClientStatus,
        reason: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Client>>;
}

/// Enables or disables the router-side credentials of a client.
/// Returns false when the client has no PPPoE secret.
#[async_trait]
pub trait SecretToggler: Send + Sync {
    async fn set_client_disabled(&self, tenant_id: Uuid, client_id: Uuid, disabled: bool) -> Result<bool>;
}

pub struct PgClientStatusStore {
    clients: ClientRepository,
    invoices: InvoiceRepository,
}

impl PgClientStatusStore {
    pub fn new(clients: ClientRepository, invoices: InvoiceRepository) -> Self {
        Self { clients, invoices }
    }
}

#[async_trait]
impl ClientStatusStore for PgClientStatusStore {
    async fn get(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<Client>> {
        self.clients.get(tenant_id, client_id).await
    }

    async fn overdue_candidates(&self, tenant_id: Uuid, today: NaiveDate) -> Result<Vec<Client>> {
        self.clients.list_overdue_candidates(tenant_id, today).await
    }

    async fn has_other_overdue(&self, tenant_id: Uuid, client_id: Uuid, today: NaiveDate, exclude_invoice: Uuid) -> Result<bool> {
        self.invoices
            .has_other_overdue(tenant_id, client_id, today, exclude_invoice)
            .await
    }

    async fn transition(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        from: ClientStatus,
        to: ClientStatus,
        reason: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Client>> {
        self.clients
            .transition_status(tenant_id, client_id, from, to, reason, at)
            .await
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    pub evaluated: u64,
    pub isolated: u64,
    pub errors: u64,
}

pub struct IsolationService {
    store: Arc<dyn ClientStatusStore>,
    toggler: Arc<dyn SecretToggler>,
}

impl IsolationService {
    pub fn new(store: Arc<dyn ClientStatusStore>, toggler: Arc<dyn SecretToggler>) -> Self {
        Self { store, toggler }
    }

    async fn transition(
        &self,
        client: &Client,
        to: ClientStatus,
        reason: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Client>> {
        if !client.status.can_transition_to(to) {
            bail!("illegal client status transition {} -> {}", client.status, to);
        }
        self.store
            .transition(client.tenant_id, client.id, client.status, to, reason, at)
            .await
    }

    /// Isolates every active client holding an invoice due before `today`.
    pub async fn sweep_tenant(&self, tenant_id: Uuid, today: NaiveDate, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let candidates = self.store.overdue_candidates(tenant_id, today).await?;

        for client in candidates {
            stats.evaluated += 1;
            if client.status != ClientStatus::Active {
                continue;
            }
            match self.isolate(&client, now).await {
                Ok(true) => stats.isolated += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    error!("Failed to isolate client {} ({}): {:#}", client.client_code, client.id, e);
                }
            }
        }

        if stats.isolated > 0 {
            info!("🔒 Isolated {} clients for tenant {}", stats.isolated, tenant_id);
        }
        Ok(stats)
    }

    async fn isolate(&self, client: &Client, now: DateTime<Utc>) -> Result<bool> {
        let Some(updated) = self
            .transition(client, ClientStatus::Isolir, Some(ISOLIR_REASON_OVERDUE), Some(now))
            .await?
        else {
            // Status moved under us; next sweep re-evaluates.
            return Ok(false);
        };

        // Local state stays isolated even if the router cannot be reached.
        if let Err(e) = self.toggler.set_client_disabled(updated.tenant_id, updated.id, true).await {
            warn!("Client {} isolated locally but router disable failed: {:#}", updated.id, e);
        }
        Ok(true)
    }

    /// Called after an invoice became paid. Returns true when the client was re-activated.
    pub async fn on_invoice_paid(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        paid_invoice: Uuid,
        today: NaiveDate,
    ) -> Result<bool> {
        let Some(client) = self.store.get(tenant_id, client_id).await? else {
            return Ok(false);
        };
        if client.status != ClientStatus::Isolir {
            return Ok(false);
        }
        if self
            .store
            .has_other_overdue(tenant_id, client_id, today, paid_invoice)
            .await?
        {
            info!("Client {} still has overdue invoices; staying isolated", client_id);
            return Ok(false);
        }

        let Some(updated) = self.transition(&client, ClientStatus::Active, None, None).await? else {
            return Ok(false);
        };
        if let Err(e) = self.toggler.set_client_disabled(tenant_id, updated.id, false).await {
            warn!("Client {} re-activated locally but router enable failed: {:#}", updated.id, e);
        }
        info!("🔓 Client {} re-activated after payment", updated.client_code);
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use netbill_db::models::client::{ClientCategory, ConnectionType, PaymentTempoOption};

    use super::*;

    pub fn client(tenant_id: Uuid, status: ClientStatus) -> Client {
        let now = Utc::now();
        Client {
            id: Uuid::new_v4(),
            tenant_id,
            client_code: "C270227-0A1B2C3D".into(),
            name: "Budi".into(),
            phone: Some("62811".into()),
            address: None,
            category: ClientCategory::Regular,
            connection_type: ConnectionType::Pppoe,
            router_id: None,
            pppoe_username: Some("budi".into()),
            pppoe_password_enc: None,
            service_package_id: Uuid::new_v4(),
            voucher_package_id: None,
            device_count: None,
            group_id: None,
            status,
            isolir_reason: (status == ClientStatus::Isolir).then(|| ISOLIR_REASON_OVERDUE.to_string()),
            isolir_at: (status == ClientStatus::Isolir).then_some(now),
            payment_tempo_option: PaymentTempoOption::Manual,
            payment_due_day: 10,
            payment_tempo_template_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[derive(Default)]
    pub struct MemoryClients {
        pub clients: Mutex<HashMap<Uuid, Client>>,
        /// Clients that hold overdue invoices, with the invoice ids.
        pub overdue: Mutex<HashMap<Uuid, Vec<Uuid>>>,
    }

    impl MemoryClients {
        pub fn insert(&self, client: Client, overdue_invoices: Vec<Uuid>) {
            if !overdue_invoices.is_empty() {
                self.overdue.lock().unwrap().insert(client.id, overdue_invoices);
            }
            self.clients.lock().unwrap().insert(client.id, client);
        }

        pub fn status(&self, id: Uuid) -> ClientStatus {
            self.clients.lock().unwrap()[&id].status
        }
    }

    #[async_trait]
    impl ClientStatusStore for MemoryClients {
        async fn get(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<Client>> {
            Ok(self
                .clients
                .lock()
                .unwrap()
                .get(&client_id)
                .filter(|c| c.tenant_id == tenant_id)
                .cloned())
        }

        async fn overdue_candidates(&self, tenant_id: Uuid, _today: NaiveDate) -> Result<Vec<Client>> {
            let overdue = self.overdue.lock().unwrap();
            Ok(self
                .clients
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.tenant_id == tenant_id && overdue.contains_key(&c.id))
                .filter(|c| matches!(c.status, ClientStatus::Active | ClientStatus::Isolir))
                .cloned()
                .collect())
        }

        async fn has_other_overdue(&self, _tenant_id: Uuid, client_id: Uuid, _today: NaiveDate, exclude_invoice: Uuid) -> Result<bool> {
            Ok(self
                .overdue
                .lock()
                .unwrap()
                .get(&client_id)
                .is_some_and(|ids| ids.iter().any(|id| *id != exclude_invoice)))
        }

        async fn transition(
            &self,
            tenant_id: Uuid,
            client_id: Uuid,
            from: ClientStatus,
            to: ClientStatus,
            reason: Option<&str>,
            at: Option<DateTime<Utc>>,
        ) -> Result<Option<Client>> {
            let mut clients = self.clients.lock().unwrap();
            Ok(clients
                .get_mut(&client_id)
                .filter(|c| c.tenant_id == tenant_id && c.status == from)
                .map(|c| {
                    c.status = to;
                    c.isolir_reason = reason.map(str::to_string);
                    c.isolir_at = at;
                    c.clone()
                }))
        }
    }

    /// Records every toggle request; optionally fails them.
    #[derive(Default)]
    pub struct RecordingToggler {
        pub calls: Mutex<Vec<(Uuid, bool)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl SecretToggler for RecordingToggler {
        async fn set_client_disabled(&self, _tenant_id: Uuid, client_id: Uuid, disabled: bool) -> Result<bool> {
            self.calls.lock().unwrap().push((client_id, disabled));
            if self.fail {
                bail!("connection timeout");
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 20).unwrap()
    }

    #[tokio::test]
    async fn payment_clearing_last_overdue_invoice_reactivates_client() {
        let tenant = Uuid::new_v4();
        let invoice = Uuid::new_v4();
        let c1 = client(tenant, ClientStatus::Isolir);
        let id = c1.id;
        let store = Arc::new(MemoryClients::default());
        store.insert(c1, vec![invoice]);
        let toggler = Arc::new(RecordingToggler::default());
        let svc = IsolationService::new(store.clone(), toggler.clone());

        assert!(svc.on_invoice_paid(tenant, id, invoice, today()).await.unwrap());

        let after = store.get(tenant, id).await.unwrap().unwrap();
        assert_eq!(after.status, ClientStatus::Active);
        assert!(after.isolir_at.is_none());
        assert!(after.isolir_reason.is_none());
        assert_eq!(*toggler.calls.lock().unwrap(), vec![(id, false)]);
    }

    #[tokio::test]
    async fn client_with_another_overdue_invoice_stays_isolated() {
        let tenant = Uuid::new_v4();
        let paid = Uuid::new_v4();
        let c = client(tenant, ClientStatus::Isolir);
        let id = c.id;
        let store = Arc::new(MemoryClients::default());
        store.insert(c, vec![paid, Uuid::new_v4()]);
        let toggler = Arc::new(RecordingToggler::default());
        let svc = IsolationService::new(store.clone(), toggler.clone());

        assert!(!svc.on_invoice_paid(tenant, id, paid, today()).await.unwrap());
        assert_eq!(store.status(id), ClientStatus::Isolir);
        assert!(toggler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_isolates_active_overdue_clients_only() {
        let tenant = Uuid::new_v4();
        let store = Arc::new(MemoryClients::default());
        let overdue = client(tenant, ClientStatus::Active);
        let already = client(tenant, ClientStatus::Isolir);
        let current = client(tenant, ClientStatus::Active);
        let (overdue_id, current_id) = (overdue.id, current.id);
        store.insert(overdue, vec![Uuid::new_v4()]);
        store.insert(already, vec![Uuid::new_v4()]);
        store.insert(current, vec![]);
        let toggler = Arc::new(RecordingToggler::default());
        let svc = IsolationService::new(store.clone(), toggler.clone());

        let stats = svc.sweep_tenant(tenant, today(), Utc::now()).await.unwrap();
        assert_eq!(stats, SweepStats { evaluated: 2, isolated: 1, errors: 0 });

        let isolated = store.get(tenant, overdue_id).await.unwrap().unwrap();
        assert_eq!(isolated.status, ClientStatus::Isolir);
        assert_eq!(isolated.isolir_reason.as_deref(), Some(ISOLIR_REASON_OVERDUE));
        assert_eq!(store.status(current_id), ClientStatus::Active);
        assert_eq!(*toggler.calls.lock().unwrap(), vec![(overdue_id, true)]);
    }

    #[tokio::test]
    async fn router_failure_keeps_local_isolation() {
        let tenant = Uuid::new_v4();
        let store = Arc::new(MemoryClients::default());
        let c = client(tenant, ClientStatus::Active);
        let id = c.id;
        store.insert(c, vec![Uuid::new_v4()]);
        let toggler = Arc::new(RecordingToggler { fail: true, ..Default::default() });
        let svc = IsolationService::new(store.clone(), toggler);

        let stats = svc.sweep_tenant(tenant, today(), Utc::now()).await.unwrap();
        assert_eq!(stats.isolated, 1);
        assert_eq!(store.status(id), ClientStatus::Isolir);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let tenant = Uuid::new_v4();
        let store = Arc::new(MemoryClients::default());
        let svc = IsolationService::new(store, Arc::new(RecordingToggler::default()));
        let suspended = client(tenant, ClientStatus::Suspended);

        let err = svc
            .transition(&suspended, ClientStatus::Isolir, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("illegal client status transition"));
    }
}
