//! Static role to capability mapping.

use netbill_db::models::user::Role;

netbill_db::string_enum!(Capability {
    ClientsRead => "clients.read",
    ClientsWrite => "clients.write",
    BillingRead => "billing.read",
    BillingWrite => "billing.write",
    PaymentsWrite => "payments.write",
    RoutersRead => "routers.read",
    RoutersWrite => "routers.write",
    PppoeRead => "pppoe.read",
    PppoeWrite => "pppoe.write",
    CampaignsRead => "campaigns.read",
    CampaignsWrite => "campaigns.write",
    CollectorVisit => "collector.visit",
    CollectorConfirm => "collector.confirm",
    FinanceConfirm => "finance.confirm",
    TopologyRead => "topology.read",
    TopologyWrite => "topology.write",
    RadiusRead => "radius.read",
    ReportsRead => "reports.read",
    TenantManage => "tenant.manage",
    PlatformAdmin => "platform.admin",
});

use Capability::*;

const OWNER: &[Capability] = &[
    ClientsRead, ClientsWrite, BillingRead, BillingWrite, PaymentsWrite, RoutersRead, RoutersWrite,
    PppoeRead, PppoeWrite, CampaignsRead, CampaignsWrite, CollectorVisit, CollectorConfirm,
    FinanceConfirm, TopologyRead, TopologyWrite, RadiusRead, ReportsRead, TenantManage,
];

const ADMIN: &[Capability] = &[
    ClientsRead, ClientsWrite, BillingRead, BillingWrite, PaymentsWrite, RoutersRead, RoutersWrite,
    PppoeRead, PppoeWrite, CampaignsRead, CampaignsWrite, CollectorConfirm, FinanceConfirm,
    TopologyRead, TopologyWrite, RadiusRead, ReportsRead,
];

const STAFF: &[Capability] = &[
    ClientsRead, ClientsWrite, BillingRead, BillingWrite, PaymentsWrite, PppoeRead, CampaignsRead,
    CampaignsWrite, TopologyRead, ReportsRead,
];

const TECHNICIAN: &[Capability] = &[
    ClientsRead, RoutersRead, RoutersWrite, PppoeRead, PppoeWrite, TopologyRead, TopologyWrite, RadiusRead,
];

const COLLECTOR: &[Capability] = &[ClientsRead, BillingRead, CollectorVisit];

const CLIENT_VIEWER: &[Capability] = &[ClientsRead, BillingRead];

pub fn capabilities(role: Role) -> &'static [Capability] {
    match role {
        Role::SuperAdmin => Capability::ALL,
        Role::Owner => OWNER,
        Role::Admin => ADMIN,
        Role::Staff => STAFF,
        Role::Technician => TECHNICIAN,
        Role::Collector => COLLECTOR,
        Role::ClientViewer => CLIENT_VIEWER,
    }
}

pub fn allows(role: Role, capability: Capability) -> bool {
    capabilities(role).contains(&capability)
}

/// Required capabilities the role lacks.
pub fn missing(role: Role, required: &[Capability]) -> Vec<Capability> {
    required.iter().copied().filter(|c| !allows(role, *c)).collect()
}
