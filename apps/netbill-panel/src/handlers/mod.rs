pub mod auth;
pub mod billing;
pub mod campaigns;
pub mod clients;
pub mod collector;
pub mod health;
pub mod outages;
pub mod pppoe;
pub mod radius;
pub mod routers;
pub mod super_admin;
pub mod wa_logs;

use serde::Deserialize;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// `?limit=&offset=` shared by the offset-paginated listings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
