use anyhow::{Context, Result};
use chrono::Utc;

use crate::services::auth_service::AuthService;
use crate::services::billing_service::BillingService;

pub async fn create_super_admin(auth: &AuthService, email: &str, password: &str) -> Result<()> {
    let user = auth
        .create_super_admin(email, password)
        .await
        .context("Failed to create super admin")?;
    println!("Super admin '{}' created (id {}).", user.email, user.id);
    Ok(())
}

pub async fn reset_password(auth: &AuthService, email: &str, password: &str) -> Result<()> {
    auth.reset_super_admin_password(email, password)
        .await
        .context("Failed to reset password")?;
    println!("Password for '{}' has been successfully reset.", email);
    Ok(())
}

/// Same pass the scheduler runs at 00:05, on demand.
pub async fn generate_invoices_now(billing: &BillingService) -> Result<()> {
    let stats = billing.run_daily(Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&stats).context("Failed to render run stats")?);
    Ok(())
}
