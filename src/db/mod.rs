//! Database module for SQLite persistence using SeaORM

pub mod entities;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::path::Path;

/// Current time as unix seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Initialize database connection and create tables
pub async fn init_database(db_path: &Path) -> Result<DatabaseConnection, DbErr> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    tracing::info!("Connecting to database: {}", db_url);

    let db = Database::connect(&db_url).await?;

    create_tables(&db).await?;

    Ok(db)
}

async fn exec(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?;
    Ok(())
}

/// Create all tables if they don't exist
async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Tenancy and identity
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            webhook_secret_hash TEXT NOT NULL,
            webhook_secret_prefix TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT,
            created_at INTEGER NOT NULL
        )
        "#).await?;

    // Sessions are written by the auth provider; this server only reads them.
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id INTEGER NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            expires_at INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE CASCADE
        )
        "#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            profile_id INTEGER NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
            FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE CASCADE,
            UNIQUE(org_id, profile_id)
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_memberships_org ON memberships(org_id)"#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_memberships_profile ON memberships(profile_id)"#).await?;

    // Directory
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS advisors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            license_number TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_advisors_org ON advisors(org_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            advisor_id INTEGER,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            date_of_birth TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
            FOREIGN KEY (advisor_id) REFERENCES advisors(id) ON DELETE SET NULL
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_members_org ON members(org_id)"#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_members_advisor ON members(advisor_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS enrollments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            plan_name TEXT NOT NULL,
            monthly_premium_cents INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            effective_at INTEGER NOT NULL,
            terminated_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (member_id) REFERENCES members(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_enrollments_member ON enrollments(member_id)"#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_enrollments_org ON enrollments(org_id)"#).await?;

    // Billing
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS billing_schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            enrollment_id INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            frequency TEXT NOT NULL,
            next_charge_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_billing_schedules_org ON billing_schedules(org_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS billing_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            schedule_id INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            status TEXT NOT NULL,
            failure_reason TEXT,
            charged_at INTEGER NOT NULL,
            FOREIGN KEY (schedule_id) REFERENCES billing_schedules(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_billing_transactions_schedule ON billing_transactions(schedule_id)"#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_billing_transactions_org ON billing_transactions(org_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS billing_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            schedule_id INTEGER NOT NULL,
            transaction_id INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            retry_attempt INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER,
            status TEXT NOT NULL DEFAULT 'retrying',
            last_failure_reason TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (schedule_id) REFERENCES billing_schedules(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_billing_failures_org ON billing_failures(org_id)"#).await?;

    // CRM definitions and records
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS crm_modules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            api_name TEXT NOT NULL,
            has_stages INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
            UNIQUE(org_id, api_name)
        )
        "#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS crm_fields (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL,
            api_name TEXT NOT NULL,
            label TEXT NOT NULL,
            field_type TEXT NOT NULL,
            required INTEGER NOT NULL DEFAULT 0,
            options TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE,
            UNIQUE(module_id, api_name)
        )
        "#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS crm_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL,
            org_id INTEGER NOT NULL,
            data TEXT NOT NULL,
            stage TEXT,
            external_key TEXT,
            created_by INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_crm_records_module ON crm_records(module_id)"#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_crm_records_external ON crm_records(module_id, external_key)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS crm_views (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            conditions TEXT NOT NULL,
            created_by INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE
        )
        "#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS crm_layouts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL UNIQUE,
            sections TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE
        )
        "#).await?;

    // Approvals and blueprints
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS approval_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL,
            org_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            gated_actions TEXT NOT NULL,
            conditions TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_approval_rules_module ON approval_rules(module_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS approval_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            rule_id INTEGER NOT NULL,
            record_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            proposed TEXT,
            requested_by INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            decided_by INTEGER,
            decided_at INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (rule_id) REFERENCES approval_rules(id) ON DELETE CASCADE,
            FOREIGN KEY (record_id) REFERENCES crm_records(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_approval_requests_record ON approval_requests(record_id)"#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_approval_requests_org ON approval_requests(org_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS blueprints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_id INTEGER NOT NULL UNIQUE,
            org_id INTEGER NOT NULL,
            transitions TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE
        )
        "#).await?;

    // Automation
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS workflows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            module_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            trigger_kind TEXT NOT NULL,
            trigger_field TEXT,
            conditions TEXT NOT NULL,
            actions TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (module_id) REFERENCES crm_modules(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_workflows_module ON workflows(module_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS workflow_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_id INTEGER NOT NULL,
            record_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            detail TEXT,
            started_at INTEGER NOT NULL,
            FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow ON workflow_runs(workflow_id)"#).await?;

    // Campaigns
    exec(db, r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            sent_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_campaigns_org ON campaigns(org_id)"#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS campaign_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL,
            step_order INTEGER NOT NULL,
            delay_days INTEGER NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE
        )
        "#).await?;

    exec(db, r#"
        CREATE TABLE IF NOT EXISTS campaign_recipients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL,
            email TEXT NOT NULL,
            member_id INTEGER,
            status TEXT NOT NULL DEFAULT 'queued',
            sent_at INTEGER,
            FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE
        )
        "#).await?;
    exec(db, r#"CREATE INDEX IF NOT EXISTS idx_campaign_recipients_campaign ON campaign_recipients(campaign_id)"#).await?;

    tracing::info!("Database tables initialized");
    Ok(())
}
