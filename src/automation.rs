//! Workflow automation engine.
//!
//! Record mutations queue a `RecordEvent` on an unbounded channel and move
//! on; a background worker matches each enabled workflow for the module
//! against the event (trigger kind, watched field, stored conditions) and
//! runs its actions. There are no ordering or cancellation guarantees.
//! Failures are logged, written to `workflow_runs`, and swallowed.

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::db::entities::{crm_record, workflow, workflow_run};
use crate::db::unix_now;
use crate::mail::Mailer;
use crate::rules::{self, RuleGroup};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    RecordCreated,
    RecordUpdated,
    StageChanged,
}

/// A qualifying record event, captured after the mutation committed.
#[derive(Clone, Debug)]
pub struct RecordEvent {
    pub org_id: i32,
    pub module_id: i32,
    pub record_id: i32,
    pub kind: EventKind,
    /// Post-mutation field values.
    pub data: Map<String, Value>,
    pub changed_fields: Vec<String>,
    pub stage_from: Option<String>,
    pub stage_to: Option<String>,
}

/// Workflow actions as stored in the `actions` JSON column.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Write a field value through to the record. Does not re-fire
    /// automation.
    SetField { field: String, value: Value },
    /// Email the address held in one of the record's fields.
    SendEmail { to_field: String, subject: String, body: String },
    Log { message: String },
}

/// Does a workflow's trigger fire for this event?
pub fn trigger_matches(trigger_kind: &str, trigger_field: Option<&str>, event: &RecordEvent) -> bool {
    match trigger_kind {
        "record_created" => event.kind == EventKind::RecordCreated,
        "record_updated" => event.kind == EventKind::RecordUpdated,
        "field_changed" => {
            event.kind == EventKind::RecordUpdated
                && trigger_field
                    .map(|f| event.changed_fields.iter().any(|c| c == f))
                    .unwrap_or(false)
        }
        "stage_changed" => event.kind == EventKind::StageChanged,
        _ => false,
    }
}

/// Handle for queueing events from request handlers.
pub struct AutomationEngine {
    tx: mpsc::UnboundedSender<RecordEvent>,
}

impl AutomationEngine {
    /// Spawn the worker loop and return the queue handle.
    pub fn start(db: DatabaseConnection, mailer: Arc<dyn Mailer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RecordEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::debug!(
                    "automation event: org={} record={} module={} kind={:?} stage={:?}->{:?}",
                    event.org_id,
                    event.record_id,
                    event.module_id,
                    event.kind,
                    event.stage_from,
                    event.stage_to
                );
                if let Err(e) = process_event(&db, mailer.as_ref(), &event).await {
                    tracing::error!("Automation pass failed for record {}: {}", event.record_id, e);
                }
            }
        });

        Self { tx }
    }

    /// Fire and forget.
    pub fn fire(&self, event: RecordEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("Automation worker is gone; event dropped");
        }
    }
}

async fn process_event(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    event: &RecordEvent,
) -> Result<(), sea_orm::DbErr> {
    let workflows = workflow::Entity::find()
        .filter(workflow::Column::ModuleId.eq(event.module_id))
        .filter(workflow::Column::Enabled.eq(true))
        .all(db)
        .await?;

    for wf in workflows {
        if !trigger_matches(&wf.trigger_kind, wf.trigger_field.as_deref(), event) {
            continue;
        }

        let conditions = match RuleGroup::parse(&wf.conditions) {
            Ok(group) => group,
            Err(e) => {
                tracing::error!("Workflow {} has unparseable conditions: {}", wf.id, e);
                record_run(db, wf.id, event.record_id, "failed", Some(format!("bad conditions: {}", e))).await?;
                continue;
            }
        };
        if !rules::evaluate(&conditions, &event.data) {
            continue;
        }

        let (status, detail) = match run_actions(db, mailer, &wf, event).await {
            Ok(count) => ("succeeded", Some(format!("{} action(s)", count))),
            Err(e) => {
                tracing::error!("Workflow {} failed on record {}: {}", wf.id, event.record_id, e);
                ("failed", Some(e))
            }
        };
        record_run(db, wf.id, event.record_id, status, detail).await?;
    }

    Ok(())
}

async fn run_actions(
    db: &DatabaseConnection,
    mailer: &dyn Mailer,
    wf: &workflow::Model,
    event: &RecordEvent,
) -> Result<usize, String> {
    let actions: Vec<Action> =
        serde_json::from_str(&wf.actions).map_err(|e| format!("bad actions: {}", e))?;
    let count = actions.len();

    for action in actions {
        match action {
            Action::SetField { field, value } => {
                set_record_field(db, event.record_id, &field, value)
                    .await
                    .map_err(|e| format!("set_field {}: {}", field, e))?;
            }
            Action::SendEmail { to_field, subject, body } => {
                let to = event
                    .data
                    .get(&to_field)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| format!("send_email: field {} has no address", to_field))?;
                mailer
                    .send(to, &subject, &body)
                    .await
                    .map_err(|e| format!("send_email: {}", e))?;
            }
            Action::Log { message } => {
                tracing::info!("workflow {} on record {}: {}", wf.name, event.record_id, message);
            }
        }
    }

    Ok(count)
}

async fn set_record_field(
    db: &DatabaseConnection,
    record_id: i32,
    field: &str,
    value: Value,
) -> Result<(), String> {
    let record = crm_record::Entity::find_by_id(record_id)
        .one(db)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("record is gone")?;

    let mut data: Map<String, Value> =
        serde_json::from_str(&record.data).map_err(|e| e.to_string())?;
    data.insert(field.to_string(), value);

    let mut active: crm_record::ActiveModel = record.into();
    active.data = Set(Value::Object(data).to_string());
    active.updated_at = Set(unix_now());
    active.update(db).await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn record_run(
    db: &DatabaseConnection,
    workflow_id: i32,
    record_id: i32,
    status: &str,
    detail: Option<String>,
) -> Result<(), sea_orm::DbErr> {
    workflow_run::ActiveModel {
        workflow_id: Set(workflow_id),
        record_id: Set(record_id),
        status: Set(status.to_string()),
        detail: Set(detail),
        started_at: Set(unix_now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind, changed: &[&str]) -> RecordEvent {
        RecordEvent {
            org_id: 1,
            module_id: 1,
            record_id: 1,
            kind,
            data: json!({"status": "active"}).as_object().unwrap().clone(),
            changed_fields: changed.iter().map(|s| s.to_string()).collect(),
            stage_from: None,
            stage_to: None,
        }
    }

    #[test]
    fn test_trigger_matching() {
        assert!(trigger_matches("record_created", None, &event(EventKind::RecordCreated, &[])));
        assert!(!trigger_matches("record_created", None, &event(EventKind::RecordUpdated, &[])));

        assert!(trigger_matches("record_updated", None, &event(EventKind::RecordUpdated, &[])));
        assert!(trigger_matches("stage_changed", None, &event(EventKind::StageChanged, &[])));

        assert!(!trigger_matches("on_delete", None, &event(EventKind::RecordUpdated, &[])));
    }

    #[test]
    fn test_field_changed_requires_the_watched_field() {
        let e = event(EventKind::RecordUpdated, &["premium", "notes"]);
        assert!(trigger_matches("field_changed", Some("premium"), &e));
        assert!(!trigger_matches("field_changed", Some("status"), &e));
        // No watched field configured: never fires.
        assert!(!trigger_matches("field_changed", None, &e));
        // Stage changes are not field changes.
        assert!(!trigger_matches("field_changed", Some("premium"), &event(EventKind::StageChanged, &["premium"])));
    }

    #[test]
    fn test_action_deserialization() {
        let actions: Vec<Action> = serde_json::from_str(
            r#"[
                {"type": "set_field", "field": "status", "value": "escalated"},
                {"type": "send_email", "to_field": "email", "subject": "Hi", "body": "..."},
                {"type": "log", "message": "fired"}
            ]"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 3);
        assert!(matches!(&actions[0], Action::SetField { field, .. } if field == "status"));

        let bad: Result<Vec<Action>, _> = serde_json::from_str(r#"[{"type": "drop_table"}]"#);
        assert!(bad.is_err());
    }
}
