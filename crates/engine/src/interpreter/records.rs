//! Record lifecycle steps.

use chrono::Utc;
use serde_json::{json, Map, Value};

use super::command::{CreateRecordConfig, RecordRef};
use super::{StepEffect, StepInterpreter, StepOutcome};
use crate::audit::AuditEntry;
use crate::context::StepContext;
use crate::model::Step;
use crate::store::{IndexQuery, Table};

impl StepInterpreter {
    pub(super) async fn create_record(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: CreateRecordConfig,
    ) -> StepOutcome {
        let object_type = self
            .store
            .require(Table::ObjectTypes, &cfg.object_type_id)
            .await?;
        object_type.ensure_workspace(Table::ObjectTypes, &ctx.workspace_id)?;

        let mut fields = Map::new();
        fields.insert("workspaceId".into(), json!(ctx.workspace_id));
        fields.insert("objectTypeId".into(), json!(cfg.object_type_id));
        fields.insert("data".into(), Value::Object(cfg.data));
        fields.insert("archived".into(), Value::Bool(false));
        fields.insert("createdBy".into(), json!(ctx.actor_id));
        let record_id = self.store.insert(Table::Records, fields).await?;

        let entry = AuditEntry::new(&ctx.workspace_id, "record", &record_id, "record_created");
        self.audit(step, ctx, entry).await;

        Ok(StepEffect::new(
            json!({"recordId": record_id, "objectTypeId": cfg.object_type_id}),
            ctx,
        ))
    }

    /// Delete a record together with its list memberships.
    pub(super) async fn delete_record(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: RecordRef,
    ) -> StepOutcome {
        let record = self.target_record(ctx, &cfg.record_id).await?;

        let entries = self
            .store
            .query(Table::ListEntries, &IndexQuery::new().eq("recordId", record.id.as_str()))
            .await?;
        for entry in &entries {
            self.store.delete(Table::ListEntries, &entry.id).await?;
        }
        self.store.delete(Table::Records, &record.id).await?;

        let entry = AuditEntry::new(&ctx.workspace_id, "record", &record.id, "record_deleted");
        self.audit(step, ctx, entry).await;

        Ok(StepEffect::new(
            json!({
                "recordId": record.id,
                "deleted": true,
                "removedListEntries": entries.len(),
            }),
            ctx,
        ))
    }

    pub(super) async fn archive_record(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: RecordRef,
    ) -> StepOutcome {
        let record = self.target_record(ctx, &cfg.record_id).await?;

        let mut patch = Map::new();
        patch.insert("archived".into(), Value::Bool(true));
        patch.insert("archivedAt".into(), json!(Utc::now().timestamp_millis()));
        self.store.patch(Table::Records, &record.id, patch).await?;

        let entry = AuditEntry::new(&ctx.workspace_id, "record", &record.id, "record_archived");
        self.audit(step, ctx, entry).await;

        Ok(StepEffect::new(
            json!({"recordId": record.id, "archived": true}),
            ctx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::halted;
    use crate::interpreter::tests::{harness, step};
    use crate::model::StepType;
    use crate::store::{RecordStore, Table};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_record_in_workspace() {
        let h = harness();
        let steps = vec![step(
            "s1",
            StepType::CreateRecord,
            json!({"objectTypeId": "ot_deals", "data": {"name": "New"}}),
        )];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let id = results[0].output.as_ref().unwrap()["recordId"].as_str().unwrap().to_string();
        let record = h.record(&id).await;
        assert_eq!(record.workspace_id(), Some("ws_1"));
        assert_eq!(record.get("archived"), Some(&json!(false)));
        assert_eq!(record.get_str("createdBy"), Some("user_1"));
        assert_eq!(h.audit_actions().await, vec!["record_created"]);
    }

    #[tokio::test]
    async fn test_create_record_rejects_foreign_object_type() {
        let h = harness();
        let steps = vec![step("s1", StepType::CreateRecord, json!({"objectTypeId": "ot_other"}))];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(results[0].is_failed());
        assert_eq!(h.store.count(Table::Records).await, 3);
    }

    #[tokio::test]
    async fn test_delete_record_removes_list_entries() {
        let h = harness();
        let steps = vec![
            step("add", StepType::AddToList, json!({"listId": "list_hot"})),
            step("del", StepType::DeleteRecord, json!({})),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        assert_eq!(results[1].output.as_ref().unwrap()["removedListEntries"], 1);
        assert!(h.store.get(Table::Records, "rec_1").await.unwrap().is_none());
        assert_eq!(h.store.count(Table::ListEntries).await, 0);
    }

    #[tokio::test]
    async fn test_archive_record() {
        let h = harness();
        let steps = vec![step("s1", StepType::ArchiveRecord, json!({"recordId": "rec_2"}))];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let record = h.record("rec_2").await;
        assert_eq!(record.get("archived"), Some(&json!(true)));
        assert!(record.get("archivedAt").is_some());
        assert_eq!(h.audit_actions().await, vec!["record_archived"]);
    }
}
