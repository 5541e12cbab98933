//! List membership steps.

use chrono::Utc;
use serde_json::{json, Map, Value};

use super::command::{non_blank, ListEntryConfig};
use super::{StepEffect, StepInterpreter, StepOutcome};
use crate::audit::AuditEntry;
use crate::context::StepContext;
use crate::error::{ActionError, ActionResult};
use crate::model::Step;
use crate::store::{Document, DocumentUpdate, IndexQuery, Table};

/// The list and record a list step targets, plus the existing entry if any.
struct Membership {
    list_id: String,
    record_id: String,
    entry: Option<Document>,
}

impl Membership {
    fn require_entry(self) -> ActionResult<(String, String, Document)> {
        match self.entry {
            Some(entry) => Ok((self.list_id, self.record_id, entry)),
            None => Err(ActionError::validation(format!(
                "Record {} is not in list {}",
                self.record_id, self.list_id
            ))),
        }
    }
}

impl StepInterpreter {
    async fn membership(&self, ctx: &StepContext, cfg: &ListEntryConfig) -> ActionResult<Membership> {
        let list = self.store.require(Table::Lists, &cfg.list_id).await?;
        list.ensure_workspace(Table::Lists, &ctx.workspace_id)?;

        let record_id = non_blank(&cfg.record_id)
            .or_else(|| ctx.record_id())
            .ok_or_else(|| ActionError::validation("No record to operate on"))?
            .to_string();

        let query = IndexQuery::new()
            .eq("listId", list.id.as_str())
            .eq("recordId", record_id.as_str());
        let entry = self.store.first(Table::ListEntries, &query).await?;

        Ok(Membership {
            list_id: list.id,
            record_id,
            entry,
        })
    }

    pub(super) async fn add_to_list(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: ListEntryConfig,
    ) -> StepOutcome {
        let membership = self.membership(ctx, &cfg).await?;
        let Membership {
            list_id,
            record_id,
            entry,
        } = membership;

        if let Some(entry) = entry {
            return Ok(StepEffect::new(
                json!({
                    "listId": list_id,
                    "recordId": record_id,
                    "entryId": entry.id,
                    "alreadyMember": true,
                }),
                ctx,
            ));
        }

        let record = self.store.require(Table::Records, &record_id).await?;
        record.ensure_workspace(Table::Records, &ctx.workspace_id)?;

        let mut fields = Map::new();
        fields.insert("workspaceId".into(), json!(ctx.workspace_id));
        fields.insert("listId".into(), json!(list_id));
        fields.insert("recordId".into(), json!(record_id));
        fields.insert("data".into(), Value::Object(cfg.data.unwrap_or_default()));
        fields.insert("addedBy".into(), json!(ctx.actor_id));
        let entry_id = self.store.insert(Table::ListEntries, fields).await?;

        let entry = AuditEntry::new(&ctx.workspace_id, "listEntry", &entry_id, "list_entry_added")
            .with_metadata(json!({"listId": list_id, "recordId": record_id}));
        self.audit(step, ctx, entry).await;

        Ok(StepEffect::new(
            json!({
                "listId": list_id,
                "recordId": record_id,
                "entryId": entry_id,
                "alreadyMember": false,
            }),
            ctx,
        ))
    }

    pub(super) async fn remove_from_list(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: ListEntryConfig,
    ) -> StepOutcome {
        let (list_id, record_id, entry) = self.membership(ctx, &cfg).await?.require_entry()?;
        self.store.delete(Table::ListEntries, &entry.id).await?;

        let audit = AuditEntry::new(&ctx.workspace_id, "listEntry", &entry.id, "list_entry_removed");
        self.audit(step, ctx, audit).await;

        Ok(StepEffect::new(
            json!({"listId": list_id, "recordId": record_id, "entryId": entry.id}),
            ctx,
        ))
    }

    /// Merge `data` into an existing entry's data.
    pub(super) async fn update_list_entry(
        &self,
        step: &Step,
        ctx: &StepContext,
        cfg: ListEntryConfig,
    ) -> StepOutcome {
        let updates = cfg.data.clone().unwrap_or_default();
        let (list_id, record_id, entry) = self.membership(ctx, &cfg).await?.require_entry()?;

        let mut data = entry
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut update = DocumentUpdate::new().set("updatedAt", Utc::now().timestamp_millis());
        for (key, value) in updates {
            update = update.set(format!("data.{key}"), value.clone());
            data.insert(key, value);
        }
        self.store.update(Table::ListEntries, &entry.id, update).await?;

        let audit = AuditEntry::new(&ctx.workspace_id, "listEntry", &entry.id, "list_entry_updated");
        self.audit(step, ctx, audit).await;

        Ok(StepEffect::new(
            json!({
                "listId": list_id,
                "recordId": record_id,
                "entryId": entry.id,
                "data": data,
            }),
            ctx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::halted;
    use crate::interpreter::tests::{harness, step};
    use crate::model::StepType;
    use crate::store::{IndexQuery, RecordStore, Table};
    use serde_json::json;

    #[tokio::test]
    async fn test_add_to_list_is_idempotent() {
        let h = harness();
        let steps = vec![
            step("a1", StepType::AddToList, json!({"listId": "list_hot", "data": {"priority": 1}})),
            step("a2", StepType::AddToList, json!({"listId": "list_hot"})),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let first = results[0].output.as_ref().unwrap();
        let second = results[1].output.as_ref().unwrap();
        assert_eq!(first["alreadyMember"], false);
        assert_eq!(second["alreadyMember"], true);
        assert_eq!(first["entryId"], second["entryId"]);
        assert_eq!(h.store.count(Table::ListEntries).await, 1);
    }

    #[tokio::test]
    async fn test_update_and_remove_entry() {
        let h = harness();
        let steps = vec![
            step("add", StepType::AddToList, json!({"listId": "list_hot", "data": {"priority": 1, "owner": "kim"}})),
            step("upd", StepType::UpdateListEntry, json!({"listId": "list_hot", "data": {"priority": 2}})),
        ];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");

        let entry = h
            .store
            .first(Table::ListEntries, &IndexQuery::new().eq("recordId", "rec_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.get("data"), Some(&json!({"priority": 2, "owner": "kim"})));

        let steps = vec![step("rm", StepType::RemoveFromList, json!({"listId": "list_hot"}))];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert!(halted(&results).is_none(), "{results:?}");
        assert_eq!(h.store.count(Table::ListEntries).await, 0);
        assert_eq!(
            h.audit_actions().await,
            vec!["list_entry_added", "list_entry_updated", "list_entry_removed"]
        );
    }

    #[tokio::test]
    async fn test_remove_missing_entry_fails() {
        let h = harness();
        let steps = vec![step("rm", StepType::RemoveFromList, json!({"listId": "list_hot"}))];
        let (results, _) = h.run(&steps, h.ctx("rec_2").await).await;
        assert_eq!(
            results[0].error.as_deref(),
            Some("Validation error: Record rec_2 is not in list list_hot")
        );
    }

    #[tokio::test]
    async fn test_foreign_list_rejected() {
        let h = harness();
        let steps = vec![step("a", StepType::AddToList, json!({"listId": "list_foreign"}))];
        let (results, _) = h.run(&steps, h.ctx("rec_1").await).await;
        assert_eq!(
            results[0].error.as_deref(),
            Some("lists document list_foreign belongs to another workspace")
        );
    }
}
