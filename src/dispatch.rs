//! Action dispatcher.
//!
//! Maps a rule's matched items to side effects against the external API or
//! the user's local database. Every action first pre-filters obvious no-ops
//! (an item that already carries every target tag, a stop-seeding against an
//! item that is not seeding), then executes the remainder serially. One
//! item's failure never aborts the batch; auth failures do, because every
//! later call would fail the same way.

use crate::client::{ControlOperation, ControlOutcome, TorboxClient};
use crate::db::Database;
use crate::rules::Action;
use crate::types::{Item, ItemId, ItemStatus, TagId, classify};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Counts surfaced from one dispatched action
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Items that survived the pre-filter and were attempted
    pub attempted: usize,
    /// Items whose side effect succeeded
    pub succeeded: usize,
    /// Items whose side effect failed
    pub failed: usize,
    /// First failure message, for the execution log
    pub first_error: Option<String>,
}

impl DispatchOutcome {
    /// Whether every attempted item succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    fn record_failure(&mut self, message: String) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(message);
        }
    }
}

/// Executes actions for one user's poll cycle
pub struct ActionDispatcher<'a> {
    db: &'a Database,
    client: &'a TorboxClient,
}

impl<'a> ActionDispatcher<'a> {
    /// Create a dispatcher over the user's database and API client
    pub fn new(db: &'a Database, client: &'a TorboxClient) -> Self {
        Self { db, client }
    }

    /// Pre-filter and execute one action over the matched items
    pub async fn dispatch(
        &self,
        action: &Action,
        matched: Vec<Item>,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let items = self.pre_filter(action, matched).await?;
        let mut outcome = DispatchOutcome {
            attempted: items.len(),
            ..DispatchOutcome::default()
        };

        if items.is_empty() {
            return Ok(outcome);
        }

        match action {
            Action::AddTag(tags) => self.mutate_tags(tags, &items, true, &mut outcome).await?,
            Action::RemoveTag(tags) => self.mutate_tags(tags, &items, false, &mut outcome).await?,
            Action::StopSeeding => {
                for item in &items {
                    let result = self
                        .client
                        .control_item(&item.id, ControlOperation::StopSeeding)
                        .await;
                    self.settle(&item.id, result, &mut outcome)?;
                }
            }
            Action::ForceStart => {
                for item in &items {
                    let result = self
                        .client
                        .control_item(&item.id, ControlOperation::ForceStart)
                        .await;
                    self.settle(&item.id, result, &mut outcome)?;
                }
            }
            Action::Delete => {
                for item in &items {
                    let result = self.client.delete_item(&item.id, item.queued).await;
                    self.settle(&item.id, result, &mut outcome)?;
                }
            }
            Action::Archive => {
                for item in &items {
                    match self.archive_one(item, now).await {
                        Ok(()) => outcome.succeeded += 1,
                        // Auth and storage failures are fatal to the cycle
                        Err(e) if e.is_auth() => return Err(e),
                        Err(e @ Error::Database(_)) | Err(e @ Error::Sqlx(_)) => return Err(e),
                        Err(e) => {
                            tracing::warn!(item_id = %item.id, error = %e, "archive failed");
                            outcome.record_failure(e.to_string());
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Drop items for which the action would be a no-op
    async fn pre_filter(&self, action: &Action, matched: Vec<Item>) -> Result<Vec<Item>> {
        match action {
            Action::AddTag(tags) => {
                let assigned = self.assigned_tags(&matched).await?;
                Ok(matched
                    .into_iter()
                    .filter(|item| {
                        let current = assigned.get(&item.id);
                        !tags
                            .iter()
                            .all(|tag| current.is_some_and(|c| c.contains(tag)))
                    })
                    .collect())
            }
            Action::RemoveTag(tags) => {
                let assigned = self.assigned_tags(&matched).await?;
                Ok(matched
                    .into_iter()
                    .filter(|item| {
                        assigned
                            .get(&item.id)
                            .is_some_and(|c| tags.iter().any(|tag| c.contains(tag)))
                    })
                    .collect())
            }
            Action::StopSeeding => Ok(matched
                .into_iter()
                .filter(|item| classify(item) == ItemStatus::Seeding)
                .collect()),
            Action::ForceStart => Ok(matched
                .into_iter()
                .filter(|item| classify(item) != ItemStatus::Queued)
                .collect()),
            Action::Archive | Action::Delete => Ok(matched),
        }
    }

    async fn assigned_tags(&self, items: &[Item]) -> Result<HashMap<ItemId, Vec<TagId>>> {
        let ids: Vec<ItemId> = items.iter().map(|item| item.id.clone()).collect();
        self.db.tags_for_items(&ids).await
    }

    /// Archive one item: record it locally, then delete it from the
    /// service. A second archive of the same item skips the delete, so
    /// running the action twice yields one row and one deletion attempt.
    async fn archive_one(&self, item: &Item, now: DateTime<Utc>) -> Result<()> {
        let inserted = self.db.insert_archived(item, now).await?;
        if !inserted {
            tracing::debug!(item_id = %item.id, "already archived, skipping delete");
            return Ok(());
        }

        match self.client.delete_item(&item.id, item.queued).await? {
            ControlOutcome::Done => Ok(()),
            ControlOutcome::ConnectionError(message) => Err(Error::Other(message)),
        }
    }

    /// Apply a tag mutation for the whole batch in one transaction.
    /// Validates that every target tag exists first; a dangling tag id
    /// fails the action outright.
    async fn mutate_tags(
        &self,
        tags: &[TagId],
        items: &[Item],
        add: bool,
        outcome: &mut DispatchOutcome,
    ) -> Result<()> {
        if !self.db.tags_exist(tags).await? {
            return Err(Error::NotFound(format!(
                "tag ids {:?} are not all present",
                tags
            )));
        }

        let ids: Vec<ItemId> = items.iter().map(|item| item.id.clone()).collect();
        if add {
            self.db.add_tags(&ids, tags).await?;
        } else {
            self.db.remove_tags(&ids, tags).await?;
        }
        outcome.succeeded += items.len();
        Ok(())
    }

    /// Fold one control-call result into the outcome. Auth errors abort the
    /// batch; anything else is a per-item failure.
    fn settle(
        &self,
        item_id: &ItemId,
        result: Result<ControlOutcome>,
        outcome: &mut DispatchOutcome,
    ) -> Result<()> {
        match result {
            Ok(ControlOutcome::Done) => outcome.succeeded += 1,
            Ok(ControlOutcome::ConnectionError(message)) => {
                tracing::warn!(item_id = %item_id, error = %message, "control call failed");
                outcome.record_failure(message);
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::warn!(item_id = %item_id, error = %e, "control call failed");
                outcome.record_failure(e.to_string());
            }
        }
        Ok(())
    }
}
