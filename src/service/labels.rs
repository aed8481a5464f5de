use log::{debug, info};

use super::{
    inputs::{CreateLabelInput, UpdateLabelInput},
    pagination::{self, encode_cursor, page_size, paginate, parse_after, Page},
    validate, TrackerService,
};
use crate::{
    db::{
        models::{DeleteResult, Label},
        repositories::{labels, task_labels},
    },
    error::{classify, ServiceError},
};

fn label_cursor(label: &Label) -> String {
    encode_cursor(&label.created_at, &label.id)
}

impl TrackerService {
    pub async fn create_label(&self, input: CreateLabelInput) -> Result<Label, ServiceError> {
        let name = validate::required(&input.name, "label name is required")?;
        let owner_id = self.owner.owner_id().await?;

        let created = self
            .db
            .execute(move |conn| labels::insert_label(conn, owner_id, &name))
            .await
            .map_err(|err| classify(err, "failed to create label"))?;

        debug!("Created label {}", created.id);
        Ok(created)
    }

    pub async fn update_label(&self, input: UpdateLabelInput) -> Result<Label, ServiceError> {
        let id = validate::parse_id(&input.id, "label id")?;
        let name = validate::required(&input.name, "label name is required")?;
        let owner_id = self.owner.owner_id().await?;

        self.db
            .execute(move |conn| labels::update_label(conn, id, owner_id, &name))
            .await
            .map_err(|err| classify(err, "label not found"))
    }

    /// Soft-deletes the label and drops its task associations. The tasks
    /// themselves are untouched.
    pub async fn delete_label(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        let id = validate::parse_id(id, "label id")?;
        let owner_id = self.owner.owner_id().await?;

        let (deleted, detached) = self
            .db
            .with_tx("failed to delete label", move |tx| {
                let deleted = labels::soft_delete_label(tx, id, owner_id)
                    .map_err(|err| classify(err, "label not found"))?;
                let detached = task_labels::delete_for_label(tx, id)
                    .map_err(|err| classify(err, "failed to clean task labels"))?;
                Ok((deleted, detached))
            })
            .await?;

        info!("Deleted label {id}, detached from {detached} task(s)");
        Ok(deleted)
    }

    pub async fn list_labels(
        &self,
        first: i64,
        after: Option<&str>,
    ) -> Result<Page<Label>, ServiceError> {
        let limit = page_size(first, pagination::LABELS);
        let after = parse_after(after)?;
        let owner_id = self.owner.owner_id().await?;

        let rows = self
            .db
            .execute(move |conn| labels::list_labels(conn, owner_id, after.as_ref(), limit + 1))
            .await
            .map_err(|err| classify(err, "failed to list labels"))?;

        Ok(paginate(rows, limit, label_cursor))
    }

    /// Labels currently attached to a task.
    pub async fn labels_for_task(&self, task_id: &str) -> Result<Vec<Label>, ServiceError> {
        let task_id = validate::parse_id(task_id, "task id")?;
        let owner_id = self.owner.owner_id().await?;

        self.db
            .execute(move |conn| labels::list_labels_for_task(conn, owner_id, task_id))
            .await
            .map_err(|err| classify(err, "failed to load task labels"))
    }
}
