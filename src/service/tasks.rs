use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::Connection;
use uuid::Uuid;

use super::{
    inputs::{CreateTaskInput, ListTasksInput, UpdateTaskInput},
    pagination::{self, encode_cursor, page_size, paginate, parse_after, Page},
    validate, TrackerService,
};
use crate::{
    db::{
        models::{DeleteResult, Task, TaskRecord, TaskStatus},
        repositories::{labels, projects, task_labels, tasks},
    },
    error::{classify, ServiceError},
};

fn task_cursor(task: &Task) -> String {
    encode_cursor(&task.created_at, &task.id)
}

/// `completed_at` after a status change.
///
/// Entering `Done` stamps the time, as does staying in `Done` without a stamp.
/// Staying in `Done` keeps the existing stamp; any other status clears it.
fn completion_after(
    previous: TaskStatus,
    completed_at: Option<DateTime<Utc>>,
    next: TaskStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match next {
        TaskStatus::Done if previous != TaskStatus::Done || completed_at.is_none() => Some(now),
        TaskStatus::Done => completed_at,
        _ => None,
    }
}

/// Whole-set replacement of a task's labels. Every id must be a live label
/// of the owner, otherwise nothing is attached and the caller's transaction
/// is expected to roll back the cleared set.
fn replace_task_labels(
    conn: &Connection,
    owner_id: Uuid,
    task_id: Uuid,
    label_ids: &[Uuid],
) -> Result<(), ServiceError> {
    task_labels::delete_for_task(conn, task_id)
        .map_err(|err| classify(err, "failed to reset task labels"))?;

    if label_ids.is_empty() {
        return Ok(());
    }

    let found = labels::get_labels_by_ids(conn, owner_id, label_ids)
        .map_err(|err| classify(err, "failed to validate labels"))?;
    if found.len() != label_ids.len() {
        return Err(ServiceError::bad_input("one or more labelIds are invalid"));
    }

    for label_id in label_ids {
        task_labels::insert(conn, task_id, *label_id)
            .map_err(|err| classify(err, "failed to attach labels"))?;
    }
    Ok(())
}

impl TrackerService {
    pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task, ServiceError> {
        let project_id = validate::parse_id(&input.project_id, "project id")?;
        let parent_id =
            validate::parse_optional_id(input.parent_task_id.as_deref(), "parent task id")?;
        let status = validate::normalize_status(&input.status)?;
        let record = TaskRecord {
            title: validate::required(&input.title, "task title is required")?,
            description: input.description,
            status,
            priority: validate::normalize_priority(&input.priority)?,
            start_at: input.start_at,
            due_at: input.due_at,
            completed_at: (status == TaskStatus::Done).then(Utc::now),
        };
        validate::validate_schedule(record.start_at.as_ref(), record.due_at.as_ref())?;
        let label_ids = validate::parse_id_list(&input.label_ids, "labelIds")?;
        let owner_id = self.owner.owner_id().await?;

        let created = self
            .db
            .with_tx("failed to create task", move |tx| {
                projects::get_project(tx, project_id, owner_id)
                    .map_err(|err| classify(err, "project not found"))?;

                if let Some(parent_id) = parent_id {
                    let parent = tasks::get_task(tx, parent_id, owner_id)
                        .map_err(|err| classify(err, "parent task not found"))?;
                    if parent.parent_task_id.is_some() {
                        return Err(ServiceError::bad_input(
                            "only one level of subtasks is supported",
                        ));
                    }
                    if parent.project_id != project_id {
                        return Err(ServiceError::bad_input(
                            "parent task must belong to the same project",
                        ));
                    }
                }

                let created = tasks::insert_task(tx, owner_id, project_id, parent_id, &record)
                    .map_err(|err| classify(err, "failed to create task"))?;
                replace_task_labels(tx, owner_id, created.id, &label_ids)?;
                Ok(created)
            })
            .await?;

        debug!("Created task {} in project {}", created.id, project_id);
        Ok(created)
    }

    pub async fn update_task(&self, input: UpdateTaskInput) -> Result<Task, ServiceError> {
        let id = validate::parse_id(&input.id, "task id")?;
        let title = input
            .title
            .as_deref()
            .map(|title| validate::required(title, "task title cannot be empty"))
            .transpose()?;
        let status = input.status.as_deref().map(validate::normalize_status).transpose()?;
        let priority = input
            .priority
            .as_deref()
            .map(validate::normalize_priority)
            .transpose()?;
        let label_ids = input
            .label_ids
            .as_deref()
            .map(|ids| validate::parse_id_list(ids, "labelIds"))
            .transpose()?;
        let owner_id = self.owner.owner_id().await?;

        let description = input.description;
        let (start_at, due_at) = (input.start_at, input.due_at);

        let updated = self
            .db
            .with_tx("failed to update task", move |tx| {
                let existing = tasks::get_task(tx, id, owner_id)
                    .map_err(|err| classify(err, "task not found"))?;

                let status = status.unwrap_or(existing.status);
                let record = TaskRecord {
                    title: title.unwrap_or(existing.title),
                    description: description.or(existing.description),
                    status,
                    priority: priority.unwrap_or(existing.priority),
                    start_at: start_at.or(existing.start_at),
                    due_at: due_at.or(existing.due_at),
                    completed_at: completion_after(
                        existing.status,
                        existing.completed_at,
                        status,
                        Utc::now(),
                    ),
                };
                validate::validate_schedule(record.start_at.as_ref(), record.due_at.as_ref())?;

                let updated = tasks::update_task(tx, id, owner_id, &record)
                    .map_err(|err| classify(err, "failed to update task"))?;

                if let Some(label_ids) = &label_ids {
                    replace_task_labels(tx, owner_id, id, label_ids)?;
                }
                Ok(updated)
            })
            .await?;

        debug!("Updated task {id}");
        Ok(updated)
    }

    /// Soft-deletes the task and its direct subtasks.
    pub async fn delete_task(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        let id = validate::parse_id(id, "task id")?;
        let owner_id = self.owner.owner_id().await?;

        let (deleted, subtasks) = self
            .db
            .with_tx("failed to delete task", move |tx| {
                let deleted = tasks::soft_delete_task(tx, id, owner_id)
                    .map_err(|err| classify(err, "task not found"))?;
                let subtasks = tasks::soft_delete_direct_subtasks(tx, owner_id, id)
                    .map_err(|err| classify(err, "failed to delete subtasks"))?;
                Ok((deleted, subtasks))
            })
            .await?;

        info!("Deleted task {id} and {subtasks} subtask(s)");
        Ok(deleted)
    }

    /// `None` when the task does not exist or is deleted.
    pub async fn task(&self, id: &str) -> Result<Option<Task>, ServiceError> {
        let id = validate::parse_id(id, "task id")?;
        let owner_id = self.owner.owner_id().await?;

        self.db
            .execute(move |conn| tasks::find_task(conn, id, owner_id))
            .await
            .map_err(|err| classify(err, "failed to fetch task"))
    }

    /// Root tasks of a project, or the subtasks of `parent_task_id` within it.
    pub async fn list_tasks(&self, input: ListTasksInput) -> Result<Page<Task>, ServiceError> {
        let project_id = validate::parse_id(&input.project_id, "project id")?;
        let filter = validate::normalize_filters(&input.statuses, &input.priorities)?;
        let parent_id =
            validate::parse_optional_id(input.parent_task_id.as_deref(), "parent task id")?;
        let limit = page_size(input.first, pagination::TASKS);
        let after = parse_after(input.after.as_deref())?;
        let owner_id = self.owner.owner_id().await?;

        let rows = self
            .db
            .execute(move |conn| {
                projects::get_project(conn, project_id, owner_id)
                    .map_err(|err| classify(err, "project not found"))?;

                let rows = match parent_id {
                    None => tasks::list_root_tasks(
                        conn,
                        owner_id,
                        project_id,
                        &filter,
                        after.as_ref(),
                        limit + 1,
                    )
                    .map_err(|err| classify(err, "failed to list tasks"))?,
                    Some(parent_id) => tasks::list_subtasks(
                        conn,
                        owner_id,
                        project_id,
                        parent_id,
                        &filter,
                        after.as_ref(),
                        limit + 1,
                    )
                    .map_err(|err| classify(err, "failed to list subtasks"))?,
                };
                Ok(rows)
            })
            .await
            .map_err(|err| classify(err, "failed to list tasks"))?;

        Ok(paginate(rows, limit, task_cursor))
    }

    /// Direct subtasks of a task, oldest first.
    pub async fn subtasks_for_task(&self, task_id: &str) -> Result<Vec<Task>, ServiceError> {
        let task_id = validate::parse_id(task_id, "task id")?;
        let owner_id = self.owner.owner_id().await?;

        self.db
            .execute(move |conn| tasks::list_subtasks_by_parent(conn, owner_id, task_id))
            .await
            .map_err(|err| classify(err, "failed to load subtasks"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn completion_timestamp_follows_status() {
        let now = Utc::now();
        let earlier = now - Duration::hours(1);

        assert_eq!(completion_after(TaskStatus::Todo, None, TaskStatus::Done, now), Some(now));
        assert_eq!(
            completion_after(TaskStatus::Done, None, TaskStatus::Done, now),
            Some(now)
        );
        assert_eq!(
            completion_after(TaskStatus::Done, Some(earlier), TaskStatus::Done, now),
            Some(earlier)
        );
        assert_eq!(
            completion_after(TaskStatus::Done, Some(earlier), TaskStatus::InProgress, now),
            None
        );
        assert_eq!(completion_after(TaskStatus::Blocked, None, TaskStatus::Todo, now), None);
    }
}
