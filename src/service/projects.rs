use log::{debug, info};

use super::{
    inputs::{CreateProjectInput, UpdateProjectInput},
    pagination::{self, encode_cursor, page_size, paginate, parse_after, Page},
    validate, TrackerService,
};
use crate::{
    db::{
        models::{DeleteResult, NewProject, Project},
        repositories::{projects, tasks},
    },
    error::{classify, ServiceError},
};

fn project_cursor(project: &Project) -> String {
    encode_cursor(&project.created_at, &project.id)
}

fn new_project(
    title: &str,
    description: Option<String>,
    color: Option<String>,
) -> Result<NewProject, ServiceError> {
    Ok(NewProject {
        title: validate::required(title, "project title is required")?,
        description,
        color: validate::normalize_color(color)?,
    })
}

impl TrackerService {
    pub async fn create_project(&self, input: CreateProjectInput) -> Result<Project, ServiceError> {
        let project = new_project(&input.title, input.description, input.color)?;
        let owner_id = self.owner.owner_id().await?;

        let created = self
            .db
            .execute(move |conn| projects::insert_project(conn, owner_id, &project))
            .await
            .map_err(|err| classify(err, "failed to create project"))?;

        debug!("Created project {}", created.id);
        Ok(created)
    }

    pub async fn update_project(&self, input: UpdateProjectInput) -> Result<Project, ServiceError> {
        let id = validate::parse_id(&input.id, "project id")?;
        let project = new_project(&input.title, input.description, input.color)?;
        let owner_id = self.owner.owner_id().await?;

        self.db
            .execute(move |conn| projects::update_project(conn, id, owner_id, &project))
            .await
            .map_err(|err| classify(err, "project not found"))
    }

    /// Soft-deletes the project together with every task in it.
    pub async fn delete_project(&self, id: &str) -> Result<DeleteResult, ServiceError> {
        let id = validate::parse_id(id, "project id")?;
        let owner_id = self.owner.owner_id().await?;

        let (deleted, cascaded) = self
            .db
            .with_tx("failed to delete project", move |tx| {
                let deleted = projects::soft_delete_project(tx, id, owner_id)
                    .map_err(|err| classify(err, "project not found"))?;
                let cascaded = tasks::soft_delete_tasks_by_project(tx, owner_id, id)
                    .map_err(|err| classify(err, "failed to delete project tasks"))?;
                Ok((deleted, cascaded))
            })
            .await?;

        info!("Deleted project {id} and {cascaded} task(s)");
        Ok(deleted)
    }

    /// `None` when the project does not exist or is deleted.
    pub async fn project(&self, id: &str) -> Result<Option<Project>, ServiceError> {
        let id = validate::parse_id(id, "project id")?;
        let owner_id = self.owner.owner_id().await?;

        self.db
            .execute(move |conn| projects::find_project(conn, id, owner_id))
            .await
            .map_err(|err| classify(err, "failed to fetch project"))
    }

    pub async fn list_projects(
        &self,
        first: i64,
        after: Option<&str>,
    ) -> Result<Page<Project>, ServiceError> {
        let limit = page_size(first, pagination::PROJECTS);
        let after = parse_after(after)?;
        let owner_id = self.owner.owner_id().await?;

        let rows = self
            .db
            .execute(move |conn| projects::list_projects(conn, owner_id, after.as_ref(), limit + 1))
            .await
            .map_err(|err| classify(err, "failed to list projects"))?;

        Ok(paginate(rows, limit, project_cursor))
    }
}
