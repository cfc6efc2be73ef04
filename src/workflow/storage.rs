/// Workflow persistence collaborator
///
/// The engine only needs two reads: the project's workflow graph and the project
/// itself. The writes exist so the HTTP surface can seed projects.
/// `SqliteWorkflowStore` keeps both in SQLite with the graph stored as JSON;
/// `InMemoryWorkflowStore` backs tests and embedded use.

use crate::project::Project;
use crate::workflow::types::WorkflowGraph;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::sync::RwLock;

/// Persistence the engine reads from
///
/// `Ok(None)` means "not found" and is mapped to `GraphNotFound` by the engine.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    async fn get_workflow(&self, project_id: &str) -> Result<Option<WorkflowGraph>>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// Insert or update a project
    async fn save_project(&self, project: &Project) -> Result<()>;

    /// Insert or replace the workflow graph of a project
    async fn save_workflow(&self, project_id: &str, workflow: &WorkflowGraph) -> Result<()>;
}

/// SQLite-based workflow storage
///
/// One row per project in `projects`, one JSON graph per project in `workflows`.
#[derive(Debug, Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if missing; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                project_id TEXT PRIMARY KEY,
                definition JSON NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn get_workflow(&self, project_id: &str) -> Result<Option<WorkflowGraph>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT definition FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        let definition_json = serde_json::to_string(project)?;

        sqlx::query(
            r#"
            INSERT INTO projects (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_workflow(&self, project_id: &str, workflow: &WorkflowGraph) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (project_id, definition, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(project_id) DO UPDATE SET
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(project_id)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Map-backed store
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    projects: RwLock<HashMap<String, Project>>,
    workflows: RwLock<HashMap<String, WorkflowGraph>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("workflow store lock poisoned")
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project together with its workflow
    pub fn insert(&self, project: Project, workflow: WorkflowGraph) {
        if let Ok(mut workflows) = self.workflows.write() {
            workflows.insert(project.id.clone(), workflow);
        }
        if let Ok(mut projects) = self.projects.write() {
            projects.insert(project.id.clone(), project);
        }
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow(&self, project_id: &str) -> Result<Option<WorkflowGraph>> {
        let workflows = self.workflows.read().map_err(poisoned)?;
        Ok(workflows.get(project_id).cloned())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects.get(project_id).cloned())
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        self.projects
            .write()
            .map_err(poisoned)?
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn save_workflow(&self, project_id: &str, workflow: &WorkflowGraph) -> Result<()> {
        self.workflows
            .write()
            .map_err(poisoned)?
            .insert(project_id.to_string(), workflow.clone());
        Ok(())
    }
}
