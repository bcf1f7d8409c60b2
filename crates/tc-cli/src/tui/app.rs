//! TUI application state and data model.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use tc_db::models::{Project, ProjectStatus, Task, TaskStatus};
use tc_db::queries::tasks as task_db;
use tc_db::queries::{projects as project_db, tasks::TaskProgress};

/// Which view the TUI is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    ProjectList,
    ProjectDetail(Uuid),
    Help,
}

/// Aggregated project info for the list view.
#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub project: Project,
    pub progress: TaskProgress,
}

/// Application state for the TUI.
pub struct App {
    pub pool: PgPool,
    pub current_view: View,
    pub projects: Vec<ProjectRow>,
    pub selected_project: usize,
    pub tasks: Vec<Task>,
    pub selected_task: usize,
    pub tick_rate: Duration,
    pub should_quit: bool,
    pub status_message: Option<String>,
}

impl App {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            current_view: View::ProjectList,
            projects: Vec::new(),
            selected_project: 0,
            tasks: Vec::new(),
            selected_task: 0,
            tick_rate: Duration::from_secs(1),
            should_quit: false,
            status_message: None,
        }
    }

    /// Refresh data from the database based on the current view.
    pub async fn refresh(&mut self) -> Result<()> {
        match &self.current_view {
            View::ProjectList => self.refresh_projects().await?,
            View::ProjectDetail(project_id) => {
                let project_id = *project_id;
                self.tasks = task_db::list_tasks_for_project(&self.pool, project_id).await?;
                if self.selected_task >= self.tasks.len() && !self.tasks.is_empty() {
                    self.selected_task = self.tasks.len() - 1;
                }
            }
            View::Help => {}
        }
        Ok(())
    }

    async fn refresh_projects(&mut self) -> Result<()> {
        let projects = project_db::list_projects(&self.pool).await?;
        let mut rows = Vec::with_capacity(projects.len());
        for project in projects {
            let progress = task_db::get_project_progress(&self.pool, project.id).await?;
            rows.push(ProjectRow { project, progress });
        }
        self.projects = rows;
        if self.selected_project >= self.projects.len() && !self.projects.is_empty() {
            self.selected_project = self.projects.len() - 1;
        }
        Ok(())
    }

    // -- Navigation --

    pub fn navigate_back(&mut self) {
        match &self.current_view {
            View::ProjectList => self.should_quit = true,
            View::ProjectDetail(_) => self.current_view = View::ProjectList,
            View::Help => self.current_view = View::ProjectList,
        }
    }

    pub fn navigate_enter(&mut self) {
        if let View::ProjectList = &self.current_view {
            if let Some(row) = self.projects.get(self.selected_project) {
                self.current_view = View::ProjectDetail(row.project.id);
                self.selected_task = 0;
            }
        }
    }

    pub fn move_up(&mut self) {
        match &self.current_view {
            View::ProjectList => {
                if self.selected_project > 0 {
                    self.selected_project -= 1;
                }
            }
            View::ProjectDetail(_) => {
                if self.selected_task > 0 {
                    self.selected_task -= 1;
                }
            }
            View::Help => {}
        }
    }

    pub fn move_down(&mut self) {
        match &self.current_view {
            View::ProjectList => {
                if !self.projects.is_empty() && self.selected_project < self.projects.len() - 1 {
                    self.selected_project += 1;
                }
            }
            View::ProjectDetail(_) => {
                if !self.tasks.is_empty() && self.selected_task < self.tasks.len() - 1 {
                    self.selected_task += 1;
                }
            }
            View::Help => {}
        }
    }

    pub fn show_help(&mut self) {
        self.current_view = View::Help;
    }

    // -- Actions --

    /// Toggle the selected project's pause state.
    pub async fn toggle_pause_selected(&mut self) -> Result<()> {
        if let Some(row) = self.projects.get(self.selected_project) {
            let next = match row.project.status {
                ProjectStatus::Active => ProjectStatus::Paused,
                ProjectStatus::Paused => ProjectStatus::Active,
            };
            project_db::set_project_status(&self.pool, row.project.id, next).await?;
            self.status_message = Some(format!("project set to {next}"));
            self.refresh().await?;
        }
        Ok(())
    }

    /// Cancel the selected task, if it is still cancellable.
    pub async fn cancel_selected_task(&mut self) -> Result<()> {
        if let View::ProjectDetail(_) = &self.current_view {
            if let Some(task) = self.tasks.get(self.selected_task) {
                if task.status != TaskStatus::Complete && task.status != TaskStatus::Cancelled {
                    task_db::cancel_task(&self.pool, task.id).await?;
                    self.status_message = Some("task cancelled".to_string());
                    self.refresh().await?;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_navigation() {
        let project_id = Uuid::new_v4();

        let view = View::ProjectDetail(project_id);
        assert_ne!(view, View::ProjectList);

        let view = View::Help;
        assert_ne!(view, View::ProjectList);
    }
}
