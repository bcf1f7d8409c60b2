//! TUI rendering using ratatui.

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};

use tc_db::models::{ProjectStatus, TaskStatus};

use super::app::{App, View};

/// Render the current view.
pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // main content
            Constraint::Length(1), // status bar
        ])
        .split(f.area());

    match &app.current_view {
        View::ProjectList => render_project_list(f, app, chunks[0]),
        View::ProjectDetail(project_id) => render_project_detail(f, app, *project_id, chunks[0]),
        View::Help => render_help(f, chunks[0]),
    }

    render_status_bar(f, app, chunks[1]);
}

fn render_project_list(f: &mut Frame, app: &App, area: Rect) {
    let header_cells = ["Name", "Status", "Priority", "Queued", "In Progress", "Blocked", "Complete"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
    let header = Row::new(header_cells).height(1);

    let rows = app.projects.iter().enumerate().map(|(i, pr)| {
        let prog = &pr.progress;
        let style = if i == app.selected_project {
            Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        Row::new(vec![
            Cell::from(pr.project.name.clone()),
            Cell::from(project_status_colored(&pr.project.status)),
            Cell::from(pr.project.priority.to_string()),
            Cell::from(prog.queued.to_string()),
            Cell::from(prog.in_progress.to_string()),
            Cell::from(prog.blocked.to_string()),
            Cell::from(prog.complete.to_string()),
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(28),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(12),
            Constraint::Length(9),
            Constraint::Length(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" Projects "));

    f.render_widget(table, area);
}

fn render_project_detail(f: &mut Frame, app: &App, project_id: uuid::Uuid, area: Rect) {
    let row = app.projects.iter().find(|pr| pr.project.id == project_id);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(area);

    let header_text = if let Some(pr) = row {
        format!(
            " {} | {} | priority {} | root {}",
            pr.project.name, pr.project.status, pr.project.priority, pr.project.root_path
        )
    } else {
        " unknown project".to_string()
    };

    let header = Paragraph::new(header_text).block(Block::default().borders(Borders::ALL).title(" Project "));
    f.render_widget(header, chunks[0]);

    let task_header_cells = ["Title", "Status", "Priority", "Complexity", "Sessions", "Created"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
    let task_header = Row::new(task_header_cells).height(1);

    let task_rows = app.tasks.iter().enumerate().map(|(i, task)| {
        let style = if i == app.selected_task {
            Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        Row::new(vec![
            Cell::from(task.title.clone()),
            Cell::from(task_status_colored(&task.status)),
            Cell::from(task.priority.to_string()),
            Cell::from(task.complexity.to_string()),
            Cell::from(format!("{}/{}", task.actual_sessions, task.estimated_sessions)),
            Cell::from(task.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ])
        .style(style)
    });

    let task_table = Table::new(
        task_rows,
        [
            Constraint::Percentage(30),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(18),
        ],
    )
    .header(task_header)
    .block(Block::default().borders(Borders::ALL).title(" Tasks "));

    f.render_widget(task_table, chunks[1]);
}

fn render_help(f: &mut Frame, area: Rect) {
    let text = vec![
        Line::from(""),
        Line::from(vec![Span::styled(
            "  Navigation",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )]),
        Line::from("    j/Down    Move down"),
        Line::from("    k/Up      Move up"),
        Line::from("    Enter     Drill into selected project"),
        Line::from("    Esc/q     Back / Quit"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "  Actions",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )]),
        Line::from("    p         Pause/resume selected project"),
        Line::from("    c         Cancel selected task"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "  Other",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )]),
        Line::from("    ?         Show this help"),
        Line::from(""),
    ];

    let help = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title(" Help "));
    f.render_widget(help, area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let view_name = match &app.current_view {
        View::ProjectList => "Projects",
        View::ProjectDetail(_) => "Project Detail",
        View::Help => "Help",
    };

    let queued_total: i64 = app.projects.iter().map(|pr| pr.progress.queued).sum();

    let status_msg = app.status_message.as_deref().unwrap_or("");

    let bar = Line::from(vec![
        Span::styled(format!(" {view_name} "), Style::default().bg(Color::Blue).fg(Color::White)),
        Span::raw("  "),
        if queued_total > 0 {
            Span::styled(format!("{queued_total} tasks queued"), Style::default().fg(Color::Yellow))
        } else {
            Span::styled("backlog empty", Style::default().fg(Color::DarkGray))
        },
        Span::raw("  "),
        Span::styled(status_msg, Style::default().fg(Color::Green)),
        Span::raw("  q:quit  ?:help  p:pause/resume  c:cancel"),
    ]);

    f.render_widget(Paragraph::new(bar), area);
}

// -- Helpers --

fn project_status_colored(status: &ProjectStatus) -> Span<'static> {
    let (text, color) = match status {
        ProjectStatus::Active => ("active", Color::Green),
        ProjectStatus::Paused => ("paused", Color::DarkGray),
    };
    Span::styled(text.to_string(), Style::default().fg(color))
}

fn task_status_colored(status: &TaskStatus) -> Span<'static> {
    let (text, color) = match status {
        TaskStatus::Queued => ("queued", Color::DarkGray),
        TaskStatus::InProgress => ("in_progress", Color::Blue),
        TaskStatus::Blocked => ("blocked", Color::Yellow),
        TaskStatus::Complete => ("complete", Color::Green),
        TaskStatus::Cancelled => ("cancelled", Color::Red),
    };
    Span::styled(text.to_string(), Style::default().fg(color))
}
