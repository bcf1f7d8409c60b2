use tc_db::models::{TaskComplexity, TaskStatus};
use tc_db::queries::{projects, tasks};
use tc_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn ready_tasks_respect_project_and_dependency_state() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "widget-factory", 5)
        .await
        .expect("insert project");

    let blocker = tasks::insert_task(
        &pool,
        project.id,
        "write the schema",
        "",
        1,
        TaskComplexity::Medium,
        None,
        &[],
    )
    .await
    .expect("insert blocker task");

    let blocked = tasks::insert_task(
        &pool,
        project.id,
        "write the migration",
        "",
        1,
        TaskComplexity::Low,
        Some(blocker.id),
        &[],
    )
    .await
    .expect("insert blocked task");

    let ready = tasks::get_ready_tasks(&pool).await.expect("ready tasks");
    let ready_ids: Vec<_> = ready.iter().map(|t| t.id).collect();
    assert!(ready_ids.contains(&blocker.id));
    assert!(!ready_ids.contains(&blocked.id), "blocked task should not be ready yet");

    let affected = tasks::transition_task_status(
        &pool,
        blocker.id,
        TaskStatus::Queued,
        TaskStatus::Complete,
    )
    .await
    .expect("transition blocker");
    assert_eq!(affected, 1);

    let ready = tasks::get_ready_tasks(&pool).await.expect("ready tasks again");
    let ready_ids: Vec<_> = ready.iter().map(|t| t.id).collect();
    assert!(ready_ids.contains(&blocked.id), "blocked task should unblock once its blocker completes");

    let progress = tasks::get_project_progress(&pool, project.id)
        .await
        .expect("project progress");
    assert_eq!(progress.complete, 1);
    assert_eq!(progress.queued, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_is_guarded_by_expected_status() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "widget-factory-2", 0)
        .await
        .expect("insert project");
    let task = tasks::insert_task(
        &pool,
        project.id,
        "do the thing",
        "",
        0,
        TaskComplexity::Low,
        None,
        &[],
    )
    .await
    .expect("insert task");

    // Task is queued, not in_progress, so this guarded transition is a no-op.
    let affected = tasks::transition_task_status(
        &pool,
        task.id,
        TaskStatus::InProgress,
        TaskStatus::Complete,
    )
    .await
    .expect("guarded transition");
    assert_eq!(affected, 0);

    let row = tasks::get_task(&pool, task.id)
        .await
        .expect("get task")
        .expect("task exists");
    assert_eq!(row.status, TaskStatus::Queued);

    pool.close().await;
    drop_test_db(&db_name).await;
}
