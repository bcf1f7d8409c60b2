use tc_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_apply_cleanly() {
    let (pool, db_name) = create_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .expect("should list tables");

    let names: Vec<&str> = tables.iter().map(|(t,)| t.as_str()).collect();
    for expected in [
        "projects",
        "tasks",
        "sessions",
        "spend_events",
        "completion_records",
        "calibration_factors",
    ] {
        assert!(names.contains(&expected), "missing table {expected}");
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}
