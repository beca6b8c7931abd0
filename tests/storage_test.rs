//! Integration tests for SQLite storage layer
//!
//! Each test opens a fresh database file in a temporary directory.

use serde_json::json;
use tempfile::TempDir;

use campus_query_router::config::DatabaseConfig;
use campus_query_router::error::StorageError;
use campus_query_router::storage::{Invocation, SqliteStorage, Storage, StudentRecord};

/// Create a file-backed storage instance in a temp dir
async fn create_test_storage() -> (SqliteStorage, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage = SqliteStorage::new(&DatabaseConfig {
        path: dir.path().join("campus.db"),
        max_connections: 2,
    })
    .await
    .expect("Failed to create storage");
    (storage, dir)
}

fn student(name: &str, semester: i64, fees: f64) -> StudentRecord {
    StudentRecord {
        name: name.to_string(),
        surname: "Tester".to_string(),
        nationality: "Italian".to_string(),
        semester,
        all_courses: "Databases, Networks".to_string(),
        discount_rate: "0%".to_string(),
        tuition_fees: fees,
    }
}

async fn seeded_storage() -> (SqliteStorage, TempDir) {
    let (storage, dir) = create_test_storage().await;
    for (name, semester, fees) in [("Ada", 1, 1000.0), ("Grace", 3, 1500.5), ("Alan", 3, 900.0)] {
        storage
            .insert_student(&student(name, semester, fees))
            .await
            .unwrap();
    }
    (storage, dir)
}

#[cfg(test)]
mod student_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_count() {
        let (storage, _dir) = seeded_storage().await;
        assert_eq!(storage.count_students().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_semester_out_of_range_is_rejected() {
        let (storage, _dir) = create_test_storage().await;
        let err = storage.insert_student(&student("Eve", 9, 10.0)).await;
        assert!(err.is_err(), "semester 9 violates the CHECK constraint");
        assert_eq!(storage.count_students().await.unwrap(), 0);
    }
}

#[cfg(test)]
mod read_only_tests {
    use super::*;

    #[tokio::test]
    async fn test_select_returns_columns_and_rows() {
        let (storage, _dir) = seeded_storage().await;

        let table = storage
            .run_read_only("SELECT name, semester, tuition_fees FROM students WHERE semester = 3 ORDER BY name;")
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["name", "semester", "tuition_fees"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["Alan".to_string(), "3".to_string(), "900".to_string()],
                vec!["Grace".to_string(), "3".to_string(), "1500.5".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_aggregate_and_cte() {
        let (storage, _dir) = seeded_storage().await;

        let table = storage
            .run_read_only(
                "WITH third AS (SELECT * FROM students WHERE semester = 3) SELECT COUNT(*) AS n FROM third",
            )
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["n"]);
        assert_eq!(table.rows, vec![vec!["2".to_string()]]);
    }

    #[tokio::test]
    async fn test_literals_with_keywords_and_semicolons_run() {
        let (storage, _dir) = seeded_storage().await;

        let table = storage
            .run_read_only(
                "SELECT replace(name, 'a', '4') AS n FROM students \
                 WHERE all_courses LIKE '%Networks%' AND surname <> 'O;Update' ORDER BY name",
            )
            .await
            .unwrap();

        assert_eq!(table.columns, vec!["n"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["Ad4".to_string()],
                vec!["Al4n".to_string()],
                vec!["Gr4ce".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_result_renders_no_rows() {
        let (storage, _dir) = seeded_storage().await;

        let table = storage
            .run_read_only("SELECT name FROM students WHERE semester = 8")
            .await
            .unwrap();

        assert!(table.is_empty());
        assert_eq!(table.render(), "(no columns)");
    }

    #[tokio::test]
    async fn test_writes_are_rejected_and_leave_data_intact() {
        let (storage, _dir) = seeded_storage().await;

        for sql in [
            "DELETE FROM students WHERE semester = 1",
            "UPDATE students SET tuition_fees = 0",
            "DROP TABLE students",
            "SELECT 1; DELETE FROM students",
            "WITH x AS (SELECT 1) DELETE FROM students",
        ] {
            let err = storage.run_read_only(sql).await.unwrap_err();
            assert!(
                matches!(err, StorageError::Rejected { .. }),
                "{} should be rejected, got {:?}",
                sql,
                err
            );
        }

        assert_eq!(storage.count_students().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_sql_is_query_error() {
        let (storage, _dir) = seeded_storage().await;

        let err = storage
            .run_read_only("SELECT no_such_column FROM students")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Query { .. }));
    }
}

#[cfg(test)]
mod invocation_tests {
    use super::*;

    #[tokio::test]
    async fn test_log_and_list_invocations() {
        let (storage, _dir) = create_test_storage().await;

        let ok = Invocation::new("generate", json!({ "prompt": "p" }))
            .with_session("session-1")
            .with_pipe("campus-answer-v1")
            .success(json!({ "output": "a" }), 120);
        storage.log_invocation(&ok).await.unwrap();

        let failed = Invocation::new("direct_answer", json!({ "prompt": "q" }))
            .failure("timeout", 30000);
        storage.log_invocation(&failed).await.unwrap();

        let recent = storage.recent_invocations(10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let logged = recent.iter().find(|i| i.id == ok.id).unwrap();
        assert_eq!(logged.session_id.as_deref(), Some("session-1"));
        assert_eq!(logged.pipe_name.as_deref(), Some("campus-answer-v1"));
        assert_eq!(logged.output, Some(json!({ "output": "a" })));
        assert!(logged.success);

        let logged = recent.iter().find(|i| i.id == failed.id).unwrap();
        assert!(!logged.success);
        assert_eq!(logged.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_recent_invocations_respects_limit() {
        let (storage, _dir) = create_test_storage().await;
        for i in 0..5 {
            let inv = Invocation::new("clock", json!({ "n": i })).success(json!({}), 1);
            storage.log_invocation(&inv).await.unwrap();
        }
        assert_eq!(storage.recent_invocations(3).await.unwrap().len(), 3);
    }
}
