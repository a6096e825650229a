//! Integration tests against a live Postgres, exercising the bulk-insert
//! protocol and the batch/store report-builder equivalence.
//!
//! These need `DATABASE_URL` pointing at a scratch database and share one
//! `attempts` table, so they are `#[ignore]`d by default. Run with:
//!
//! ```text
//! DATABASE_URL=postgres://... cargo test -- --ignored --test-threads=1
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::PgPoolOptions;

use attempt_stats::db::Db;
use attempt_stats::models::{Attempt, AttemptType, Report};
use attempt_stats::report::{BatchReportBuilder, DbReportBuilder, ReportBuilder};
use attempt_stats::store::AttemptStore;

async fn connect() -> Db {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for db tests");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

fn ts(year: i32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, 6, 15)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn attempt(
    user: &str,
    attempt_type: AttemptType,
    is_correct: Option<bool>,
    created_at: NaiveDateTime,
) -> Attempt {
    Attempt {
        id: None,
        user_id: user.to_string(),
        created_at,
        attempt_type,
        is_correct,
        oauth_consumer_key: "key".to_string(),
        lis_result_sourcedid: "sourcedid".to_string(),
        lis_outcome_service_url: "https://lms/grade".to_string(),
    }
}

/// User A: one successful and one failed submit; user B: one run.
fn scenario(year: i32) -> Vec<Attempt> {
    vec![
        attempt("A", AttemptType::Submit, Some(true), ts(year, 1)),
        attempt("A", AttemptType::Submit, Some(false), ts(year, 2)),
        attempt("B", AttemptType::Run, None, ts(year, 3)),
    ]
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn insert_assigns_fresh_increasing_ids_in_input_order() {
    let store = AttemptStore::new(connect().await);
    let mut attempts: Vec<Attempt> = (0..7)
        .map(|i| attempt(&format!("u{i}"), AttemptType::Run, None, ts(2031, i)))
        .collect();
    store.insert_many(&mut attempts).await.unwrap();

    let ids: Vec<i64> = attempts.iter().map(|a| a.id.unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids follow input order");

    // a second batch never reuses earlier ids
    let mut more: Vec<Attempt> = (0..3)
        .map(|i| attempt(&format!("v{i}"), AttemptType::Run, None, ts(2031, i)))
        .collect();
    store.insert_many(&mut more).await.unwrap();
    assert!(more.iter().all(|a| a.id.unwrap() > *ids.last().unwrap()));
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn batch_and_store_builders_agree() {
    let store = AttemptStore::new(connect().await);
    let mut attempts = scenario(2032);
    store.insert_many(&mut attempts).await.unwrap();

    let (start, end) = (ts(2032, 0), ts(2032, 23));
    let from_batch = BatchReportBuilder::new(start, end, attempts)
        .build_report()
        .await
        .unwrap();
    let from_store = DbReportBuilder::new(start, end, store)
        .build_report()
        .await
        .unwrap();

    assert_eq!(from_batch, from_store);
    assert_eq!(from_batch.total_operations, 3);
    assert_eq!(from_batch.unique_users, 2);
    assert_eq!(from_batch.success_submits, 1);
    assert_eq!(from_batch.failure_submits, 1);
    assert_eq!(from_batch.avg_submit_per_user, 2.0);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn window_bounds_are_inclusive() {
    let store = AttemptStore::new(connect().await);
    let mut attempts = vec![
        attempt("edge", AttemptType::Run, None, ts(2033, 1)),
        attempt("edge", AttemptType::Run, None, ts(2033, 5)),
        attempt("edge", AttemptType::Run, None, ts(2033, 9)),
    ];
    store.insert_many(&mut attempts).await.unwrap();

    // window bounds sit exactly on the first and last created_at
    let report = DbReportBuilder::new(ts(2033, 1), ts(2033, 9), store)
        .build_report()
        .await
        .unwrap();
    assert_eq!(report.total_operations, 3);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn chunk_size_does_not_change_persisted_outcome() {
    let pool = connect().await;
    let one_by_one = AttemptStore::with_chunk_size(pool.clone(), 1);
    let bulk = AttemptStore::with_chunk_size(pool.clone(), 1000);

    // same shape of data in two disjoint windows, inserted with different
    // chunk sizes
    let mut a = scenario(2034);
    let mut b = scenario(2035);
    one_by_one.insert_many(&mut a).await.unwrap();
    bulk.insert_many(&mut b).await.unwrap();

    let store = AttemptStore::new(pool);
    let report_a = DbReportBuilder::new(ts(2034, 0), ts(2034, 23), store.clone())
        .build_report()
        .await
        .unwrap();
    let report_b = DbReportBuilder::new(ts(2035, 0), ts(2035, 23), store)
        .build_report()
        .await
        .unwrap();

    assert_eq!(report_a.total_operations, report_b.total_operations);
    assert_eq!(report_a.unique_users, report_b.unique_users);
    assert_eq!(report_a.success_submits, report_b.success_submits);
    assert_eq!(report_a.failure_submits, report_b.failure_submits);
    assert_eq!(report_a.avg_submit_per_user, report_b.avg_submit_per_user);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn truncate_empties_every_window_and_keeps_the_sequence() {
    let store = AttemptStore::new(connect().await);
    let mut attempts = scenario(2036);
    store.insert_many(&mut attempts).await.unwrap();
    let last_id = attempts.last().unwrap().id.unwrap();

    store.truncate().await.unwrap();

    let report = DbReportBuilder::new(ts(2036, 0), ts(2036, 23), store.clone())
        .build_report()
        .await
        .unwrap();
    assert_eq!(report, Report::empty(ts(2036, 0), ts(2036, 23)));

    // ids keep increasing after a truncate; the sequence is never reset
    let mut more = vec![attempt("C", AttemptType::Run, None, ts(2036, 4))];
    store.insert_many(&mut more).await.unwrap();
    assert!(more[0].id.unwrap() > last_id);
}
