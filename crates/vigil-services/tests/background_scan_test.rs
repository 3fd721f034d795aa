mod helpers;

use chrono::{Duration, Utc};
use helpers::fixtures::{document, linking_raw, payload, upload_aged, EICAR};
use helpers::{
    closed_port, services, test_config, Behavior, FakeClamd, TestServices, CLEAN_REPLY,
    EICAR_REPLY, SIZE_LIMIT_REPLY,
};
use vigil_core::{AntivirusConfig, PoolEndpoint, ScanRecord, Upload};

const VERSION_101: &str = "ClamAV 1.3.1/101/Tue Aug 27 08:40:39 2024";

async fn clamd(scan_reply: &str) -> FakeClamd {
    FakeClamd::start_with(Behavior {
        version: VERSION_101.to_string(),
        scan_reply: scan_reply.to_string(),
        ..Default::default()
    })
    .await
}

fn setup(clamd: &FakeClamd) -> TestServices {
    services(vec![clamd.endpoint()], test_config(&[clamd.port()]))
}

/// Stores the upload and its bytes, and a record last scanned with `version`.
fn tracked(svc: &TestServices, upload: &Upload, version: i64, next: Option<chrono::DateTime<Utc>>) {
    svc.store.add_upload(upload.clone());
    svc.storage.insert(&upload.storage_key, payload(3000));
    svc.store.insert_record(ScanRecord {
        scans: 1,
        next_scan_at: next,
        virus_database_version_used: Some(version),
        ..ScanRecord::pending(upload.id, Utc::now(), Duration::zero())
    });
}

#[tokio::test]
async fn test_queue_batch_creates_pending_records() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let system = AntivirusConfig::default().system_user_id;

    let unreferenced = upload_aged(1, 0);
    let user_linked = upload_aged(2, 0);
    let system_only = upload_aged(3, 0);
    for upload in [&unreferenced, &user_linked, &system_only] {
        svc.store.add_upload(upload.clone());
    }
    svc.store
        .add_document(2, document(10, 42, 100, &linking_raw(&user_linked)));
    svc.store
        .add_document(3, document(11, system, 100, &linking_raw(&system_only)));

    let before = Utc::now();
    let created = svc.scanner.queue_batch(1000).await.unwrap();

    assert_eq!(created, 2);
    let record = svc.store.record(1).unwrap();
    assert_eq!(record.scans, 0);
    assert!(!record.quarantined);
    let next = record.next_scan_at.unwrap();
    assert!(next >= before + Duration::minutes(10));
    assert!(next <= Utc::now() + Duration::minutes(10));
    assert!(svc.store.record(2).is_some());
    assert!(svc.store.record(3).is_none());

    // Already tracked uploads are never queued twice
    assert_eq!(svc.scanner.queue_batch(1000).await.unwrap(), 0);
    assert_eq!(svc.store.records().len(), 2);
}

#[tokio::test]
async fn test_queue_batch_respects_limit() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    for id in 1..=5 {
        svc.store.add_upload(upload_aged(id, 0));
    }

    assert_eq!(svc.scanner.queue_batch(3).await.unwrap(), 3);
    assert_eq!(svc.scanner.queue_batch(3).await.unwrap(), 2);
}

#[tokio::test]
async fn test_newer_signatures_trigger_rescan_in_first_week() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 2);
    tracked(&svc, &upload, 100, None);

    let processed = svc.scanner.scan_batch(1000).await.unwrap();

    assert_eq!(processed, 1);
    let record = svc.store.record(1).unwrap();
    assert_eq!(record.scans, 2);
    assert_eq!(record.virus_database_version_used, Some(101));
    assert_eq!(record.next_scan_at, None);
    assert!(!record.last_scan_failed);
    assert_eq!(record.scan_result.as_deref(), Some(CLEAN_REPLY));
    assert!(!record.quarantined);
    assert!(svc.store.cases().is_empty());
}

#[tokio::test]
async fn test_future_schedule_overrides_version() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 2);
    tracked(&svc, &upload, 100, Some(Utc::now() + Duration::days(1)));

    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 0);
    assert_eq!(svc.store.record(1).unwrap().scans, 1);
}

#[tokio::test]
async fn test_up_to_date_record_is_not_rescanned() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    tracked(&svc, &upload_aged(1, 2), 101, None);

    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cadence_after_first_week() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 10);
    tracked(&svc, &upload, 101, Some(Utc::now() - Duration::minutes(1)));

    let before = Utc::now();
    svc.scanner.scan_batch(1000).await.unwrap();

    // Week 2: the gap is (2 - 1) weeks
    let next = svc.store.record(1).unwrap().next_scan_at.unwrap();
    assert!(next >= before + Duration::weeks(1));
    assert!(next <= Utc::now() + Duration::weeks(1));
}

#[tokio::test]
async fn test_all_offline_processes_nothing() {
    let down = PoolEndpoint::new("127.0.0.1", closed_port().await);
    let svc = services(vec![down], test_config(&[]));
    tracked(&svc, &upload_aged(1, 2), 100, Some(Utc::now() - Duration::hours(1)));

    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 0);
    let record = svc.store.record(1).unwrap();
    assert_eq!(record.scans, 1);
    assert!(!record.last_scan_failed);
}

#[tokio::test]
async fn test_positive_scan_quarantines_and_flags() {
    let clamd = clamd(EICAR_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 0);
    tracked(&svc, &upload, 100, Some(Utc::now() - Duration::minutes(1)));
    svc.storage.insert(&upload.storage_key, EICAR.to_vec());
    svc.store.add_user(42, "alice");
    svc.store
        .add_document(upload.id, document(10, 42, 100, &linking_raw(&upload)));

    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 1);

    let record = svc.store.record(1).unwrap();
    assert!(record.quarantined);
    assert_eq!(record.scan_result.as_deref(), Some(EICAR_REPLY));
    let cases = svc.store.cases();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].upload_id, 1);
    assert_eq!(svc.store.scores().len(), 1);
    assert_eq!(svc.store.notifications().len(), 1);
}

#[tokio::test]
async fn test_failed_quarantine_keeps_record_due() {
    let clamd = clamd(EICAR_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 2);
    tracked(&svc, &upload, 100, None);
    svc.store.set_fail_quarantines(true);

    let before = Utc::now();
    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 0);

    let record = svc.store.record(1).unwrap();
    assert!(!record.quarantined);
    assert!(record.last_scan_failed);
    assert_eq!(record.scans, 1);
    assert_eq!(record.virus_database_version_used, Some(100));
    assert_eq!(record.scan_result.as_deref(), Some(EICAR_REPLY));
    let next = record.next_scan_at.unwrap();
    assert!(next >= before + Duration::hours(24));
    assert!(record.is_due(Some(101), next));
    assert!(svc.store.cases().is_empty());

    // Once the retry delay has passed the detection is quarantined
    svc.store.set_fail_quarantines(false);
    svc.store.insert_record(ScanRecord {
        next_scan_at: Some(Utc::now() - Duration::minutes(1)),
        ..record
    });
    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 1);

    let record = svc.store.record(1).unwrap();
    assert!(record.quarantined);
    assert!(!record.last_scan_failed);
    assert_eq!(record.scans, 2);
    assert_eq!(record.virus_database_version_used, Some(101));
    assert_eq!(svc.store.cases().len(), 1);
}

#[tokio::test]
async fn test_concurrent_positive_scans_quarantine_once() {
    let clamd = clamd(EICAR_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 0);
    tracked(&svc, &upload, 100, Some(Utc::now() - Duration::minutes(1)));
    svc.store
        .add_document(upload.id, document(10, 42, 100, &linking_raw(&upload)));

    let (first, second) = tokio::join!(
        svc.scanner.scan_batch(1000),
        svc.scanner.scan_batch(1000)
    );
    first.unwrap();
    second.unwrap();

    assert!(svc.store.record(1).unwrap().quarantined);
    assert_eq!(svc.store.cases().len(), 1);
    assert_eq!(svc.store.scores().len(), 1);
    assert_eq!(svc.store.notifications().len(), 1);

    // Quarantined records are never selected again
    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 0);
}

#[tokio::test]
async fn test_clean_scan_never_quarantines() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    tracked(&svc, &upload_aged(1, 0), 100, Some(Utc::now() - Duration::minutes(1)));

    svc.scanner.scan_batch(1000).await.unwrap();

    assert!(!svc.store.record(1).unwrap().quarantined);
    assert!(svc.store.cases().is_empty());
}

#[tokio::test]
async fn test_download_failure_is_retried_later() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 0);
    tracked(&svc, &upload, 100, Some(Utc::now() - Duration::minutes(1)));
    svc.storage.fail_downloads_of(&upload.storage_key);

    let before = Utc::now();
    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 1);

    let record = svc.store.record(1).unwrap();
    assert!(record.last_scan_failed);
    assert_eq!(record.scan_result.as_deref(), Some("Download failed"));
    assert_eq!(record.scans, 1);
    assert_eq!(record.virus_database_version_used, Some(100));
    let next = record.next_scan_at.unwrap();
    assert!(next >= before + Duration::hours(24));
    assert!(!record.quarantined);
}

#[tokio::test]
async fn test_daemon_error_counts_attempt_without_version() {
    let clamd = clamd(SIZE_LIMIT_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 0);
    tracked(&svc, &upload, 100, Some(Utc::now() - Duration::minutes(1)));

    svc.scanner.scan_batch(1000).await.unwrap();

    let record = svc.store.record(1).unwrap();
    assert_eq!(record.scans, 2);
    assert!(record.last_scan_failed);
    assert_eq!(record.virus_database_version_used, Some(100));
    assert_eq!(record.scan_result.as_deref(), Some(SIZE_LIMIT_REPLY));
    assert!(record.next_scan_at.unwrap() > Utc::now() + Duration::hours(23));
    assert!(!record.quarantined);
    assert!(svc.store.cases().is_empty());
}

#[tokio::test]
async fn test_record_of_deleted_upload_is_skipped() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let upload = upload_aged(1, 0);
    tracked(&svc, &upload, 100, Some(Utc::now() - Duration::minutes(1)));
    svc.store.remove_upload(upload.id);

    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 0);

    assert_eq!(svc.scanner.remove_orphaned().await.unwrap(), 1);
    assert!(svc.store.record(1).is_none());
}

#[tokio::test]
async fn test_one_failure_does_not_abort_batch() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    let broken = upload_aged(1, 0);
    let fine = upload_aged(2, 0);
    tracked(&svc, &broken, 100, Some(Utc::now() - Duration::minutes(1)));
    tracked(&svc, &fine, 100, Some(Utc::now() - Duration::minutes(1)));
    svc.storage.fail_downloads_of(&broken.storage_key);

    assert_eq!(svc.scanner.scan_batch(1000).await.unwrap(), 2);

    assert!(svc.store.record(1).unwrap().last_scan_failed);
    let record = svc.store.record(2).unwrap();
    assert!(!record.last_scan_failed);
    assert_eq!(record.virus_database_version_used, Some(101));
}

#[tokio::test]
async fn test_stats_after_scans() {
    let clamd = clamd(EICAR_REPLY).await;
    let svc = setup(&clamd);
    tracked(&svc, &upload_aged(1, 0), 100, Some(Utc::now() - Duration::minutes(1)));

    svc.scanner.scan_batch(1000).await.unwrap();
    let stats = svc.scanner.stats().await.unwrap();

    assert_eq!(stats.scans, 2);
    assert_eq!(stats.recently_scanned, 1);
    assert_eq!(stats.quarantined, 1);
    assert_eq!(stats.found, 1);
}

#[tokio::test]
async fn test_forgotten_upload_is_queued_again() {
    let clamd = clamd(CLEAN_REPLY).await;
    let svc = setup(&clamd);
    tracked(&svc, &upload_aged(1, 0), 100, None);

    assert!(svc.scanner.forget(1).await.unwrap());
    assert!(!svc.scanner.forget(1).await.unwrap());
    assert!(svc.store.record(1).is_none());

    assert_eq!(svc.scanner.queue_batch(10).await.unwrap(), 1);
    assert_eq!(svc.store.record(1).unwrap().scans, 0);
}
