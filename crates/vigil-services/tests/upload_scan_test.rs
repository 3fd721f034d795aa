mod helpers;

use helpers::fixtures::EICAR;
use helpers::{closed_port, pool_for, Behavior, FakeClamd, EICAR_REPLY, SIZE_LIMIT_REPLY};
use std::sync::Arc;
use vigil_core::{AntivirusConfig, PoolEndpoint, UploadKind};
use vigil_db::test_helpers::InMemoryStore;
use vigil_services::{UploadRejected, UploadScanHook};

fn config() -> AntivirusConfig {
    AntivirusConfig {
        enabled: true,
        clamav_hosts: vec!["127.0.0.1".to_string()],
        ..Default::default()
    }
}

fn hook(endpoints: Vec<PoolEndpoint>, config: AntivirusConfig) -> UploadScanHook {
    let store = InMemoryStore::new();
    UploadScanHook::new(Arc::new(pool_for(endpoints, &store)), config)
}

async fn infected_daemon() -> FakeClamd {
    FakeClamd::start_with(Behavior {
        scan_reply: EICAR_REPLY.to_string(),
        ..Default::default()
    })
    .await
}

#[tokio::test]
async fn test_clean_upload_is_accepted() {
    let clamd = FakeClamd::start().await;
    let hook = hook(vec![clamd.endpoint()], config());

    assert_eq!(
        hook.validate_bytes(b"hello", UploadKind::Attachment, true).await,
        Ok(())
    );
    assert_eq!(clamd.scan_sessions().await.len(), 1);
}

#[tokio::test]
async fn test_infected_upload_is_rejected() {
    let clamd = infected_daemon().await;
    let hook = hook(vec![clamd.endpoint()], config());

    let result = hook.validate_bytes(EICAR, UploadKind::Attachment, true).await;

    assert_eq!(result, Err(UploadRejected::VirusFound(EICAR_REPLY.to_string())));
}

#[tokio::test]
async fn test_daemon_error_is_inconclusive() {
    let clamd = FakeClamd::start_with(Behavior {
        scan_reply: SIZE_LIMIT_REPLY.to_string(),
        ..Default::default()
    })
    .await;
    let hook = hook(vec![clamd.endpoint()], config());

    let result = hook.validate_bytes(EICAR, UploadKind::Attachment, true).await;

    assert!(matches!(result, Err(UploadRejected::ScanInconclusive(_))));
}

#[tokio::test]
async fn test_exports_and_unvalidated_uploads_are_skipped() {
    let clamd = infected_daemon().await;
    let hook = hook(vec![clamd.endpoint()], config());

    assert_eq!(hook.validate_bytes(EICAR, UploadKind::Export, true).await, Ok(()));
    assert_eq!(
        hook.validate_bytes(EICAR, UploadKind::Attachment, false).await,
        Ok(())
    );
    assert_eq!(clamd.connection_count(), 0);
}

#[tokio::test]
async fn test_images_scanned_only_when_enabled() {
    let clamd = infected_daemon().await;

    let skipping = hook(vec![clamd.endpoint()], config());
    assert_eq!(skipping.validate_bytes(EICAR, UploadKind::Image, true).await, Ok(()));

    let scanning = hook(
        vec![clamd.endpoint()],
        AntivirusConfig {
            live_scan_images: true,
            ..config()
        },
    );
    assert!(matches!(
        scanning.validate_bytes(EICAR, UploadKind::Image, true).await,
        Err(UploadRejected::VirusFound(_))
    ));
}

#[tokio::test]
async fn test_disabled_feature_skips_scanning() {
    let clamd = infected_daemon().await;
    let hook = hook(
        vec![clamd.endpoint()],
        AntivirusConfig {
            enabled: false,
            ..config()
        },
    );

    assert_eq!(
        hook.validate_bytes(EICAR, UploadKind::Attachment, true).await,
        Ok(())
    );
}

#[tokio::test]
async fn test_unreachable_scanner_fails_open() {
    let down = PoolEndpoint::new("127.0.0.1", closed_port().await);
    let hook = hook(vec![down], config());

    assert_eq!(
        hook.validate_bytes(EICAR, UploadKind::Attachment, true).await,
        Ok(())
    );
}

#[tokio::test]
async fn test_unreachable_scanner_fails_closed_when_configured() {
    let down = PoolEndpoint::new("127.0.0.1", closed_port().await);
    let hook = hook(
        vec![down],
        AntivirusConfig {
            fail_closed: true,
            ..config()
        },
    );

    assert_eq!(
        hook.validate_bytes(EICAR, UploadKind::Attachment, true).await,
        Err(UploadRejected::ScannerUnavailable)
    );
}
