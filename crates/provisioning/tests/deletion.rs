//! Deletion path against the scripted host.

mod common;

use common::{target, token, FakeHost};
use provisioning::{delete_repository, DeletionFailure, HostError};

#[tokio::test]
async fn absent_repository_is_a_no_op() {
    let host = FakeHost::new().on_repository_exists(Ok(false));

    let outcome = delete_repository(&host, &token(), &target()).await.unwrap();

    assert!(!outcome.deleted);
    assert_eq!(outcome.repository, target());
    assert_eq!(host.calls("delete"), 0);
}

#[tokio::test]
async fn existing_repository_is_deleted() {
    let host = FakeHost::new().on_repository_exists(Ok(true));

    let outcome = delete_repository(&host, &token(), &target()).await.unwrap();

    assert!(outcome.deleted);
    assert_eq!(host.call_log(), vec!["repository_exists", "delete"]);
}

#[tokio::test]
async fn deleting_twice_is_idempotent() {
    let host = FakeHost::new()
        .on_repository_exists(Ok(true))
        .on_repository_exists(Ok(false));

    let first = delete_repository(&host, &token(), &target()).await.unwrap();
    let second = delete_repository(&host, &token(), &target()).await.unwrap();

    assert!(first.deleted);
    assert!(!second.deleted);
    assert_eq!(host.calls("delete"), 1);
}

#[tokio::test]
async fn permission_denied_is_reported_distinctly() {
    let host = FakeHost::new().on_delete(Err(HostError::PermissionDenied {
        message: "must have admin rights".into(),
    }));

    let failure = delete_repository(&host, &token(), &target())
        .await
        .unwrap_err();

    assert!(matches!(failure, DeletionFailure::PermissionDenied { .. }));
    assert!(failure.to_string().contains("permission denied"));
}

#[tokio::test]
async fn repository_vanishing_before_delete_counts_as_absent() {
    let host = FakeHost::new().on_delete(Err(HostError::NotFound {
        resource: "octo-org/widgets".into(),
    }));

    let outcome = delete_repository(&host, &token(), &target()).await.unwrap();

    assert!(!outcome.deleted);
}

#[tokio::test]
async fn transient_failure_surfaces_without_retry() {
    let host = FakeHost::new().on_repository_exists(Err(HostError::Network {
        message: "connection reset".into(),
    }));

    let failure = delete_repository(&host, &token(), &target())
        .await
        .unwrap_err();

    match failure {
        DeletionFailure::Host { kind, .. } => assert_eq!(kind, "network"),
        other => panic!("expected host failure, got {other:?}"),
    }
    assert_eq!(host.calls("repository_exists"), 1);
    assert_eq!(host.calls("delete"), 0);
}
