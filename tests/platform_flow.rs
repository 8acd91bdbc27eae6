//! End-to-end flows across the node: upload → event-driven search, the full
//! finalize lifecycle with deferred GC, and the mode guard on deletes.

mod common;

use bytes::Bytes;
use chrono::Utc;
use filegrid_core::{FinalizeStatus, RetentionPolicy};
use filegrid_ingester::UploadRequest;
use filegrid_query::{DownloadContent, SearchRequest};
use futures::StreamExt;

use common::{test_node, wait_for};

fn upload_request(name: &str) -> UploadRequest {
    UploadRequest {
        original_filename: name.into(),
        content_type: "application/octet-stream".into(),
        username: "tester".into(),
        description: Some("integration fixture".into()),
        tags: vec!["it".into()],
        retention_policy: RetentionPolicy::Temporary,
        compress: false,
        compression_algorithm: None,
    }
}

async fn collect(content: DownloadContent) -> Vec<u8> {
    let mut out = Vec::new();
    match content {
        DownloadContent::Full { mut stream } | DownloadContent::Single { mut stream, .. } => {
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk.unwrap());
            }
        }
        DownloadContent::Multi { mut parts, .. } => {
            for part in parts.iter_mut() {
                while let Some(chunk) = part.stream.next().await {
                    out.extend_from_slice(&chunk.unwrap());
                }
            }
        }
    }
    out
}

#[tokio::test]
async fn upload_flows_into_searchable_cache() {
    let (_dir, node) = test_node().await;

    let receipt = node
        .upload
        .upload(upload_request("meeting_notes.txt"), Bytes::from_static(b"agenda"))
        .await
        .unwrap();

    // The file:created event reaches the query index without any polling of
    // the authoritative store.
    wait_for(
        || node.index.get(&receipt.file_id).is_some(),
        "search index row",
    )
    .await;

    let results = node.index.search(&SearchRequest {
        query: Some("meeting".into()),
        ..Default::default()
    });
    assert_eq!(results.total_count, 1);
    assert_eq!(results.results[0].record.file_id, receipt.file_id);
    assert_eq!(results.results[0].record.storage_element_id, "se-edit");
}

#[tokio::test]
async fn finalize_lifecycle_promotes_and_schedules_source_gc() {
    let (_dir, node) = test_node().await;

    // Upload 1 MiB of 0x41 to the EDIT element.
    let body = Bytes::from(vec![0x41u8; 1024 * 1024]);
    let receipt = node
        .upload
        .upload(upload_request("blob.bin"), body.clone())
        .await
        .unwrap();
    let file_id = receipt.file_id;

    // Kick off finalization; 202-style: the transaction starts copying.
    let transaction = node.finalize.finalize(file_id).await.unwrap();
    assert_eq!(transaction.status, FinalizeStatus::Copying);

    // Poll until the transaction reaches a terminal state.
    wait_for(
        || {
            node.finalize
                .status(&transaction.transaction_id)
                .map(|tx| tx.status.is_terminal())
                .unwrap_or(false)
        },
        "finalize to complete",
    )
    .await;
    let done = node.finalize.status(&transaction.transaction_id).unwrap();
    assert_eq!(done.status, FinalizeStatus::Completed);
    assert_eq!(done.status.progress_percent(), 100);

    // The authoritative record now points at the RW element.
    let record = node.admin.files.require(&file_id).unwrap();
    assert_eq!(record.retention_policy, RetentionPolicy::Permanent);
    assert_eq!(record.storage_element_id, "se-rw");
    assert!(record.finalized_at.is_some());
    assert!(record.ttl_expires_at.is_none());

    // Downloading streams the intact body from the RW element.
    let download = node.download.download(file_id, None).await.unwrap();
    assert_eq!(download.total_length, 1024 * 1024);
    let bytes = collect(download.content).await;
    assert_eq!(bytes.len(), 1024 * 1024);
    assert!(bytes.iter().all(|byte| *byte == 0x41));

    // The event stream converged the search cache onto the new placement.
    wait_for(
        || {
            node.index
                .get(&file_id)
                .map(|row| row.record.storage_element_id == "se-rw")
                .unwrap_or(false)
        },
        "cache to observe finalize",
    )
    .await;

    // The source copy is queued for deletion behind the safety margin.
    let entries = node.admin.cleanup.entries().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.storage_element_id, "se-edit");
    assert!(entry.scheduled_at > Utc::now() + chrono::Duration::hours(23));

    // Simulate the margin elapsing, then run the GC scan: the EDIT copy
    // disappears while the RW copy survives.
    let edit = node.admin.directory.get("se-edit").unwrap();
    assert_eq!(edit.file_count(), 1);
    node.admin
        .cleanup
        .reschedule(&entry.entry_id, Utc::now() - chrono::Duration::seconds(1), None)
        .unwrap();
    node.admin.gc.run_scan_once().await.unwrap();
    assert_eq!(edit.file_count(), 0);
    assert_eq!(node.admin.directory.get("se-rw").unwrap().file_count(), 1);
}

#[tokio::test]
async fn corrupted_source_finalize_rolls_back_cleanly() {
    let (_dir, node) = test_node().await;

    let receipt = node
        .upload
        .upload(upload_request("fragile.bin"), Bytes::from(vec![0x41u8; 4096]))
        .await
        .unwrap();

    // Tamper with the source after registration so the copy's checksum no
    // longer matches the recorded one.
    let edit = node.admin.directory.get("se-edit").unwrap();
    edit.update_file(
        receipt.file_id,
        filegrid_storage::bytes_stream(Bytes::from(vec![0x42u8; 512])),
    )
    .await
    .unwrap();

    let transaction = node.finalize.finalize(receipt.file_id).await.unwrap();
    wait_for(
        || {
            node.finalize
                .status(&transaction.transaction_id)
                .map(|tx| tx.status.is_terminal())
                .unwrap_or(false)
        },
        "finalize to terminate",
    )
    .await;

    let failed = node.finalize.status(&transaction.transaction_id).unwrap();
    assert_eq!(failed.status, FinalizeStatus::RolledBack);
    assert_eq!(failed.error_code.as_deref(), Some("checksum_mismatch"));

    // File record untouched, no residue on the target, nothing queued.
    let record = node.admin.files.require(&receipt.file_id).unwrap();
    assert_eq!(record.retention_policy, RetentionPolicy::Temporary);
    assert!(record.finalized_at.is_none());
    assert_eq!(node.admin.directory.get("se-rw").unwrap().file_count(), 0);
    assert!(node.admin.cleanup.entries().unwrap().is_empty());
}

#[tokio::test]
async fn delete_on_rw_element_is_mode_forbidden_and_file_survives() {
    let (_dir, node) = test_node().await;
    let receipt = node
        .upload
        .upload(upload_request("keeper.bin"), Bytes::from(vec![0x41u8; 1024]))
        .await
        .unwrap();
    let transaction = node.finalize.finalize(receipt.file_id).await.unwrap();
    wait_for(
        || {
            node.finalize
                .status(&transaction.transaction_id)
                .map(|tx| tx.status == FinalizeStatus::Completed)
                .unwrap_or(false)
        },
        "finalize to complete",
    )
    .await;

    let rw = node.admin.directory.get("se-rw").unwrap();
    let err = rw.delete_file(receipt.file_id).await.unwrap_err();
    assert!(matches!(
        err,
        filegrid_storage::StorageError::ModeForbidden { .. }
    ));

    // The file is still on disk and fully readable.
    let download = node.download.download(receipt.file_id, None).await.unwrap();
    assert_eq!(collect(download.content).await.len(), 1024);
}

#[tokio::test]
async fn deleted_file_disappears_from_search() {
    let (_dir, node) = test_node().await;
    let receipt = node
        .upload
        .upload(upload_request("ephemeral.bin"), Bytes::from_static(b"gone soon"))
        .await
        .unwrap();
    wait_for(|| node.index.get(&receipt.file_id).is_some(), "index row").await;

    node.admin.files.soft_delete(&receipt.file_id).unwrap();
    wait_for(
        || node.index.get(&receipt.file_id).is_none(),
        "index row removal",
    )
    .await;
}
