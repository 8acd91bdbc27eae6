//! Ranged download behaviour over a live node.

mod common;

use bytes::Bytes;
use filegrid_core::RetentionPolicy;
use filegrid_ingester::UploadRequest;
use filegrid_query::{DownloadContent, QueryError};
use futures::StreamExt;

use common::test_node;

async fn drain(mut stream: filegrid_storage::ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

fn body_1000() -> Vec<u8> {
    (0..1000u16).map(|i| (i % 251) as u8).collect()
}

async fn upload_1000(node: &filegrid::FilegridNode) -> uuid::Uuid {
    node.upload
        .upload(
            UploadRequest {
                original_filename: "ranged.bin".into(),
                content_type: "application/octet-stream".into(),
                username: "tester".into(),
                description: None,
                tags: vec![],
                retention_policy: RetentionPolicy::Temporary,
                compress: false,
                compression_algorithm: None,
            },
            Bytes::from(body_1000()),
        )
        .await
        .unwrap()
        .file_id
}

#[tokio::test]
async fn prefix_suffix_and_invalid_ranges() {
    let (_dir, node) = test_node().await;
    let file_id = upload_1000(&node).await;
    let body = body_1000();

    // bytes=0-499 → first half.
    let response = node.download.download(file_id, Some("bytes=0-499")).await.unwrap();
    match response.content {
        DownloadContent::Single { range, stream } => {
            assert_eq!(range, (0, 499));
            assert_eq!(drain(stream).await, &body[0..500]);
        }
        _ => panic!("expected single range"),
    }

    // bytes=-100 → final 100 bytes.
    let response = node.download.download(file_id, Some("bytes=-100")).await.unwrap();
    match response.content {
        DownloadContent::Single { range, stream } => {
            assert_eq!(range, (900, 999));
            assert_eq!(drain(stream).await, &body[900..1000]);
        }
        _ => panic!("expected single range"),
    }

    // bytes=1500- → unsatisfiable.
    let err = node
        .download
        .download(file_id, Some("bytes=1500-"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::RangeNotSatisfiable { total: 1000 }));
}

#[tokio::test]
async fn split_halves_concatenate_to_full_body() {
    let (_dir, node) = test_node().await;
    let file_id = upload_1000(&node).await;

    let mut combined = Vec::new();
    for header in ["bytes=0-500", "bytes=501-"] {
        let response = node.download.download(file_id, Some(header)).await.unwrap();
        match response.content {
            DownloadContent::Single { stream, .. } => combined.extend(drain(stream).await),
            _ => panic!("expected single range"),
        }
    }
    assert_eq!(combined, body_1000());
}

#[tokio::test]
async fn multipart_ranges_come_back_in_order() {
    let (_dir, node) = test_node().await;
    let file_id = upload_1000(&node).await;
    let body = body_1000();

    let response = node
        .download
        .download(file_id, Some("bytes=0-9,500-509,-10"))
        .await
        .unwrap();
    match response.content {
        DownloadContent::Multi { boundary, parts } => {
            assert!(!boundary.is_empty());
            assert_eq!(parts.len(), 3);
            let expected = [(0u64, 9u64), (500, 509), (990, 999)];
            for (part, expected) in parts.into_iter().zip(expected) {
                assert_eq!(part.range, expected);
                let window = drain(part.stream).await;
                assert_eq!(window, &body[expected.0 as usize..=expected.1 as usize]);
            }
        }
        _ => panic!("expected multipart ranges"),
    }
}

#[tokio::test]
async fn etag_is_stable_until_content_changes() {
    let (_dir, node) = test_node().await;
    let file_id = upload_1000(&node).await;

    let first = node.download.download(file_id, None).await.unwrap().etag;
    let second = node.download.download(file_id, None).await.unwrap().etag;
    assert_eq!(first, second);

    let edit = node.admin.directory.get("se-edit").unwrap();
    edit.update_file(
        file_id,
        filegrid_storage::bytes_stream(Bytes::from_static(b"replaced")),
    )
    .await
    .unwrap();
    let third = node.download.download(file_id, None).await.unwrap().etag;
    assert_ne!(first, third);
}
