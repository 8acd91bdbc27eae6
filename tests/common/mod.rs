#![allow(dead_code)]

//! Shared harness for workspace integration tests: one fully wired node
//! with an EDIT element and an RW element rooted in a temp directory.

use filegrid::FilegridNode;
use filegrid_core::{ElementConfig, FilegridConfig, StorageMode, StorageType};
use tempfile::TempDir;

pub async fn test_node() -> (TempDir, FilegridNode) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = FilegridConfig::default();
    config.node.data_dir = dir.path().join("data");
    config.upload.max_file_size = 8 * 1024 * 1024;
    config.elements = vec![
        ElementConfig {
            element_id: "se-edit".into(),
            display_name: "Edit Element".into(),
            api_url: "http://localhost:9101".into(),
            mode: StorageMode::Edit,
            storage_type: StorageType::Local,
            priority: 1,
            capacity_bytes: 64 * 1024 * 1024,
            root: dir.path().join("se-edit"),
            max_file_size: None,
        },
        ElementConfig {
            element_id: "se-rw".into(),
            display_name: "RW Element".into(),
            api_url: "http://localhost:9102".into(),
            mode: StorageMode::Rw,
            storage_type: StorageType::Local,
            priority: 1,
            capacity_bytes: 64 * 1024 * 1024,
            root: dir.path().join("se-rw"),
            max_file_size: None,
        },
    ];

    let node = FilegridNode::new(config).await.expect("node init");
    for element in &node.elements {
        element.start().await.expect("element start");
    }
    node.sync.start();
    // Prime the capacity registry the way the monitor leader would.
    node.admin.monitor.poll_element("se-edit").await;
    node.admin.monitor.poll_element("se-rw").await;
    // Give the sync subscriber a beat to attach before events flow.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (dir, node)
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_for<F>(mut check: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}
