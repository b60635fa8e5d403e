use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use xlstore_common::error::XlError;

use super::XlObjects;
use super::put::MD5_METADATA_KEY;
use crate::config::ObjectLayerConfig;
use crate::errors::StorageError;
use crate::memory::MemoryStorage;
use crate::testing::{Fault, FaultyStorage};
use crate::traits::{ObjectLayer, ObjectReader, StorageApi};
use crate::xl::storage::XlStorage;
use crate::META_BUCKET;

const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

fn body(data: &[u8]) -> ObjectReader {
    Box::new(Cursor::new(data.to_vec()))
}

async fn read_all(mut reader: ObjectReader) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await?;
    Ok(out)
}

async fn layer_on(storage: Arc<dyn StorageApi>, config: ObjectLayerConfig) -> XlObjects {
    let layer = XlObjects::new(storage, &["/disk1".to_string()], config)
        .await
        .unwrap();
    layer.make_bucket("bucket").await.unwrap();
    layer
}

async fn memory_layer() -> XlObjects {
    layer_on(Arc::new(MemoryStorage::new()), ObjectLayerConfig::default()).await
}

async fn put(layer: &XlObjects, key: &str, data: &str) -> String {
    layer
        .put_object("bucket", key, data.len() as i64, body(data.as_bytes()), HashMap::new())
        .await
        .unwrap()
}

async fn put_multipart(layer: &XlObjects, key: &str, parts: &[&str]) -> String {
    let mut numbers = Vec::new();
    for (idx, data) in parts.iter().enumerate() {
        let part_number = idx as i32 + 1;
        layer
            .put_object_part(
                "bucket",
                key,
                part_number,
                data.len() as i64,
                body(data.as_bytes()),
                HashMap::new(),
            )
            .await
            .unwrap();
        numbers.push(part_number);
    }
    layer
        .complete_multipart_object("bucket", key, &numbers)
        .await
        .unwrap()
}

async fn get(layer: &XlObjects, key: &str, offset: i64) -> Vec<u8> {
    let reader = layer.get_object("bucket", key, offset).await.unwrap();
    read_all(reader).await.unwrap()
}

async fn staging_is_empty(layer: &XlObjects) -> bool {
    matches!(
        layer.storage().list_dir(META_BUCKET, "tmp/").await,
        Err(StorageError::FileNotFound)
    )
}

fn keys(info: &crate::traits::ListObjectsInfo) -> Vec<&str> {
    info.objects.iter().map(|object| object.key.as_str()).collect()
}

#[tokio::test]
async fn simple_object_round_trip() {
    let layer = memory_layer().await;

    assert_eq!(put(&layer, "obj", "hello world").await, HELLO_MD5);
    assert_eq!(get(&layer, "obj", 0).await, b"hello world");
    assert_eq!(get(&layer, "obj", 6).await, b"world");
    assert!(get(&layer, "obj", 11).await.is_empty());
    assert!(matches!(
        layer.get_object("bucket", "obj", 12).await,
        Err(XlError::InvalidRange {
            offset: 12,
            size: 11
        })
    ));

    let info = layer.get_object_info("bucket", "obj").await.unwrap();
    assert_eq!(info.size, 11);
    assert_eq!(info.etag, HELLO_MD5);
    assert_eq!(info.content_type, "application/octet-stream");
    assert!(!info.is_dir);
    assert!(staging_is_empty(&layer).await);
}

#[tokio::test]
async fn unsized_put_copies_to_end_of_stream() {
    let layer = memory_layer().await;

    let md5 = layer
        .put_object("bucket", "notes.txt", 0, body(b"hello world"), HashMap::new())
        .await
        .unwrap();

    assert_eq!(md5, HELLO_MD5);
    let info = layer.get_object_info("bucket", "notes.txt").await.unwrap();
    assert_eq!(info.size, 11);
    assert_eq!(info.content_type, "text/plain");
}

#[tokio::test]
async fn multipart_object_reads_across_parts() {
    let layer = memory_layer().await;
    let etag = put_multipart(&layer, "big.txt", &["abcde", "fghij"]).await;

    assert!(etag.ends_with("-2"));
    assert_eq!(get(&layer, "big.txt", 0).await, b"abcdefghij");
    assert_eq!(get(&layer, "big.txt", 7).await, b"hij");
    assert_eq!(get(&layer, "big.txt", 5).await, b"fghij");
    assert!(get(&layer, "big.txt", 10).await.is_empty());
    assert!(matches!(
        layer.get_object("bucket", "big.txt", 11).await,
        Err(XlError::InvalidRange { .. })
    ));

    let info = layer.get_object_info("bucket", "big.txt").await.unwrap();
    assert_eq!(info.size, 10);
    assert_eq!(info.etag, etag);
    assert_eq!(info.content_type, "text/plain");
}

#[tokio::test]
async fn multipart_stream_with_tiny_chunks() {
    let config = ObjectLayerConfig {
        read_chunk_size: 2,
        read_channel_capacity: 1,
        ..ObjectLayerConfig::default()
    };
    let layer = layer_on(Arc::new(MemoryStorage::new()), config).await;
    put_multipart(&layer, "obj", &["abcde", "fghij", "klm"]).await;

    assert_eq!(get(&layer, "obj", 3).await, b"defghijklm");
}

#[tokio::test]
async fn dropped_reader_does_not_block_later_reads() {
    let layer = memory_layer().await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;

    let mut reader = layer.get_object("bucket", "obj", 0).await.unwrap();
    let mut first = [0_u8; 1];
    reader.read_exact(&mut first).await.unwrap();
    drop(reader);

    assert_eq!(get(&layer, "obj", 0).await, b"abcdefghij");
}

#[tokio::test]
async fn dropping_reader_stops_part_producer() {
    let storage = Arc::new(MemoryStorage::new());
    let config = ObjectLayerConfig {
        read_chunk_size: 1,
        read_channel_capacity: 1,
        ..ObjectLayerConfig::default()
    };
    let layer = layer_on(storage.clone(), config).await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;
    let idle = Arc::strong_count(&storage);

    let mut reader = layer.get_object("bucket", "obj", 0).await.unwrap();
    let mut first = [0_u8; 1];
    reader.read_exact(&mut first).await.unwrap();
    assert_eq!(&first, b"a");
    assert_eq!(Arc::strong_count(&storage), idle + 1);

    drop(reader);
    for _ in 0..100 {
        if Arc::strong_count(&storage) == idle {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(Arc::strong_count(&storage), idle);
}

#[tokio::test]
async fn bad_digest_keeps_existing_object() {
    let layer = memory_layer().await;
    put(&layer, "obj", "old").await;

    let metadata = HashMap::from([(
        MD5_METADATA_KEY.to_string(),
        "00000000000000000000000000000000".to_string(),
    )]);
    let err = layer
        .put_object("bucket", "obj", 11, body(b"hello world"), metadata)
        .await
        .unwrap_err();

    match err {
        XlError::BadDigest { calculated, .. } => assert_eq!(calculated, HELLO_MD5),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(get(&layer, "obj", 0).await, b"old");
    assert!(staging_is_empty(&layer).await);
}

#[tokio::test]
async fn matching_digest_is_accepted() {
    let layer = memory_layer().await;
    let metadata = HashMap::from([(MD5_METADATA_KEY.to_string(), HELLO_MD5.to_uppercase())]);

    let md5 = layer
        .put_object("bucket", "obj", 11, body(b"hello world"), metadata)
        .await
        .unwrap();
    assert_eq!(md5, HELLO_MD5);
}

#[tokio::test]
async fn short_body_is_incomplete() {
    let layer = memory_layer().await;

    let err = layer
        .put_object("bucket", "obj", 20, body(b"hello world"), HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, XlError::IncompleteBody { .. }));
    assert!(matches!(
        layer.get_object_info("bucket", "obj").await,
        Err(XlError::ObjectNotFound { .. })
    ));
    assert!(staging_is_empty(&layer).await);
}

#[tokio::test]
async fn sized_put_stops_at_declared_size() {
    let layer = memory_layer().await;

    let md5 = layer
        .put_object("bucket", "obj", 5, body(b"hello world"), HashMap::new())
        .await
        .unwrap();

    assert_eq!(md5, "5d41402abc4b2a76b9719d911017c592");
    assert_eq!(get(&layer, "obj", 0).await, b"hello");
}

#[tokio::test]
async fn delete_is_not_repeatable() {
    let layer = memory_layer().await;
    put(&layer, "obj", "data").await;

    layer.delete_object("bucket", "obj").await.unwrap();
    assert!(matches!(
        layer.delete_object("bucket", "obj").await,
        Err(XlError::ObjectNotFound { .. })
    ));
}

#[tokio::test]
async fn multipart_delete_removes_parts_and_descriptor() {
    let layer = memory_layer().await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;

    layer.delete_object("bucket", "obj").await.unwrap();

    assert!(layer.storage().list_dir("bucket", "").await.unwrap().is_empty());
    assert!(matches!(
        layer.get_object_info("bucket", "obj").await,
        Err(XlError::ObjectNotFound { .. })
    ));
}

#[tokio::test]
async fn partial_delete_keeps_descriptor_and_can_be_retried() {
    let storage = Arc::new(FaultyStorage::new());
    let layer = layer_on(storage.clone(), ObjectLayerConfig::default()).await;
    put_multipart(&layer, "obj", &["abcde", "fghij", "klmno"]).await;

    storage.fail_delete("obj/00002.xlstore.multipart");
    let err = layer.delete_object("bucket", "obj").await.unwrap_err();
    assert!(matches!(err, XlError::PartialDelete { failed_parts: 1, .. }));
    assert_eq!(layer.get_object_info("bucket", "obj").await.unwrap().size, 15);

    storage.clear();
    layer.delete_object("bucket", "obj").await.unwrap();
    assert!(matches!(
        layer.get_object_info("bucket", "obj").await,
        Err(XlError::ObjectNotFound { .. })
    ));
}

#[tokio::test]
async fn part_read_error_reaches_the_reader() {
    let storage = Arc::new(FaultyStorage::new());
    let layer = layer_on(storage.clone(), ObjectLayerConfig::default()).await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;
    storage.fail_read("obj/00002.xlstore.multipart");

    let reader = layer.get_object("bucket", "obj", 0).await.unwrap();
    assert!(read_all(reader).await.is_err());
}

#[tokio::test]
async fn abort_frees_key_of_uncompleted_upload() {
    let layer = memory_layer().await;
    for part_number in [1, 2] {
        layer
            .put_object_part("bucket", "obj", part_number, 3, body(b"abc"), HashMap::new())
            .await
            .unwrap();
    }

    assert!(matches!(
        layer
            .put_object("bucket", "obj", 3, body(b"new"), HashMap::new())
            .await,
        Err(XlError::ObjectExistsAsPrefix { .. })
    ));
    assert!(layer
        .list_objects("bucket", "", "", "", 0)
        .await
        .unwrap()
        .objects
        .is_empty());
    assert!(matches!(
        layer.delete_bucket("bucket").await,
        Err(XlError::BucketNotEmpty(_))
    ));

    assert_eq!(layer.abort_multipart_object("bucket", "obj").await.unwrap(), 2);
    assert!(matches!(
        layer.abort_multipart_object("bucket", "obj").await,
        Err(XlError::NoSuchUpload { .. })
    ));
    assert!(layer.storage().list_dir("bucket", "").await.unwrap().is_empty());

    put(&layer, "obj", "new").await;
    layer.delete_object("bucket", "obj").await.unwrap();
    layer.delete_bucket("bucket").await.unwrap();
}

#[tokio::test]
async fn abort_leaves_completed_object_alone() {
    let layer = memory_layer().await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;

    assert!(matches!(
        layer.abort_multipart_object("bucket", "obj").await,
        Err(XlError::NoSuchUpload { .. })
    ));
    assert_eq!(get(&layer, "obj", 0).await, b"abcdefghij");
}

#[tokio::test]
async fn failed_descriptor_cleanup_is_reported() {
    let storage = Arc::new(FaultyStorage::new());
    let layer = layer_on(storage.clone(), ObjectLayerConfig::default()).await;
    for (part_number, data) in [(1, "abcde"), (2, "fghij")] {
        layer
            .put_object_part("bucket", "obj", part_number, 5, body(data.as_bytes()), HashMap::new())
            .await
            .unwrap();
    }

    storage.fail_rename_to("obj/00000.xlstore.multipart");
    storage.fail_delete_under("tmp/", Fault::WriteQuorum);
    let err = layer
        .complete_multipart_object("bucket", "obj", &[1, 2])
        .await
        .unwrap_err();
    assert!(matches!(err, XlError::InsufficientWriteQuorum(_)), "unexpected error: {err}");

    storage.clear();
    assert!(matches!(
        layer.get_object_info("bucket", "obj").await,
        Err(XlError::ObjectNotFound { .. })
    ));
}

#[tokio::test]
async fn put_replaces_multipart_object() {
    let layer = memory_layer().await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;

    assert_eq!(put(&layer, "obj", "new").await, "22af645d1859cb5ca6da0c484f1f37ea");

    assert_eq!(get(&layer, "obj", 0).await, b"new");
    assert_eq!(layer.get_object_info("bucket", "obj").await.unwrap().size, 3);
    assert!(staging_is_empty(&layer).await);
    let listing = layer.list_objects("bucket", "", "", "", 0).await.unwrap();
    assert_eq!(keys(&listing), vec!["obj"]);
}

#[tokio::test]
async fn failed_replace_restores_multipart_object() {
    let storage = Arc::new(FaultyStorage::new());
    let layer = layer_on(storage.clone(), ObjectLayerConfig::default()).await;
    put_multipart(&layer, "obj", &["abcde", "fghij"]).await;

    storage.fail_rename_to("obj");
    assert!(layer
        .put_object("bucket", "obj", 3, body(b"new"), HashMap::new())
        .await
        .is_err());

    storage.clear();
    assert_eq!(get(&layer, "obj", 0).await, b"abcdefghij");
    assert!(staging_is_empty(&layer).await);
}

#[tokio::test]
async fn object_cannot_nest_under_object() {
    let layer = memory_layer().await;
    put(&layer, "a", "file").await;
    put_multipart(&layer, "m", &["abc"]).await;

    for (key, parent) in [("a/b", "a"), ("m/x/y", "m")] {
        let err = layer
            .put_object("bucket", key, 1, body(b"x"), HashMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, XlError::ParentIsObject { key: ref found, .. } if found == parent),
            "unexpected error for {key}: {err}"
        );
    }
    assert!(staging_is_empty(&layer).await);
}

#[tokio::test]
async fn prefix_is_not_an_object() {
    let layer = memory_layer().await;
    put(&layer, "dir/file", "data").await;

    assert!(matches!(
        layer
            .put_object("bucket", "dir", 1, body(b"x"), HashMap::new())
            .await,
        Err(XlError::ObjectExistsAsPrefix { .. })
    ));
    assert!(matches!(
        layer.get_object("bucket", "dir", 0).await,
        Err(XlError::ObjectNotFound { .. })
    ));
    assert!(matches!(
        layer.get_object_info("bucket", "dir").await,
        Err(XlError::ObjectNotFound { .. })
    ));
    assert!(matches!(
        layer.delete_object("bucket", "dir").await,
        Err(XlError::ObjectNotFound { .. })
    ));
    assert!(staging_is_empty(&layer).await);
}

#[tokio::test]
async fn concurrent_puts_to_one_key_both_succeed() {
    let layer = memory_layer().await;

    let (first, second) = tokio::join!(
        layer.put_object("bucket", "obj", 5, body(b"first"), HashMap::new()),
        layer.put_object("bucket", "obj", 6, body(b"second"), HashMap::new()),
    );
    first.unwrap();
    second.unwrap();

    let data = get(&layer, "obj", 0).await;
    assert!(data == b"first" || data == b"second");
    assert!(staging_is_empty(&layer).await);
}

async fn listing_fixture() -> XlObjects {
    let layer = memory_layer().await;
    for key in ["a/1", "a/2", "b", "c/d/e"] {
        put(&layer, key, "x").await;
    }
    put_multipart(&layer, "m", &["abc", "def"]).await;
    layer
}

#[tokio::test]
async fn recursive_and_delimited_listing() {
    let layer = listing_fixture().await;

    let all = layer.list_objects("bucket", "", "", "", 0).await.unwrap();
    assert_eq!(keys(&all), vec!["a/1", "a/2", "b", "c/d/e", "m"]);
    assert!(all.prefixes.is_empty());
    assert!(!all.is_truncated);
    assert_eq!(all.objects[4].size, 6);

    let top = layer.list_objects("bucket", "", "", "/", 0).await.unwrap();
    assert_eq!(keys(&top), vec!["b", "m"]);
    assert_eq!(top.prefixes, vec!["a/".to_string(), "c/".to_string()]);

    let under_a = layer.list_objects("bucket", "a/", "", "/", 0).await.unwrap();
    assert_eq!(keys(&under_a), vec!["a/1", "a/2"]);

    let partial = layer.list_objects("bucket", "c", "", "/", 0).await.unwrap();
    assert!(partial.objects.is_empty());
    assert_eq!(partial.prefixes, vec!["c/".to_string()]);

    let after_b = layer.list_objects("bucket", "", "b", "", 0).await.unwrap();
    assert_eq!(keys(&after_b), vec!["c/d/e", "m"]);
}

#[tokio::test]
async fn paginated_listing_resumes_cached_walker() {
    let layer = listing_fixture().await;

    let page1 = layer.list_objects("bucket", "", "", "", 2).await.unwrap();
    assert_eq!(keys(&page1), vec!["a/1", "a/2"]);
    assert!(page1.is_truncated);
    assert_eq!(page1.next_marker.as_deref(), Some("a/2"));
    assert_eq!(layer.list_cache().len().await, 1);

    let page2 = layer.list_objects("bucket", "", "a/2", "", 2).await.unwrap();
    assert_eq!(keys(&page2), vec!["b", "c/d/e"]);
    assert_eq!(page2.next_marker.as_deref(), Some("c/d/e"));
    assert_eq!(layer.list_cache().len().await, 1);

    let page3 = layer.list_objects("bucket", "", "c/d/e", "", 2).await.unwrap();
    assert_eq!(keys(&page3), vec!["m"]);
    assert!(!page3.is_truncated);
    assert!(page3.next_marker.is_none());
    assert!(layer.list_cache().is_empty().await);
}

#[tokio::test]
async fn listing_rejects_unsupported_delimiter() {
    let layer = memory_layer().await;

    assert!(matches!(
        layer.list_objects("bucket", "", "", "|", 10).await,
        Err(XlError::UnsupportedDelimiter(_))
    ));
}

#[tokio::test]
async fn bucket_operations() {
    let layer = memory_layer().await;

    assert!(matches!(
        layer.make_bucket("bucket").await,
        Err(XlError::BucketAlreadyExists(_))
    ));
    assert!(matches!(
        layer.make_bucket("Bad_Name").await,
        Err(XlError::InvalidBucketName(_))
    ));
    layer.make_bucket("another").await.unwrap();

    let names: Vec<String> = layer
        .list_buckets()
        .await
        .unwrap()
        .into_iter()
        .map(|bucket| bucket.name)
        .collect();
    assert_eq!(names, vec!["another".to_string(), "bucket".to_string()]);
    assert_eq!(layer.get_bucket_info("another").await.unwrap().name, "another");

    put(&layer, "obj", "data").await;
    assert!(matches!(
        layer.delete_bucket("bucket").await,
        Err(XlError::BucketNotEmpty(_))
    ));
    layer.delete_object("bucket", "obj").await.unwrap();
    layer.delete_bucket("bucket").await.unwrap();

    assert!(matches!(
        layer.get_object("bucket", "obj", 0).await,
        Err(XlError::BucketNotFound(_))
    ));
    assert!(matches!(
        layer.get_object_info("missing", "obj").await,
        Err(XlError::BucketNotFound(_))
    ));
}

#[tokio::test]
async fn invalid_object_names_are_rejected() {
    let layer = memory_layer().await;

    for key in ["", "/abs", "a//b", "../x", "obj/00001.xlstore.multipart"] {
        assert!(
            matches!(
                layer.put_object("bucket", key, 1, body(b"x"), HashMap::new()).await,
                Err(XlError::InvalidObjectName { .. })
            ),
            "{key:?} should be rejected"
        );
    }
    assert!(matches!(
        layer
            .put_object_part("bucket", "obj", 0, 1, body(b"x"), HashMap::new())
            .await,
        Err(XlError::InvalidPart(0))
    ));
}

#[tokio::test]
async fn mirrored_disks_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..3).map(|idx| dir.path().join(format!("disk{idx}"))).collect();
    let disks: Vec<String> = paths.iter().map(|path| path.display().to_string()).collect();

    let storage = XlStorage::new(paths.clone()).await.unwrap();
    let layer = XlObjects::new(Arc::new(storage), &disks, ObjectLayerConfig::default())
        .await
        .unwrap();
    layer.make_bucket("bucket").await.unwrap();

    assert_eq!(put(&layer, "docs/hello.txt", "hello world").await, HELLO_MD5);
    put_multipart(&layer, "videos/big.mp4", &["abcde", "fghij"]).await;

    assert_eq!(get(&layer, "docs/hello.txt", 6).await, b"world");
    assert_eq!(get(&layer, "videos/big.mp4", 7).await, b"hij");
    let info = layer.get_object_info("bucket", "videos/big.mp4").await.unwrap();
    assert_eq!(info.content_type, "video/mp4");

    let listing = layer.list_objects("bucket", "", "", "", 0).await.unwrap();
    assert_eq!(keys(&listing), vec!["docs/hello.txt", "videos/big.mp4"]);

    assert!(matches!(
        layer
            .put_object("bucket", "docs/hello.txt/x", 1, body(b"x"), HashMap::new())
            .await,
        Err(XlError::ParentIsObject { .. })
    ));

    layer.delete_object("bucket", "videos/big.mp4").await.unwrap();
    layer.delete_object("bucket", "docs/hello.txt").await.unwrap();
    assert!(layer
        .list_objects("bucket", "", "", "", 0)
        .await
        .unwrap()
        .objects
        .is_empty());

    let mut reordered = paths.clone();
    reordered.reverse();
    let reordered_disks: Vec<String> = reordered
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    let storage = XlStorage::new(reordered).await.unwrap();
    assert!(matches!(
        XlObjects::new(Arc::new(storage), &reordered_disks, ObjectLayerConfig::default()).await,
        Err(XlError::InvalidFormat(_))
    ));
}
