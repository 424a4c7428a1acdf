use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use zipbucket::{
    ArchiveRequest, BackoffPolicy, DirStore, Error, IntegrityMode, MemoryStore, Pipeline, PipelineConfig, Progress,
    Stage, StoreError, ZIP_CONTENT_TYPE,
};

fn quick(attempts: u32) -> BackoffPolicy {
    BackoffPolicy::default()
        .max_attempts(attempts)
        .base(Duration::ZERO)
        .jitter(false)
}

fn pipeline(store: &MemoryStore) -> Pipeline<MemoryStore> {
    let config = PipelineConfig::default()
        .list_backoff(quick(3))
        .upload_backoff(quick(3))
        .verify_backoff(quick(3));
    Pipeline::new(store.clone()).with_config(config)
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("src", "p/hello.txt", "hello, world");
    store.insert("src", "p/data.json", r#"{"answer":42}"#);
    store
}

fn read_zip(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).expect("valid zip");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut contents = String::new();
            file.read_to_string(&mut contents).unwrap();
            (file.name().to_string(), contents)
        })
        .collect()
}

fn uploaded(store: &MemoryStore, container: &str, path: &str) -> Bytes {
    store.get(container, path).expect("archive uploaded").data
}

#[tokio::test]
async fn archive_prefix_to_remote() {
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();

    let entries: Vec<(&str, &str)> = result
        .manifest
        .iter()
        .map(|e| (e.source_name.as_str(), e.archive_path.as_str()))
        .collect();
    assert_eq!(entries, vec![("p/data.json", "data.json"), ("p/hello.txt", "hello.txt")]);
    assert_eq!(result.dest_container.as_deref(), Some("dst"));
    assert_eq!(result.dest_path.as_deref(), Some("out.zip"));
    assert!(result.keep_path.is_none());

    let archive = uploaded(&store, "dst", "out.zip");
    assert_eq!(result.bytes_written, archive.len() as u64);
    assert_eq!(read_zip(&archive), vec![
        ("data.json".to_string(), r#"{"answer":42}"#.to_string()),
        ("hello.txt".to_string(), "hello, world".to_string()),
    ]);
}

#[tokio::test]
async fn request_without_sink_is_a_noop() {
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/");

    assert!(pipeline(&store).run(&request).await.unwrap().is_none());
    assert_eq!(store.list_calls(), 0);
    assert!(store.names("dst").is_empty());
}

#[tokio::test]
async fn invalid_request_fails_before_io() {
    let store = seeded();
    let request = ArchiveRequest {
        dest_container: Some("dst".into()),
        ..ArchiveRequest::new("src", "p/")
    };

    let err = pipeline(&store).run(&request).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.stage(), Some(Stage::Validating));
    assert_eq!(store.list_calls(), 0);
}

#[tokio::test]
async fn mapper_excluding_everything_yields_empty_archive() {
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "empty.zip")
        .name_mapper(|_, _| None);

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    assert!(result.manifest.is_empty());
    assert!(read_zip(&uploaded(&store, "dst", "empty.zip")).is_empty());
}

#[tokio::test]
async fn empty_prefix_archives_whole_container() {
    let store = seeded();
    store.insert("src", "top.txt", "top");
    let request = ArchiveRequest::new("src", "").destination("dst", "all.zip");

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    let paths: Vec<&str> = result.manifest.iter().map(|e| e.archive_path.as_str()).collect();
    assert_eq!(paths, vec!["p/data.json", "p/hello.txt", "top.txt"]);
}

#[tokio::test]
async fn keep_path_receives_same_archive() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("copy.zip");
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "out.zip")
        .keep(&keep);

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    assert_eq!(result.keep_path.as_deref(), Some(keep.as_path()));

    let local = std::fs::read(&keep).unwrap();
    assert_eq!(Bytes::from(local), uploaded(&store, "dst", "out.zip"));
}

#[tokio::test]
async fn keep_only_run_skips_upload_and_verify() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("local.zip");
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/").keep(&keep);

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    assert!(result.dest_container.is_none());
    assert_eq!(store.exists_calls(), 0);
    assert_eq!(read_zip(&std::fs::read(&keep).unwrap()).len(), 2);
}

#[tokio::test]
async fn concurrency_bounds_open_reads() {
    let store = MemoryStore::new();
    store.set_chunk_size(128);
    store.set_read_delay(Duration::from_millis(10));
    for i in 0..8 {
        store.insert("src", &format!("p/{i:02}.bin"), vec![b'a' + i as u8; 1024]);
    }
    // Eight objects of eight delayed chunks each, read one after another.
    let serial = Duration::from_millis(8 * 8 * 10);
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "out.zip")
        .concurrency(4);

    let started = std::time::Instant::now();
    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.manifest.len(), 8);
    assert_eq!(store.peak_open_reads(), 4);
    assert!(elapsed < serial / 2, "reads did not overlap: {elapsed:?}");
    assert_eq!(read_zip(&uploaded(&store, "dst", "out.zip")).len(), 8);
}

#[tokio::test]
async fn colliding_archive_paths_fail_before_upload() {
    let store = MemoryStore::new();
    store.insert("src", "p//x.txt", "one");
    store.insert("src", "p/x.txt", "two");
    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");

    let err = pipeline(&store).run(&request).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::FetchingAndArchiving));
    assert!(matches!(err.root(), Error::DuplicateEntry { path, .. } if path == "x.txt"));
    assert!(store.names("dst").is_empty());
}

#[tokio::test]
async fn sequential_runs_are_byte_identical() {
    let store = seeded();
    let pipeline = pipeline(&store);

    pipeline
        .run(&ArchiveRequest::new("src", "p/").destination("dst", "a.zip"))
        .await
        .unwrap();
    pipeline
        .run(&ArchiveRequest::new("src", "p/").destination("dst", "b.zip"))
        .await
        .unwrap();

    assert_eq!(uploaded(&store, "dst", "a.zip"), uploaded(&store, "dst", "b.zip"));
}

#[tokio::test]
async fn rerun_overwrites_destination() {
    let store = seeded();
    let pipeline = pipeline(&store);
    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");

    let first = pipeline.run(&request).await.unwrap().unwrap();
    let before = uploaded(&store, "dst", "out.zip");
    let second = pipeline.run(&request).await.unwrap().unwrap();

    assert_eq!(first.manifest, second.manifest);
    assert_eq!(before, uploaded(&store, "dst", "out.zip"));
}

#[tokio::test]
async fn upload_carries_content_type_and_metadata() {
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "out.zip")
        .metadata("origin", "nightly")
        .metadata("owner", "ops");

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    let object = store.get("dst", "out.zip").unwrap();

    assert_eq!(object.content_type.as_deref(), Some(ZIP_CONTENT_TYPE));
    assert_eq!(object.metadata.get("origin").map(String::as_str), Some("nightly"));
    assert_eq!(object.metadata.len(), 2);
    assert_eq!(result.extra_metadata.unwrap().len(), 2);
}

#[tokio::test]
async fn integrity_mode_reaches_reads() {
    let store = seeded();
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "out.zip")
        .integrity(Some(IntegrityMode::Md5));

    pipeline(&store).run(&request).await.unwrap();
    let seen = store.read_options_seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|options| options.integrity == Some(IntegrityMode::Md5)));
}

#[tokio::test]
async fn transient_list_failures_are_retried() {
    let store = seeded();
    store.fail_lists([StoreError::transient("503"), StoreError::transient("503")]);
    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");

    let result = pipeline(&store).run(&request).await.unwrap().unwrap();
    assert_eq!(result.manifest.len(), 2);
    assert_eq!(store.list_calls(), 3);
}

#[tokio::test]
async fn exhausted_list_retries_fail_listing_stage() {
    let store = seeded();
    store.fail_lists((0..3).map(|_| StoreError::transient("503")));
    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");

    let err = pipeline(&store).run(&request).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ListingSources));
    assert!(matches!(err.root(), Error::List { .. }));
    assert!(store.get("dst", "out.zip").is_none());
}

#[tokio::test]
async fn read_failure_leaves_no_archive() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("out.zip");
    let store = seeded();
    store.set_chunk_size(4);
    store.break_read("src", "p/hello.txt");
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "out.zip")
        .keep(&keep)
        .concurrency(2);

    let err = pipeline(&store).run(&request).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::FetchingAndArchiving));
    assert!(matches!(err.root(), Error::SourceRead { name, .. } if name == "p/hello.txt"));

    assert!(store.get("dst", "out.zip").is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn rejected_upload_fails_finalizing() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("out.zip");
    let store = seeded();
    store.reject_writes(true);
    let request = ArchiveRequest::new("src", "p/")
        .destination("dst", "out.zip")
        .keep(&keep);

    let err = pipeline(&store).run(&request).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Finalizing));
    assert!(matches!(err.root(), Error::Sink { .. }));
    assert!(store.get("dst", "out.zip").is_none());
    assert!(!keep.exists());
}

#[tokio::test]
async fn invisible_upload_fails_verification() {
    let store = seeded();
    store.hide_objects(true);
    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");

    let err = pipeline(&store).run(&request).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::VerifyingDestination));
    match err.root() {
        Error::NotFoundAfterUpload { container, path, attempts } => {
            assert_eq!((container.as_str(), path.as_str(), *attempts), ("dst", "out.zip", 3));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.exists_calls(), 3);
}

#[tokio::test]
async fn progress_events_follow_stages() {
    let store = seeded();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let pipeline = pipeline(&store).on_progress(Arc::new(move |event: &Progress| {
        sink.lock().unwrap().push(event.clone());
    }));

    let request = ArchiveRequest::new("src", "p/").destination("dst", "out.zip");
    pipeline.run(&request).await.unwrap();
    assert!(events.lock().unwrap().is_empty());

    pipeline.run(&request.clone().progress(true)).await.unwrap();
    let events = events.lock().unwrap();

    let stages: Vec<Stage> = events
        .iter()
        .filter_map(|event| match event {
            Progress::StageStarted(stage) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![
        Stage::Validating,
        Stage::ListingSources,
        Stage::FetchingAndArchiving,
        Stage::Finalizing,
        Stage::VerifyingDestination,
        Stage::Done,
    ]);
    assert!(events.contains(&Progress::Listed { objects: 2 }));
    assert!(events.contains(&Progress::FetchStarted {
        source: "p/hello.txt".into(),
        entry:  "hello.txt".into(),
    }));
    let archived = events
        .iter()
        .filter(|event| matches!(event, Progress::EntryArchived { .. }))
        .count();
    assert_eq!(archived, 2);
}

#[tokio::test]
async fn dir_store_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("src").join("logs");
    std::fs::create_dir_all(source.join("2024")).unwrap();
    std::fs::write(source.join("a.log"), "alpha").unwrap();
    std::fs::write(source.join("2024").join("b.log"), "beta").unwrap();

    let store = DirStore::new(root.path());
    let request = ArchiveRequest::new("src", "logs/").destination("dst", "logs.zip");
    let result = Pipeline::new(store).run(&request).await.unwrap().unwrap();

    let paths: Vec<&str> = result.manifest.iter().map(|e| e.archive_path.as_str()).collect();
    assert_eq!(paths, vec!["2024/b.log", "a.log"]);

    let archive = std::fs::read(root.path().join("dst").join("logs.zip")).unwrap();
    assert_eq!(read_zip(&archive), vec![
        ("2024/b.log".to_string(), "beta".to_string()),
        ("a.log".to_string(), "alpha".to_string()),
    ]);
}
