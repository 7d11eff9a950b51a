use super::*;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const T0: &str = "2024-01-01T00:00:00Z";
const T1: &str = "2024-03-01T12:00:00Z";

fn make_reconciler() -> Reconciler {
    Reconciler::new(
        TransferClient::new(Some("test-token".into())),
        StampFormat::new("Z", "[year][month][day]").unwrap(),
    )
}

fn remote(folder_id: u64, name: &str, url: String, modified: &str) -> RemoteFile {
    RemoteFile {
        folder_id,
        display_name: name.to_string(),
        source: ContentSource::parse(&url),
        modified_at: parse_modified(modified).unwrap(),
    }
}

async fn serve(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn downloads_into_empty_tree_then_skips_on_rerun() {
    let server = MockServer::start().await;
    serve(&server, "/files/1", b"lecture one").await;
    let root = tempdir().unwrap();
    let lectures = root.path().join("Lectures");
    let file = remote(1, "Lecture1.pdf", format!("{}/files/1", server.uri()), T0);

    let mut first = make_reconciler();
    first.add_folder(1, lectures.clone()).await.unwrap();
    let outcome = first.reconcile(&file).await;
    let target = lectures.join("Lecture1.pdf");
    assert_eq!(outcome, FileOutcome::Created(target.clone()));
    assert_eq!(
        first.stats(),
        ReconcileStats {
            downloaded: 1,
            updated: 0,
            skipped: 0,
            errors: 0
        }
    );
    assert_eq!(std::fs::read(&target).unwrap(), b"lecture one");
    assert_eq!(
        modified_time(&target).await.unwrap(),
        SystemTime::from(file.modified_at)
    );

    let mut second = make_reconciler();
    second.add_folder(1, lectures.clone()).await.unwrap();
    assert_eq!(
        second.reconcile(&file).await,
        FileOutcome::Unchanged(target.clone())
    );
    let result = second.finish();
    assert_eq!(
        result.stats,
        ReconcileStats {
            downloaded: 0,
            updated: 0,
            skipped: 1,
            errors: 0
        }
    );
    assert!(result.expected_files.contains(&target));
    assert!(result.expected_dirs.contains(&lectures));
}

#[tokio::test]
async fn touched_remote_with_same_bytes_is_skipped() {
    let server = MockServer::start().await;
    serve(&server, "/files/1", b"same bytes").await;
    let root = tempdir().unwrap();
    let target = root.path().join("notes.txt");
    std::fs::write(&target, b"same bytes").unwrap();
    set_modified(&target, parse_modified(T0).unwrap())
        .await
        .unwrap();

    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(1, root.path().to_path_buf())
        .await
        .unwrap();
    let file = remote(1, "notes.txt", format!("{}/files/1", server.uri()), T1);

    assert_eq!(
        reconciler.reconcile(&file).await,
        FileOutcome::Unchanged(target.clone())
    );
    assert_eq!(reconciler.stats().skipped, 1);
    assert_eq!(reconciler.stats().updated, 0);
    assert_eq!(names_in(root.path()), vec!["notes.txt"]);
    // The local timestamp catches up so the next run does not refetch.
    assert_eq!(
        modified_time(&target).await.unwrap(),
        SystemTime::from(file.modified_at)
    );
}

#[tokio::test]
async fn newer_remote_with_different_bytes_replaces_local_copy() {
    let server = MockServer::start().await;
    serve(&server, "/files/1", b"version two").await;
    let root = tempdir().unwrap();
    let target = root.path().join("notes.txt");
    std::fs::write(&target, b"version one").unwrap();
    set_modified(&target, parse_modified(T0).unwrap())
        .await
        .unwrap();

    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(1, root.path().to_path_buf())
        .await
        .unwrap();
    let file = remote(1, "notes.txt", format!("{}/files/1", server.uri()), T1);

    assert_eq!(
        reconciler.reconcile(&file).await,
        FileOutcome::Updated(target.clone())
    );
    assert_eq!(reconciler.stats().updated, 1);
    assert_eq!(std::fs::read(&target).unwrap(), b"version two");
    assert_eq!(names_in(root.path()), vec!["notes.txt"]);
}

#[tokio::test]
async fn local_copy_newer_than_remote_is_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote"))
        .expect(0)
        .mount(&server)
        .await;
    let root = tempdir().unwrap();
    let target = root.path().join("notes.txt");
    std::fs::write(&target, b"local").unwrap();
    set_modified(&target, parse_modified(T1).unwrap())
        .await
        .unwrap();

    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(1, root.path().to_path_buf())
        .await
        .unwrap();
    let file = remote(1, "notes.txt", format!("{}/files/1", server.uri()), T0);

    assert_eq!(
        reconciler.reconcile(&file).await,
        FileOutcome::Unchanged(target.clone())
    );
    assert_eq!(std::fs::read(&target).unwrap(), b"local");
}

#[tokio::test]
async fn case_collision_gets_stable_suffixed_name() {
    let server = MockServer::start().await;
    serve(&server, "/files/1", b"upper").await;
    serve(&server, "/files/2", b"lower").await;
    let root = tempdir().unwrap();
    let upper = remote(1, "Notes.pdf", format!("{}/files/1", server.uri()), T0);
    let lower = remote(1, "notes.pdf", format!("{}/files/2", server.uri()), T1);

    let mut first = make_reconciler();
    first.add_folder(1, root.path().to_path_buf()).await.unwrap();
    assert_eq!(
        first.reconcile(&upper).await,
        FileOutcome::Created(root.path().join("Notes.pdf"))
    );
    let renamed = root.path().join("notes c20240301.pdf");
    assert_eq!(
        first.reconcile(&lower).await,
        FileOutcome::CaseRenamed(renamed.clone())
    );
    assert_eq!(first.stats().downloaded, 2);
    assert_eq!(std::fs::read(&renamed).unwrap(), b"lower");

    let mut second = make_reconciler();
    second.add_folder(1, root.path().to_path_buf()).await.unwrap();
    second.reconcile(&upper).await;
    assert_eq!(
        second.reconcile(&lower).await,
        FileOutcome::Unchanged(renamed)
    );
    assert_eq!(second.stats().skipped, 2);
    assert_eq!(second.stats().downloaded, 0);
    assert_eq!(
        names_in(root.path()),
        vec!["Notes.pdf", "notes c20240301.pdf"]
    );
}

#[tokio::test]
async fn unavailable_entry_is_counted_and_not_expected() {
    let root = tempdir().unwrap();
    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(1, root.path().to_path_buf())
        .await
        .unwrap();
    let file = remote(1, "locked.pdf", String::new(), T0);

    assert_eq!(
        reconciler.reconcile(&file).await,
        FileOutcome::Unavailable(None)
    );
    let result = reconciler.finish();
    assert_eq!(result.stats.errors, 1);
    assert!(result.expected_files.is_empty());
    assert!(result.protected_files.is_empty());
    assert!(names_in(root.path()).is_empty());
}

#[tokio::test]
async fn unavailable_entry_protects_resident_copy() {
    let root = tempdir().unwrap();
    let previous = root.path().join("locked.pdf");
    std::fs::write(&previous, b"synced while unlocked").unwrap();
    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(1, root.path().to_path_buf())
        .await
        .unwrap();
    let file = remote(1, "locked.pdf", String::new(), T1);

    assert_eq!(
        reconciler.reconcile(&file).await,
        FileOutcome::Unavailable(Some(previous.clone()))
    );
    let result = reconciler.finish();
    assert_eq!(result.stats.errors, 1);
    assert!(result.expected_files.is_empty());
    assert_eq!(result.protected_files, HashSet::from([previous.clone()]));
    assert_eq!(std::fs::read(&previous).unwrap(), b"synced while unlocked");
}

#[tokio::test]
async fn failed_download_is_counted_and_not_expected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let root = tempdir().unwrap();
    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(1, root.path().to_path_buf())
        .await
        .unwrap();
    let file = remote(1, "broken.pdf", format!("{}/files/1", server.uri()), T0);

    assert_eq!(reconciler.reconcile(&file).await, FileOutcome::Failed);
    let result = reconciler.finish();
    assert_eq!(result.stats.errors, 1);
    assert!(result.expected_files.is_empty());
    assert!(names_in(root.path()).is_empty());
}

#[tokio::test]
async fn unknown_folder_is_an_entry_error() {
    let mut reconciler = make_reconciler();
    let file = remote(99, "orphan.pdf", "https://files.example/1".into(), T0);
    assert_eq!(reconciler.reconcile(&file).await, FileOutcome::Failed);
    assert_eq!(reconciler.stats().errors, 1);
}

#[tokio::test]
async fn local_only_sources_materialize_without_network() {
    let root = tempdir().unwrap();
    let mut reconciler = make_reconciler();
    reconciler
        .add_folder(5, root.path().to_path_buf())
        .await
        .unwrap();
    let header = remote(5, "1 Readings", "SubHeader:Readings".into(), T0);
    let link = remote(5, "2~ Syllabus.url", "URL:https://canvas.example/p".into(), T0);

    assert!(matches!(
        reconciler.reconcile(&header).await,
        FileOutcome::Created(_)
    ));
    assert!(matches!(
        reconciler.reconcile(&link).await,
        FileOutcome::Created(_)
    ));
    assert_eq!(
        std::fs::read_to_string(root.path().join("2~ Syllabus.url")).unwrap(),
        "[InternetShortcut]\nURL=https://canvas.example/p\n"
    );
    assert_eq!(reconciler.stats().downloaded, 2);
}

#[test]
fn stats_render_as_summary_fragment() {
    let stats = ReconcileStats {
        downloaded: 3,
        updated: 1,
        skipped: 7,
        errors: 0,
    };
    assert_eq!(stats.to_string(), "3 new, 1 updated, 7 skipped, 0 errors");
}

#[test]
fn converts_api_file_records() {
    let file = canvas_core::File {
        id: 1,
        folder_id: 2,
        display_name: "a.pdf".into(),
        url: "URL:https://x.example".into(),
        modified_at: T0.into(),
    };
    let remote = RemoteFile::from_api(&file).unwrap();
    assert_eq!(remote.folder_id, 2);
    assert_eq!(
        remote.source,
        ContentSource::Shortcut("https://x.example".into())
    );
    assert_eq!(remote.modified_at.unix_timestamp(), 1_704_067_200);

    let bad = canvas_core::File {
        modified_at: "yesterday".into(),
        ..file
    };
    assert!(RemoteFile::from_api(&bad).is_err());
}
