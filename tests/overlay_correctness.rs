#![allow(clippy::unwrap_used, missing_docs)]

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;
use std::sync::Arc;

use env_fs::env::EnvSnapshot;
use env_fs::fs::overlay::{BinaryPolicy, QueryAttrError, ReadError, ReleaseError};
use env_fs::fs::{AccessMode, EntryKind, OverlayFs};

fn overlay_over(base: &Path, env: &Arc<EnvSnapshot>) -> OverlayFs {
    OverlayFs::new(base, Arc::clone(env), BinaryPolicy::default())
}

#[tokio::test]
async fn attributes_report_the_transformed_size() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config"), "HOST=${HOSTNAME}").unwrap();

    let env = Arc::new(EnvSnapshot::new());
    env.set("HOSTNAME", "localhost");
    let mut overlay = overlay_over(dir.path(), &env);

    let attr = overlay.query_attributes(Path::new("/config")).await.unwrap();
    assert_eq!(attr.size, 14, "size must be the transformed length");
    assert_eq!(attr.kind(), EntryKind::RegularFile);

    let data = overlay.read_file(Path::new("/config"), 0, 16).unwrap();
    assert_eq!(&data[..], b"HOST=localhost");

    let prefix = overlay.read_file(Path::new("/config"), 0, 5).unwrap();
    assert_eq!(&prefix[..], b"HOST=");
}

#[tokio::test]
async fn reads_serve_cached_content_until_requeried() {
    let dir = tempfile::tempdir().unwrap();
    let base_file = dir.path().join("app.env");
    std::fs::write(&base_file, "A=${X}").unwrap();

    let env = Arc::new(EnvSnapshot::new());
    env.set("X", "1");
    let mut overlay = overlay_over(dir.path(), &env);

    overlay.query_attributes(Path::new("/app.env")).await.unwrap();
    let first = overlay.read_file(Path::new("/app.env"), 0, 64).unwrap();
    assert_eq!(&first[..], b"A=1");

    // Neither a base edit nor a fresh assignment shows up mid-stream.
    std::fs::write(&base_file, "B=${X}").unwrap();
    env.set("X", "2");
    let stale = overlay.read_file(Path::new("/app.env"), 0, 64).unwrap();
    assert_eq!(&stale[..], b"A=1");

    let attr = overlay.query_attributes(Path::new("/app.env")).await.unwrap();
    assert_eq!(attr.size, 3);
    let fresh = overlay.read_file(Path::new("/app.env"), 0, 64).unwrap();
    assert_eq!(&fresh[..], b"B=2");
}

#[tokio::test]
async fn listing_starts_with_the_pseudo_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), "x").unwrap();
    std::fs::write(dir.path().join("b"), "y").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let entries = overlay.list_directory(Path::new("/")).await.unwrap();
    assert_eq!(entries[0].name, OsString::from("."));
    assert_eq!(entries[0].kind, EntryKind::Directory);
    assert_eq!(entries[1].name, OsString::from(".."));
    assert_eq!(entries[1].kind, EntryKind::Directory);

    let mut names: Vec<_> = entries[2..].iter().map(|e| e.name.clone()).collect();
    names.sort();
    assert_eq!(
        names,
        vec![OsString::from("a"), OsString::from("b"), OsString::from("sub")]
    );
    let sub = entries.iter().find(|e| e.name == "sub").unwrap();
    assert_eq!(sub.kind, EntryKind::Directory);
    let a = entries.iter().find(|e| e.name == "a").unwrap();
    assert_eq!(a.kind, EntryKind::RegularFile);
}

#[tokio::test]
async fn listing_a_non_directory_yields_only_pseudo_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("plain"), "x").unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let on_file = overlay.list_directory(Path::new("/plain")).await.unwrap();
    assert_eq!(on_file.len(), 2);

    let on_missing = overlay.list_directory(Path::new("/ghost")).await.unwrap();
    assert_eq!(on_missing.len(), 2);
}

#[tokio::test]
async fn reads_past_the_end_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("short"), "hi").unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);
    overlay.query_attributes(Path::new("/short")).await.unwrap();

    let at_end = overlay.read_file(Path::new("/short"), 2, 8).unwrap();
    assert!(at_end.is_empty());
    let far_past = overlay.read_file(Path::new("/short"), 100, 8).unwrap();
    assert!(far_past.is_empty());
    let clipped = overlay.read_file(Path::new("/short"), 1, 8).unwrap();
    assert_eq!(&clipped[..], b"i");
}

#[tokio::test]
async fn reading_an_entry_without_content_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);
    overlay.query_attributes(Path::new("/sub")).await.unwrap();

    let err = overlay.read_file(Path::new("/sub"), 0, 8);
    assert!(matches!(err, Err(ReadError::NotCached)));
}

#[tokio::test]
async fn missing_paths_report_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let err = overlay.query_attributes(Path::new("/ghost")).await;
    assert!(matches!(err, Err(QueryAttrError::NotFound)));
}

#[test]
fn handles_are_monotonic_and_release_once() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let first = overlay.open_file(Path::new("/a"));
    let second = overlay.open_file(Path::new("/a"));
    assert!(second > first, "handles must never repeat");

    overlay.release_file(first).unwrap();
    let again = overlay.release_file(first);
    assert!(matches!(again, Err(ReleaseError::FileNotOpen)));
    overlay.release_file(second).unwrap();
}

#[tokio::test]
async fn binary_content_passes_through_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let raw = [0xFF_u8, 0xFE, b'$', b'{'];
    std::fs::write(dir.path().join("blob"), raw).unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let attr = overlay.query_attributes(Path::new("/blob")).await.unwrap();
    assert_eq!(attr.size, 4, "raw size for non-text content");
    let data = overlay.read_file(Path::new("/blob"), 0, 16).unwrap();
    assert_eq!(&data[..], &raw[..]);
}

#[tokio::test]
async fn binary_content_is_rejected_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("blob"), [0xFF_u8, 0xFE]).unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = OverlayFs::new(dir.path(), Arc::clone(&env), BinaryPolicy::Reject);

    let err = overlay.query_attributes(Path::new("/blob")).await;
    assert!(matches!(err, Err(QueryAttrError::Encoding(_))));
}

#[tokio::test]
async fn substitution_tracks_snapshot_updates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("motd"), "${GREETING} world").unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let attr = overlay.query_attributes(Path::new("/motd")).await.unwrap();
    assert_eq!(attr.size, 6, "unset names substitute to the empty string");
    let unset = overlay.read_file(Path::new("/motd"), 0, 32).unwrap();
    assert_eq!(&unset[..], b" world");

    env.set("GREETING", "hello");
    overlay.query_attributes(Path::new("/motd")).await.unwrap();
    let set = overlay.read_file(Path::new("/motd"), 0, 32).unwrap();
    assert_eq!(&set[..], b"hello world");
}

#[test]
fn access_checks_consult_the_base_entry() {
    let dir = tempfile::tempdir().unwrap();
    let base_file = dir.path().join("data");
    std::fs::write(&base_file, "x").unwrap();
    std::fs::set_permissions(&base_file, std::fs::Permissions::from_mode(0o644)).unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let overlay = overlay_over(dir.path(), &env);

    overlay.check_access(Path::new("/data"), AccessMode::READ).unwrap();
    // Existence check: the empty mode set is F_OK.
    overlay.check_access(Path::new("/data"), AccessMode::empty()).unwrap();
    overlay.check_access(Path::new("/"), AccessMode::EXECUTE).unwrap();

    let exec = overlay.check_access(Path::new("/data"), AccessMode::EXECUTE);
    assert!(exec.is_err(), "no execute bit is set on the base file");
    let ghost = overlay.check_access(Path::new("/ghost"), AccessMode::empty());
    assert!(ghost.is_err());
}

#[tokio::test]
async fn symlinks_report_their_own_kind() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("target"), "T=${T}").unwrap();
    std::os::unix::fs::symlink("target", dir.path().join("link")).unwrap();

    let env = Arc::new(EnvSnapshot::new());
    let mut overlay = overlay_over(dir.path(), &env);

    let attr = overlay.query_attributes(Path::new("/link")).await.unwrap();
    assert_eq!(attr.kind(), EntryKind::Symlink);

    // The link itself carries no transformed content.
    let err = overlay.read_file(Path::new("/link"), 0, 8);
    assert!(matches!(err, Err(ReadError::NotCached)));
}
