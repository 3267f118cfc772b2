//! Extractor tests with real zip archives

use cnpj_common::Settings;
use cnpj_ingest::error::PipelineError;
use cnpj_ingest::services::Extractor;
use std::io::Write;
use std::path::{Path, PathBuf};

fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn settings_for(data_dir: PathBuf) -> Settings {
    Settings {
        data_dir,
        ..Settings::default()
    }
}

#[tokio::test]
async fn extracts_all_entries_preserving_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let archive_a = tmp.path().join("Empresas0.zip");
    let archive_b = tmp.path().join("Socios0.zip");
    make_zip(
        &archive_a,
        &[("K3241.EMPRECSV", b"\"01\";\"ACME\"" as &[u8])],
    );
    make_zip(
        &archive_b,
        &[("nested/dir/K3241.SOCIOCSV", b"\"01\";\"2\"" as &[u8])],
    );

    let settings = settings_for(tmp.path().to_path_buf());
    let extractor = Extractor::new(&settings);
    let files = extractor
        .extract_release("2024-05", &[archive_a, archive_b], true)
        .await
        .unwrap();

    assert_eq!(files.len(), 2);
    let staging = tmp.path().join("staging").join("2024-05");
    assert!(staging.join("K3241.EMPRECSV").is_file());
    assert!(staging.join("nested/dir/K3241.SOCIOCSV").is_file());
    assert_eq!(
        std::fs::read(staging.join("K3241.EMPRECSV")).unwrap(),
        b"\"01\";\"ACME\""
    );
}

#[tokio::test]
async fn reuse_returns_existing_files_without_touching_archives() {
    let tmp = tempfile::tempdir().unwrap();
    let staging = tmp.path().join("staging").join("2024-05");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("K3241.EMPRECSV"), b"cached").unwrap();

    let settings = settings_for(tmp.path().to_path_buf());
    let extractor = Extractor::new(&settings);
    // The archive path does not even exist; reuse must not read it.
    let files = extractor
        .extract_release("2024-05", &[tmp.path().join("missing.zip")], true)
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), b"cached");
}

#[tokio::test]
async fn corrupt_archive_hard_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let bogus = tmp.path().join("Broken.zip");
    std::fs::write(&bogus, b"this is not a zip archive").unwrap();

    let settings = settings_for(tmp.path().to_path_buf());
    let extractor = Extractor::new(&settings);
    let err = extractor
        .extract_release("2024-05", &[bogus], false)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ExtractionFailed { .. }));
}

#[tokio::test]
async fn missing_archive_is_skipped_with_a_warning() {
    let tmp = tempfile::tempdir().unwrap();
    let present = tmp.path().join("Simples.zip");
    make_zip(&present, &[("F.K03200.SIMECSV", b"\"01\";\"S\"" as &[u8])]);

    let settings = settings_for(tmp.path().to_path_buf());
    let extractor = Extractor::new(&settings);
    let files = extractor
        .extract_release(
            "2024-05",
            &[tmp.path().join("gone.zip"), present],
            false,
        )
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
}
