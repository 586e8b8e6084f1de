// tests/package_compare.rs

//! Equivalence checks over binary packages built in-process

use buildreq_prune::content::ContentComparator;
use buildreq_prune::package::{result_dirs_equal, BuiltPackage, PackageComparator};
use flate2::{Compression, GzBuilder};
use rpm::PackageBuilder;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn build_package(
    dir: &Path,
    file_name: &str,
    configure: impl FnOnce(PackageBuilder) -> PackageBuilder,
) -> PathBuf {
    let builder = PackageBuilder::new("demo", "1.0", "MIT", "x86_64", "demo package")
        .compression(rpm::CompressionType::Gzip);
    let package = configure(builder).build().unwrap();

    let path = dir.join(file_name);
    let mut file = File::create(&path).unwrap();
    package.write(&mut file).unwrap();
    path
}

fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn open_pair(a: &Path, b: &Path) -> (BuiltPackage, BuiltPackage) {
    (
        BuiltPackage::open(a).unwrap(),
        BuiltPackage::open(b).unwrap(),
    )
}

#[test]
fn identical_builds_are_equivalent() {
    let dir = TempDir::new().unwrap();
    let data = write_source(dir.path(), "data.txt", b"payload");

    let path_a = build_package(dir.path(), "a.rpm", |builder| {
        builder
            .with_file(&data, rpm::FileOptions::new("/usr/share/demo/data.txt"))
            .unwrap()
    });
    let path_b = build_package(dir.path(), "b.rpm", |builder| {
        builder
            .with_file(&data, rpm::FileOptions::new("/usr/share/demo/data.txt"))
            .unwrap()
    });

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    let (a, b) = open_pair(&path_a, &path_b);
    assert!(comparator.equal(&a, &b).unwrap());
}

#[test]
fn byte_identical_packages_are_equivalent() {
    let dir = TempDir::new().unwrap();
    let path = build_package(dir.path(), "a.rpm", |builder| builder);
    let copy = dir.path().join("copy.rpm");
    fs::copy(&path, &copy).unwrap();

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    let (a, b) = open_pair(&path, &copy);
    assert!(comparator.equal(&a, &b).unwrap());
}

#[test]
fn added_provides_breaks_equivalence() {
    let dir = TempDir::new().unwrap();
    let path_a = build_package(dir.path(), "a.rpm", |builder| builder);
    let path_b = build_package(dir.path(), "b.rpm", |builder| {
        builder.provides(rpm::Dependency::any("extra-capability"))
    });

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    let (a, b) = open_pair(&path_a, &path_b);
    assert!(!comparator.equal(&a, &b).unwrap());
    // Symmetry
    assert!(!comparator.equal(&b, &a).unwrap());
}

#[test]
fn added_file_breaks_equivalence() {
    let dir = TempDir::new().unwrap();
    let data = write_source(dir.path(), "data.txt", b"payload");

    let path_a = build_package(dir.path(), "a.rpm", |builder| builder);
    let path_b = build_package(dir.path(), "b.rpm", |builder| {
        builder
            .with_file(&data, rpm::FileOptions::new("/usr/share/demo/data.txt"))
            .unwrap()
    });

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    let (a, b) = open_pair(&path_a, &path_b);
    assert!(!comparator.equal(&a, &b).unwrap());
}

#[test]
fn build_id_paths_are_ignored() {
    let dir = TempDir::new().unwrap();
    let id_a = write_source(dir.path(), "id-a", b"first build id");
    let id_b = write_source(dir.path(), "id-b", b"second build id");

    let path_a = build_package(dir.path(), "a.rpm", |builder| {
        builder
            .with_file(
                &id_a,
                rpm::FileOptions::new("/usr/lib/.build-id/aa/bbccdd"),
            )
            .unwrap()
    });
    let path_b = build_package(dir.path(), "b.rpm", |builder| {
        builder
            .with_file(
                &id_b,
                rpm::FileOptions::new("/usr/lib/.build-id/aa/bbccdd"),
            )
            .unwrap()
    });

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    let (a, b) = open_pair(&path_a, &path_b);
    assert!(comparator.equal(&a, &b).unwrap());
}

#[test]
fn gzip_member_differing_only_in_header_is_equivalent() {
    // Content comparison extracts payloads with rpm2cpio and cpio
    if which::which("rpm2cpio").is_err() || which::which("cpio").is_err() {
        eprintln!("skipping: rpm2cpio/cpio not available");
        return;
    }

    let dir = TempDir::new().unwrap();

    let gz_a = dir.path().join("doc-a.gz");
    let mut gz = GzBuilder::new()
        .filename("README")
        .mtime(1000)
        .write(File::create(&gz_a).unwrap(), Compression::default());
    gz.write_all(b"documentation").unwrap();
    gz.finish().unwrap();

    let gz_b = dir.path().join("doc-b.gz");
    let mut gz = GzBuilder::new()
        .filename("README")
        .mtime(2000)
        .write(File::create(&gz_b).unwrap(), Compression::default());
    gz.write_all(b"documentation").unwrap();
    gz.finish().unwrap();

    let path_a = build_package(dir.path(), "a.rpm", |builder| {
        builder
            .with_file(&gz_a, rpm::FileOptions::new("/usr/share/doc/demo/README.gz"))
            .unwrap()
    });
    let path_b = build_package(dir.path(), "b.rpm", |builder| {
        builder
            .with_file(&gz_b, rpm::FileOptions::new("/usr/share/doc/demo/README.gz"))
            .unwrap()
    });

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    let (a, b) = open_pair(&path_a, &path_b);
    // Digests differ, but the decompressed contents match
    assert!(comparator.equal(&a, &b).unwrap());
}

#[test]
fn result_dirs_ignore_rebuilt_source_packages() {
    let dir = TempDir::new().unwrap();
    let dir_a = dir.path().join("reference");
    let dir_b = dir.path().join("candidate");
    fs::create_dir_all(&dir_a).unwrap();
    fs::create_dir_all(&dir_b).unwrap();

    build_package(&dir_a, "demo-1.0-1.x86_64.rpm", |builder| builder);
    build_package(&dir_b, "demo-1.0-1.x86_64.rpm", |builder| builder);
    // Only the reference directory carries the rebuilt source package
    fs::write(dir_a.join("demo-1.0-1.src.rpm"), b"not compared").unwrap();

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    assert!(result_dirs_equal(&comparator, &dir_a, &dir_b).unwrap());
}

#[test]
fn result_dirs_with_different_package_sets_differ() {
    let dir = TempDir::new().unwrap();
    let dir_a = dir.path().join("reference");
    let dir_b = dir.path().join("candidate");
    fs::create_dir_all(&dir_a).unwrap();
    fs::create_dir_all(&dir_b).unwrap();

    build_package(&dir_a, "demo-1.0-1.x86_64.rpm", |builder| builder);
    build_package(&dir_b, "other-1.0-1.x86_64.rpm", |builder| builder);

    let content = ContentComparator::new();
    let comparator = PackageComparator::new(&content);
    assert!(!result_dirs_equal(&comparator, &dir_a, &dir_b).unwrap());
}
