// src/package/mod.rs

//! Source and binary package model, plus package-level equivalence
//!
//! A binary package pair is equivalent when every compared header tag
//! matches and every payload file matches. Tags that only reflect when or
//! where a build ran (sizes, build time, file locations, mtimes, inodes,
//! ids) are skipped; file content mismatches are decided by the
//! content comparator, which knows which bytes are noise per format.

use crate::content::ContentComparator;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tempfile::TempDir;
use tracing::{debug, info};

/// Requirements carrying the package system's own ABI markers; filtered
/// out before analysis
const INTERNAL_CAPABILITY_PREFIX: &str = "rpmlib(";

/// Paths excluded from file comparison: build-id links and debuginfo
/// trees are derived from the build id, which moves on every rebuild
static IGNORED_FILE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"^/usr/lib/\.build-id/", r"^/usr/lib/debug/", r"/\.dwz/"]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect()
});

/// A source package and its declared build requirements
pub struct SourcePackage {
    path: PathBuf,
    file_name: String,
    build_requires: Vec<String>,
}

impl SourcePackage {
    /// Read a source package and collect its build requirements
    ///
    /// Requirements are rendered as `name [op version]` strings and kept
    /// sorted; internal capability markers are dropped.
    pub fn load(path: &Path) -> Result<Self> {
        let package = read_package(path)?;
        if !package.metadata.is_source_package() {
            return Err(Error::NotSourcePackage {
                path: path.to_path_buf(),
            });
        }

        let requires = package
            .metadata
            .get_requires()
            .map_err(|e| Error::PackageRead {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let mut build_requires: Vec<String> = requires
            .iter()
            .filter(|dep| !dep.name.starts_with(INTERNAL_CAPABILITY_PREFIX))
            .map(render_dependency)
            .collect();
        build_requires.sort();
        build_requires.dedup();

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!(
            "loaded {} with {} build requirements",
            file_name,
            build_requires.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            build_requires,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn build_requires(&self) -> &[String] {
        &self.build_requires
    }
}

/// A built binary package with its parsed header
pub struct BuiltPackage {
    path: PathBuf,
    package: rpm::Package,
}

impl BuiltPackage {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            package: read_package(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

fn read_package(path: &Path) -> Result<rpm::Package> {
    let file = File::open(path).map_err(|e| Error::PackageRead {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);
    rpm::Package::parse(&mut reader).map_err(|e| Error::PackageRead {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// The bare name of a rendered requirement string
pub fn requirement_name(requirement: &str) -> &str {
    requirement
        .split_whitespace()
        .next()
        .unwrap_or(requirement)
}

/// Render a dependency as `name [op version]`
pub(crate) fn render_dependency(dep: &rpm::Dependency) -> String {
    let op = flags_to_operator(dep.flags);
    if dep.version.is_empty() || op.is_empty() {
        dep.name.clone()
    } else {
        format!("{} {} {}", dep.name, op, dep.version)
    }
}

fn render_dependencies(deps: &[rpm::Dependency]) -> String {
    deps.iter()
        .map(render_dependency)
        .collect::<Vec<_>>()
        .join("; ")
}

/// `rpm::Scriptlet` has no `Debug` impl; render its public fields instead.
fn format_scriptlet(s: &rpm::Scriptlet) -> String {
    format!(
        "Scriptlet {{ script: {:?}, flags: {:?}, program: {:?} }}",
        s.script, s.flags, s.program
    )
}

/// Convert dependency flags to a comparison operator string
fn flags_to_operator(flags: rpm::DependencyFlags) -> &'static str {
    use rpm::DependencyFlags;

    if flags.contains(DependencyFlags::LESS) && flags.contains(DependencyFlags::EQUAL) {
        "<="
    } else if flags.contains(DependencyFlags::GREATER) && flags.contains(DependencyFlags::EQUAL) {
        ">="
    } else if flags.contains(DependencyFlags::LESS) {
        "<"
    } else if flags.contains(DependencyFlags::GREATER) {
        ">"
    } else if flags.contains(DependencyFlags::EQUAL) {
        "="
    } else {
        ""
    }
}

/// Per-file metadata compared between packages
///
/// Modification times and inodes are deliberately absent: they move on
/// every rebuild. The digest stands in for the content; when it differs
/// the content comparator has the final word.
#[derive(Debug, PartialEq, Eq)]
struct FileRecord {
    mode: i32,
    flags: String,
    digest: Option<String>,
    user: String,
    group: String,
    linkto: String,
    size: u64,
    caps: String,
    verify_flags: Option<u32>,
    color: Option<u32>,
    lang: Option<String>,
    device: Option<u32>,
    rdev: Option<u16>,
}

/// Decides whether two built packages are equivalent
pub struct PackageComparator<'a> {
    content: &'a ContentComparator,
}

impl<'a> PackageComparator<'a> {
    pub fn new(content: &'a ContentComparator) -> Self {
        Self { content }
    }

    /// Equivalence is the AND of the header phase and the file phase;
    /// both run fully so every difference is logged
    pub fn equal(&self, a: &BuiltPackage, b: &BuiltPackage) -> Result<bool> {
        let headers = self.headers_equal(a, b);
        let files = self.files_equal(a, b)?;
        Ok(headers && files)
    }

    fn headers_equal(&self, a: &BuiltPackage, b: &BuiltPackage) -> bool {
        let tags_a = header_snapshot(&a.package.metadata);
        let tags_b = header_snapshot(&b.package.metadata);

        let mut equal = true;
        let names: BTreeSet<&str> = tags_a.keys().chain(tags_b.keys()).copied().collect();
        for name in names {
            if tags_a.get(name) != tags_b.get(name) {
                info!(
                    "tag {} differs between {} and {}",
                    name,
                    a.file_name(),
                    b.file_name()
                );
                equal = false;
            }
        }
        equal
    }

    fn files_equal(&self, a: &BuiltPackage, b: &BuiltPackage) -> Result<bool> {
        let index_a = file_index(a)?;
        let index_b = file_index(b)?;

        let mut equal = true;
        for path in index_a.keys().filter(|path| !index_b.contains_key(*path)) {
            info!("file {} only in {}", path, a.file_name());
            equal = false;
        }
        for path in index_b.keys().filter(|path| !index_a.contains_key(*path)) {
            info!("file {} only in {}", path, b.file_name());
            equal = false;
        }

        // First pass over shared files: metadata tuples. Files whose
        // tuples differ with payload on both sides go to the content
        // comparator, since a moved build id changes the digest without
        // changing meaning.
        let mut content_checks: Vec<&str> = Vec::new();
        for (path, record_a) in &index_a {
            let Some(record_b) = index_b.get(path) else {
                continue;
            };
            if record_a == record_b {
                continue;
            }
            if record_a.digest.is_some() && record_b.digest.is_some() {
                debug!("metadata differs for {}; deferring to content", path);
                content_checks.push(path);
            } else {
                info!(
                    "file {} differs between {} and {}",
                    path,
                    a.file_name(),
                    b.file_name()
                );
                equal = false;
            }
        }

        if !content_checks.is_empty() {
            let extracted_a = extract_package(a.path())?;
            let extracted_b = extract_package(b.path())?;
            for path in content_checks {
                let relative = path.trim_start_matches('/');
                let file_a = extracted_a.path().join(relative);
                let file_b = extracted_b.path().join(relative);
                if !self.content.equal(&file_a, &file_b)? {
                    info!(
                        "file {} differs between {} and {}",
                        path,
                        a.file_name(),
                        b.file_name()
                    );
                    equal = false;
                }
            }
        }

        Ok(equal)
    }
}

fn file_index(pkg: &BuiltPackage) -> Result<BTreeMap<String, FileRecord>> {
    let md = &pkg.package.metadata;
    let entries = md.get_file_entries().map_err(|e| Error::PackageRead {
        path: pkg.path().to_path_buf(),
        detail: e.to_string(),
    })?;

    // Per-file arrays the entry accessor does not carry. Each is
    // index-aligned with the file entries; a package without the tag
    // yields None for every file on both sides of a comparison.
    let verify_flags = md
        .header
        .get_entry_data_as_u32_array(rpm::IndexTag::RPMTAG_FILEVERIFYFLAGS)
        .ok();
    let colors = md
        .header
        .get_entry_data_as_u32_array(rpm::IndexTag::RPMTAG_FILECOLORS)
        .ok();
    let langs = md
        .header
        .get_entry_data_as_string_array(rpm::IndexTag::RPMTAG_FILELANGS)
        .ok();
    let devices = md
        .header
        .get_entry_data_as_u32_array(rpm::IndexTag::RPMTAG_FILEDEVICES)
        .ok();
    let rdevs = md
        .header
        .get_entry_data_as_u16_array(rpm::IndexTag::RPMTAG_FILERDEVS)
        .ok();

    let mut index = BTreeMap::new();
    for (position, entry) in entries.into_iter().enumerate() {
        let path = entry.path.to_string_lossy().into_owned();
        if IGNORED_FILE_PATTERNS.iter().any(|re| re.is_match(&path)) {
            continue;
        }
        index.insert(
            path,
            FileRecord {
                mode: entry.mode.raw_mode() as i32,
                flags: format!("{:?}", entry.flags),
                digest: entry.digest.as_ref().map(|digest| format!("{}", digest)),
                user: entry.ownership.user.clone(),
                group: entry.ownership.group.clone(),
                linkto: entry.linkto.clone(),
                size: entry.size as u64,
                caps: format!("{:?}", entry.caps),
                verify_flags: verify_flags
                    .as_ref()
                    .and_then(|values| values.get(position))
                    .copied(),
                color: colors
                    .as_ref()
                    .and_then(|values| values.get(position))
                    .copied(),
                lang: langs
                    .as_ref()
                    .and_then(|values| values.get(position))
                    .map(|value| value.to_string()),
                device: devices
                    .as_ref()
                    .and_then(|values| values.get(position))
                    .copied(),
                rdev: rdevs
                    .as_ref()
                    .and_then(|values| values.get(position))
                    .copied(),
            },
        );
    }
    Ok(index)
}

/// Snapshot of the compared header tags, rendered to strings
///
/// The skip set is implicit: anything not fetched here is not compared.
/// That covers size variants, build time, basenames/dirnames/dirindexes,
/// file classes, file mtimes, file inodes, header and package ids,
/// signature data and the build cookie.
fn header_snapshot(md: &rpm::PackageMetadata) -> BTreeMap<&'static str, String> {
    let mut tags: BTreeMap<&'static str, String> = BTreeMap::new();
    {
        let mut put = |tag: &'static str, value: Option<String>| {
            if let Some(value) = value {
                tags.insert(tag, value);
            }
        };

        put("Name", md.get_name().ok().map(str::to_string));
        put("Epoch", md.get_epoch().ok().map(|v| v.to_string()));
        put("Version", md.get_version().ok().map(str::to_string));
        put("Release", md.get_release().ok().map(str::to_string));
        put("Arch", md.get_arch().ok().map(str::to_string));
        put("Summary", md.get_summary().ok().map(|v| v.to_string()));
        put("Description", md.get_description().ok().map(|v| v.to_string()));
        put("License", md.get_license().ok().map(str::to_string));
        put("Group", md.get_group().ok().map(|v| v.to_string()));
        put("Url", md.get_url().ok().map(str::to_string));
        put("Vendor", md.get_vendor().ok().map(str::to_string));
        put("BuildHost", md.get_build_host().ok().map(str::to_string));
        put("SourceRpm", md.get_source_rpm().ok().map(str::to_string));
        put(
            "PayloadCompressor",
            md.get_payload_compressor().ok().map(|v| format!("{:?}", v)),
        );
        put(
            "Provides",
            md.get_provides().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Requires",
            md.get_requires().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Conflicts",
            md.get_conflicts().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Obsoletes",
            md.get_obsoletes().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Recommends",
            md.get_recommends().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Suggests",
            md.get_suggests().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Supplements",
            md.get_supplements().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "Enhances",
            md.get_enhances().ok().map(|d| render_dependencies(&d)),
        );
        put(
            "PreInstallScript",
            md.get_pre_install_script().ok().map(|s| format_scriptlet(&s)),
        );
        put(
            "PostInstallScript",
            md.get_post_install_script().ok().map(|s| format_scriptlet(&s)),
        );
        put(
            "PreUninstallScript",
            md.get_pre_uninstall_script().ok().map(|s| format_scriptlet(&s)),
        );
        put(
            "PostUninstallScript",
            md.get_post_uninstall_script().ok().map(|s| format_scriptlet(&s)),
        );
        put(
            "Changelog",
            md.get_changelog_entries().ok().map(|entries| format!("{:?}", entries)),
        );
    }
    tags
}

/// Extract a binary package's payload into a temp directory
///
/// Uses rpm2cpio piped into cpio, same as a manual unpack would.
fn extract_package(path: &Path) -> Result<TempDir> {
    let temp_dir = TempDir::new()?;

    let rpm2cpio = Command::new("rpm2cpio")
        .arg(path)
        .output()
        .map_err(|e| Error::Unpack {
            path: path.to_path_buf(),
            detail: format!("failed to run rpm2cpio: {}. Is rpm2cpio installed?", e),
        })?;

    if !rpm2cpio.status.success() {
        return Err(Error::Unpack {
            path: path.to_path_buf(),
            detail: format!(
                "rpm2cpio failed: {}",
                String::from_utf8_lossy(&rpm2cpio.stderr)
            ),
        });
    }

    let cpio_status = Command::new("cpio")
        .args(["-idm", "--quiet"])
        .current_dir(temp_dir.path())
        .stdin(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(&rpm2cpio.stdout)?;
            }
            child.wait()
        })
        .map_err(|e| Error::Unpack {
            path: path.to_path_buf(),
            detail: format!("failed to run cpio: {}. Is cpio installed?", e),
        })?;

    if !cpio_status.success() {
        return Err(Error::Unpack {
            path: path.to_path_buf(),
            detail: "cpio extraction failed".to_string(),
        });
    }

    Ok(temp_dir)
}

/// Compare two result directories of built packages
///
/// The source package rebuilt alongside the binaries is excluded; the
/// directories are equivalent when they hold the same package file names
/// and every pair is equivalent.
pub fn result_dirs_equal(
    comparator: &PackageComparator<'_>,
    reference: &Path,
    candidate: &Path,
) -> Result<bool> {
    let packages_a = list_binary_packages(reference)?;
    let packages_b = list_binary_packages(candidate)?;

    let names_a: BTreeSet<&String> = packages_a.keys().collect();
    let names_b: BTreeSet<&String> = packages_b.keys().collect();
    if names_a != names_b {
        info!(
            "package sets differ in {}: {:?}",
            candidate.display(),
            names_a.symmetric_difference(&names_b).collect::<Vec<_>>()
        );
        return Ok(false);
    }

    let mut equal = true;
    for (name, path_a) in &packages_a {
        let path_b = &packages_b[name];
        let built_a = BuiltPackage::open(path_a)?;
        let built_b = BuiltPackage::open(path_b)?;
        if !comparator.equal(&built_a, &built_b)? {
            equal = false;
        }
    }
    Ok(equal)
}

fn list_binary_packages(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut packages = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".rpm") && !name.ends_with(".src.rpm") {
            packages.insert(name, entry.path());
        }
    }
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_name() {
        assert_eq!(requirement_name("gcc"), "gcc");
        assert_eq!(requirement_name("python3-devel >= 3.9"), "python3-devel");
        assert_eq!(requirement_name(""), "");
    }

    #[test]
    fn test_render_dependency() {
        assert_eq!(render_dependency(&rpm::Dependency::any("gcc")), "gcc");
        assert_eq!(
            render_dependency(&rpm::Dependency::greater_eq("cmake", "3.20")),
            "cmake >= 3.20"
        );
        assert_eq!(
            render_dependency(&rpm::Dependency::eq("make", "4.3")),
            "make = 4.3"
        );
        assert_eq!(
            render_dependency(&rpm::Dependency::less("bash", "6")),
            "bash < 6"
        );
    }

    #[test]
    fn test_ignored_file_patterns() {
        let hit = "/usr/lib/.build-id/ab/cdef1234";
        let miss = "/usr/bin/tool";
        assert!(IGNORED_FILE_PATTERNS.iter().any(|re| re.is_match(hit)));
        assert!(!IGNORED_FILE_PATTERNS.iter().any(|re| re.is_match(miss)));
    }

    #[test]
    fn test_load_nonexistent_source_package() {
        let result = SourcePackage::load(Path::new("/nonexistent/pkg.src.rpm"));
        assert!(result.is_err());
    }

    #[test]
    fn test_binary_package_is_rejected_as_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("not-source.rpm");

        let package = rpm::PackageBuilder::new("not-source", "1.0", "MIT", "noarch", "test")
            .compression(rpm::CompressionType::Gzip)
            .build()
            .unwrap();
        let mut file = File::create(&path).unwrap();
        package.write(&mut file).unwrap();

        match SourcePackage::load(&path) {
            Err(Error::NotSourcePackage { .. }) => {}
            other => panic!("expected NotSourcePackage, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_list_binary_packages_excludes_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("pkg-1.0-1.x86_64.rpm"), b"").unwrap();
        std::fs::write(dir.path().join("pkg-1.0-1.src.rpm"), b"").unwrap();
        std::fs::write(dir.path().join("build.log"), b"").unwrap();

        let packages = list_binary_packages(dir.path()).unwrap();
        assert_eq!(packages.len(), 1);
        assert!(packages.contains_key("pkg-1.0-1.x86_64.rpm"));
    }
}
