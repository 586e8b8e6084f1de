// src/runner.rs

//! End-to-end analysis driver
//!
//! Sequence: reference build, second reference build, reproducibility
//! gate, then the minimization loop with a mock-backed prober. The
//! workdir and the build root are both scoped here so cleanup runs on
//! every exit path.

use crate::chroot::{BuildRoot, ProvisionOutcome};
use crate::content::ContentComparator;
use crate::error::{Error, Result};
use crate::minimize::{self, Candidate, MinimizeOptions, ProbeOutcome, Prober};
use crate::package::{result_dirs_equal, PackageComparator, SourcePackage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct RunOptions {
    pub srpm: PathBuf,
    pub root: String,
    pub no_clean: bool,
    pub reproduce_only: bool,
    pub offline: bool,
    pub assume_compose: bool,
}

/// Run the full analysis
///
/// Returns the findings line for stdout, or None when there is nothing
/// to report.
pub fn run(options: &RunOptions) -> Result<Option<String>> {
    if which::which("mock").is_err() {
        return Err(Error::MissingTool("mock"));
    }

    let content = ContentComparator::new();
    content.preflight()?;
    let comparator = PackageComparator::new(&content);

    let source = SourcePackage::load(&options.srpm)?;
    info!(
        "{} declares {} build requirements",
        source.file_name(),
        source.build_requires().len()
    );

    let workdir = tempfile::Builder::new()
        .prefix("buildreq-prune.")
        .tempdir()?;
    let marker_dir = workdir.path().join("markers");
    fs::create_dir_all(&marker_dir)?;

    let uniqueext = format!("buildreq-prune-{}", std::process::id());
    let mut chroot = BuildRoot::new(&options.root, &uniqueext, marker_dir);

    let outcome = analyze(options, &source, &comparator, &mut chroot, workdir.path());

    chroot.teardown();
    if options.no_clean {
        let kept = workdir.keep();
        info!("workdir retained at {}", kept.display());
    }

    outcome
}

fn analyze(
    options: &RunOptions,
    source: &SourcePackage,
    comparator: &PackageComparator<'_>,
    chroot: &mut BuildRoot,
    work: &Path,
) -> Result<Option<String>> {
    let reference = work.join("reference");
    let control = work.join("reference-check");
    fs::create_dir_all(&reference)?;
    fs::create_dir_all(&control)?;

    info!("building reference packages");
    if !chroot.rebuild(source.path(), &reference, false, false)? {
        return Err(Error::ReferenceBuild(
            "initial reference build failed".to_string(),
        ));
    }

    info!("rebuilding once more to gate reproducibility");
    if !chroot.rebuild(source.path(), &control, false, false)? {
        return Err(Error::ReferenceBuild(
            "reproducibility check build failed".to_string(),
        ));
    }

    if !result_dirs_equal(comparator, &reference, &control)? {
        return Err(Error::NotReproducible);
    }
    info!("reference builds are reproducible");

    if options.reproduce_only {
        return Ok(None);
    }

    let probe_dir = work.join("probes");
    fs::create_dir_all(&probe_dir)?;

    let mut prober = ChrootProber {
        chroot,
        comparator,
        source,
        reference: &reference,
        probe_dir,
        offline: options.offline,
        sequence: 0,
    };
    let minimize_options = MinimizeOptions {
        assume_compose: options.assume_compose,
    };
    let result = minimize::minimize(source.build_requires(), &mut prober, &minimize_options)?;

    for broken in &result.breaking {
        debug!("breaking subset: {:?}", broken);
    }

    if result.removable.is_empty() {
        info!("no removable build requirements found");
        return Ok(None);
    }
    Ok(Some(format!(
        "{}:{}",
        source.file_name(),
        result.removable.join(", ")
    )))
}

/// Probes one candidate subset against the reference directory
struct ChrootProber<'a> {
    chroot: &'a mut BuildRoot,
    comparator: &'a PackageComparator<'a>,
    source: &'a SourcePackage,
    reference: &'a Path,
    probe_dir: PathBuf,
    offline: bool,
    sequence: u32,
}

impl Prober for ChrootProber<'_> {
    fn probe(&mut self, candidate: &Candidate) -> Result<ProbeOutcome> {
        self.sequence += 1;
        info!("probe {}: withholding {:?}", self.sequence, candidate);

        match self
            .chroot
            .provision_without(self.source.build_requires(), candidate)?
        {
            ProvisionOutcome::PulledIn => return Ok(ProbeOutcome::PulledIn),
            ProvisionOutcome::Ready => {}
        }

        let resultdir = self.probe_dir.join(format!("probe-{:03}", self.sequence));
        fs::create_dir_all(&resultdir)?;

        if !self
            .chroot
            .rebuild(self.source.path(), &resultdir, true, self.offline)?
        {
            info!("probe {}: rebuild failed", self.sequence);
            return Ok(ProbeOutcome::RebuildFailed);
        }

        if result_dirs_equal(self.comparator, self.reference, &resultdir)? {
            info!("probe {}: output equivalent to reference", self.sequence);
            Ok(ProbeOutcome::Equivalent)
        } else {
            info!("probe {}: output changed", self.sequence);
            Ok(ProbeOutcome::OutputChanged)
        }
    }
}
