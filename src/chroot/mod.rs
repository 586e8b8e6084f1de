// src/chroot/mod.rs

//! Mock build-root orchestration
//!
//! Owns one isolated build root and drives mock against it: init,
//! package installs, rebuilds, and cleanup. Requirements are forced
//! absent with synthesized marker packages rather than by trusting the
//! dependency solver, so a requirement pulled in transitively is
//! distinguishable from one that is directly needed.

use crate::error::{Error, Result};
use crate::package::requirement_name;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Name stem for synthesized marker packages
const MARKER_PREFIX: &str = "buildreq-prune-marker";

/// Relational metadata carried by a marker package
#[derive(Debug, Default)]
pub struct MarkerRelations {
    pub provides: Vec<String>,
    pub conflicts: Vec<String>,
    pub obsoletes: Vec<String>,
}

/// Result of preparing a build root with a withheld requirement set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Root is ready for a no-clean rebuild
    Ready,
    /// The remaining requirements drag a withheld one back in; the
    /// candidate cannot be judged
    PulledIn,
}

/// One mock-managed build root
///
/// The root is identified by a profile name and a per-run unique suffix,
/// so concurrent runs never share chroot state. Cleanup (including the
/// orphan-process kill) runs on drop as well as on explicit teardown.
pub struct BuildRoot {
    profile: String,
    uniqueext: String,
    marker_dir: PathBuf,
    marker_seq: u32,
    torn_down: bool,
}

impl BuildRoot {
    pub fn new(profile: &str, uniqueext: &str, marker_dir: PathBuf) -> Self {
        Self {
            profile: profile.to_string(),
            uniqueext: uniqueext.to_string(),
            marker_dir,
            marker_seq: 0,
            torn_down: false,
        }
    }

    fn run(
        &self,
        phase: &'static str,
        configure: impl FnOnce(&mut Command),
    ) -> Result<std::process::Output> {
        let mut cmd = Command::new("mock");
        cmd.arg("-r")
            .arg(&self.profile)
            .arg("--uniqueext")
            .arg(&self.uniqueext);
        configure(&mut cmd);
        debug!("running {:?}", cmd);
        cmd.output().map_err(|e| Error::Chroot {
            phase,
            root: self.profile.clone(),
            detail: e.to_string(),
        })
    }

    /// Create a fresh root
    pub fn init(&self) -> Result<()> {
        let output = self.run("init", |cmd| {
            cmd.arg("--init");
        })?;
        if !output.status.success() {
            return Err(Error::Chroot {
                phase: "init",
                root: self.profile.clone(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// Install packages into the root
    ///
    /// An unresolvable set is a classification, not an error: returns
    /// false and leaves the interpretation to the caller.
    pub fn install(&self, specs: &[String]) -> Result<bool> {
        let output = self.run("install", |cmd| {
            cmd.arg("--install").args(specs);
        })?;
        if !output.status.success() {
            debug!(
                "install failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Synthesize a marker package and install it; returns the marker name
    pub fn add_marker(&mut self, stem: &str, relations: &MarkerRelations) -> Result<String> {
        let (name, path) = self.build_marker(stem, relations)?;
        let output = self.run("marker-install", |cmd| {
            cmd.arg("--install").arg(&path);
        })?;
        if !output.status.success() {
            return Err(Error::Chroot {
                phase: "marker-install",
                root: self.profile.clone(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(name)
    }

    /// Build a minimal binary package carrying only relational metadata
    ///
    /// Versioned requirement strings are reduced to their bare names:
    /// an unversioned Provides or Conflicts matches every version.
    fn build_marker(
        &mut self,
        stem: &str,
        relations: &MarkerRelations,
    ) -> Result<(String, PathBuf)> {
        self.marker_seq += 1;
        let name = format!("{}-{}-{}", MARKER_PREFIX, stem, self.marker_seq);

        let mut builder = rpm::PackageBuilder::new(
            &name,
            "0",
            "Public Domain",
            "noarch",
            "Relational pin used during build-requirement analysis",
        )
        .compression(rpm::CompressionType::Gzip);

        for req in &relations.provides {
            builder = builder.provides(rpm::Dependency::any(requirement_name(req)));
        }
        for req in &relations.conflicts {
            builder = builder.conflicts(rpm::Dependency::any(requirement_name(req)));
        }
        for req in &relations.obsoletes {
            builder = builder.obsoletes(rpm::Dependency::any(requirement_name(req)));
        }

        let package = builder.build().map_err(|e| Error::Marker {
            name: name.clone(),
            detail: e.to_string(),
        })?;

        let path = self.marker_dir.join(format!("{}-0.noarch.rpm", name));
        let mut file = File::create(&path)?;
        package.write(&mut file).map_err(|e| Error::Marker {
            name: name.clone(),
            detail: e.to_string(),
        })?;

        debug!("synthesized marker {} at {}", name, path.display());
        Ok((name, path))
    }

    /// Prepare the root with the withheld requirements forced absent
    ///
    /// 1. fresh root
    /// 2. a marker conflicting with every withheld requirement, so no
    ///    install can bring one back transitively
    /// 3. the declared requirements minus the withheld set; failure here
    ///    means the candidate is pulled in indirectly
    /// 4. a marker obsoleting the blocker and providing the withheld
    ///    names, satisfying the rebuilder's dependency pre-check
    pub fn provision_without(
        &mut self,
        declared: &[String],
        withheld: &BTreeSet<String>,
    ) -> Result<ProvisionOutcome> {
        self.init()?;

        let block = MarkerRelations {
            conflicts: withheld.iter().cloned().collect(),
            ..Default::default()
        };
        let block_name = self.add_marker("block", &block)?;

        let remaining: Vec<String> = declared
            .iter()
            .filter(|req| !withheld.contains(*req))
            .cloned()
            .collect();
        if !remaining.is_empty() && !self.install(&remaining)? {
            debug!("remaining requirements pull a withheld one back in");
            return Ok(ProvisionOutcome::PulledIn);
        }

        let satisfy = MarkerRelations {
            provides: withheld.iter().cloned().collect(),
            obsoletes: vec![block_name],
            ..Default::default()
        };
        self.add_marker("satisfy", &satisfy)?;

        Ok(ProvisionOutcome::Ready)
    }

    /// Rebuild the source package into resultdir
    ///
    /// Returns false on a rebuild failure; spawn problems are errors.
    pub fn rebuild(
        &self,
        srpm: &Path,
        resultdir: &Path,
        no_clean: bool,
        offline: bool,
    ) -> Result<bool> {
        let output = self.run("rebuild", |cmd| {
            cmd.arg("--rebuild")
                .arg(srpm)
                .arg("--resultdir")
                .arg(resultdir);
            if no_clean {
                cmd.arg("--no-clean");
            }
            if offline {
                cmd.arg("--offline");
            }
        })?;
        if !output.status.success() {
            debug!(
                "rebuild failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Clean the root and kill orphaned processes
    ///
    /// Runs on every exit path; failures are logged, not propagated.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        for flag in ["--clean", "--orphanskill"] {
            match self.run("teardown", |cmd| {
                cmd.arg(flag);
            }) {
                Ok(output) if !output.status.success() => {
                    warn!(
                        "mock {} failed: {}",
                        flag,
                        String::from_utf8_lossy(&output.stderr)
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("mock {} failed: {}", flag, e),
            }
        }
    }
}

impl Drop for BuildRoot {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_root(dir: &TempDir) -> BuildRoot {
        let mut root = BuildRoot::new("fedora-test", "test", dir.path().to_path_buf());
        // No mock available in tests; keep drop from invoking it
        root.torn_down = true;
        root
    }

    #[test]
    fn test_marker_carries_relations() {
        let dir = TempDir::new().unwrap();
        let mut root = test_root(&dir);

        let relations = MarkerRelations {
            provides: vec!["gcc".to_string(), "cmake >= 3.20".to_string()],
            conflicts: vec!["ninja-build".to_string()],
            obsoletes: vec!["old-marker".to_string()],
        };
        let (name, path) = root.build_marker("satisfy", &relations).unwrap();
        assert!(name.starts_with(MARKER_PREFIX));
        assert!(path.exists());

        let file = File::open(&path).unwrap();
        let mut reader = std::io::BufReader::new(file);
        let package = rpm::Package::parse(&mut reader).unwrap();

        let provides = package.metadata.get_provides().unwrap();
        assert!(provides.iter().any(|dep| dep.name == "gcc"));
        // Versioned requirement reduced to its bare name
        assert!(provides.iter().any(|dep| dep.name == "cmake"));

        let conflicts = package.metadata.get_conflicts().unwrap();
        assert!(conflicts.iter().any(|dep| dep.name == "ninja-build"));

        let obsoletes = package.metadata.get_obsoletes().unwrap();
        assert!(obsoletes.iter().any(|dep| dep.name == "old-marker"));
    }

    #[test]
    fn test_marker_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let mut root = test_root(&dir);

        let (first, _) = root
            .build_marker("block", &MarkerRelations::default())
            .unwrap();
        let (second, _) = root
            .build_marker("block", &MarkerRelations::default())
            .unwrap();
        assert_ne!(first, second);
    }
}
