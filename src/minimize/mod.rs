// src/minimize/mod.rs

//! Power-set search for jointly removable requirements
//!
//! The engine probes candidate subsets of the declared requirements,
//! classifying each as unneeded (the rebuild succeeded and the output
//! matched the reference) or breaking. Two monotonicity assumptions keep
//! the search out of exponential territory: removing more requirements
//! cannot fix a failing build, and a subset of a confirmed-unneeded set
//! is itself unneeded. A third, stronger assumption — that unneededness
//! composes across unions — is unsound in general and only applies
//! behind an explicit opt-in.
//!
//! Candidates are ordered sets of requirement strings; enumeration is
//! grouped by size with lexicographic tie-breaking, so a fixed input
//! always probes in the same order. The power set is never materialized.

use crate::error::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// A set of requirements hypothesized to be jointly removable
pub type Candidate = BTreeSet<String>;

/// Classification of one probe build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Build succeeded, output equivalent to the reference
    Equivalent,
    /// Build succeeded, output changed
    OutputChanged,
    /// The rebuild itself failed
    RebuildFailed,
    /// The candidate is dragged back in by the other requirements; the
    /// probe cannot judge it
    PulledIn,
}

/// Performs one candidate build-and-compare
///
/// The search only sees this seam, so it runs against a scripted prober
/// in tests and a mock-backed one in production.
pub trait Prober {
    fn probe(&mut self, candidate: &Candidate) -> Result<ProbeOutcome>;
}

/// Search options
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimizeOptions {
    /// Mark any candidate covered by the union of confirmed-unneeded
    /// sets as unneeded without building. Unsound: a joint removal can
    /// break even when each part is individually removable.
    pub assume_compose: bool,
}

/// Verdict sets, each kept as an antichain under inclusion
///
/// `unneeded` keeps maximal sets (a bigger confirmed set subsumes its
/// subsets); `breaking` keeps minimal sets (a smaller broken set
/// condemns its supersets).
#[derive(Debug, Default)]
pub struct Verdicts {
    unneeded: Vec<Candidate>,
    breaking: Vec<Candidate>,
}

impl Verdicts {
    /// True when some confirmed-unneeded set contains the candidate
    pub fn covered_unneeded(&self, candidate: &Candidate) -> bool {
        self.unneeded.iter().any(|set| candidate.is_subset(set))
    }

    /// True when the candidate contains a known-breaking subset
    pub fn blocked(&self, candidate: &Candidate) -> bool {
        self.breaking.iter().any(|set| set.is_subset(candidate))
    }

    pub fn note_unneeded(&mut self, candidate: Candidate) {
        if self.covered_unneeded(&candidate) {
            return;
        }
        self.unneeded.retain(|set| !set.is_subset(&candidate));
        self.unneeded.push(candidate);
    }

    pub fn note_breaking(&mut self, candidate: Candidate) {
        if self.blocked(&candidate) {
            return;
        }
        self.breaking.retain(|set| !candidate.is_subset(set));
        self.breaking.push(candidate);
    }

    /// Every requirement appearing in some confirmed-unneeded set
    pub fn union_unneeded(&self) -> BTreeSet<String> {
        self.unneeded.iter().flatten().cloned().collect()
    }
}

/// Search result
#[derive(Debug)]
pub struct Minimization {
    /// Maximal confirmed-unneeded subsets
    pub unneeded: Vec<Candidate>,
    /// Minimal breaking subsets
    pub breaking: Vec<Candidate>,
    /// Union of all confirmed-unneeded subsets, sorted
    pub removable: Vec<String>,
}

/// Search the power set of the declared requirements
///
/// Schedule: singletons first, then descending-size confirmation over
/// the unneeded singletons, then demand-driven extension with the
/// requirements the singleton phase had to defer.
pub fn minimize<P: Prober>(
    declared: &[String],
    prober: &mut P,
    options: &MinimizeOptions,
) -> Result<Minimization> {
    let mut verdicts = Verdicts::default();
    let mut undecided: Vec<String> = Vec::new();

    let mut names: Vec<String> = declared.to_vec();
    names.sort();
    names.dedup();

    if names.is_empty() {
        return Ok(finish(verdicts));
    }

    info!("probing {} requirements individually", names.len());
    for name in &names {
        let candidate: Candidate = std::iter::once(name.clone()).collect();
        match prober.probe(&candidate)? {
            ProbeOutcome::Equivalent => verdicts.note_unneeded(candidate),
            ProbeOutcome::OutputChanged | ProbeOutcome::RebuildFailed => {
                verdicts.note_breaking(candidate)
            }
            ProbeOutcome::PulledIn => {
                debug!("{} deferred: pulled in indirectly", name);
                undecided.push(name.clone());
            }
        }
    }

    // Joint confirmation, largest subsets first. A success covers every
    // subset, so the whole-set probe is usually the only build here.
    let singles: Vec<String> = verdicts.union_unneeded().into_iter().collect();
    if singles.len() > 1 {
        info!("confirming joint removal of {} requirements", singles.len());
        for size in (2..=singles.len()).rev() {
            for candidate in Combinations::new(&singles, size) {
                probe_candidate(&mut verdicts, prober, candidate, options, false)?;
            }
        }
    }

    // Extension with deferred requirements: each is only judgeable once
    // whatever pulls it in is itself withheld. Failures here are
    // informational and never enter the breaking set.
    if !undecided.is_empty() && !verdicts.unneeded.is_empty() {
        undecided.sort();
        info!(
            "extending {} confirmed subsets with {} deferred requirements",
            verdicts.unneeded.len(),
            undecided.len()
        );
        let bases: Vec<Candidate> = verdicts.unneeded.clone();
        for base in &bases {
            for size in 1..=undecided.len() {
                for extension in Combinations::new(&undecided, size) {
                    let mut candidate = base.clone();
                    candidate.extend(extension);
                    probe_candidate(&mut verdicts, prober, candidate, options, true)?;
                }
            }
        }
    }

    Ok(finish(verdicts))
}

fn probe_candidate<P: Prober>(
    verdicts: &mut Verdicts,
    prober: &mut P,
    candidate: Candidate,
    options: &MinimizeOptions,
    extension_phase: bool,
) -> Result<()> {
    if verdicts.covered_unneeded(&candidate) {
        return Ok(());
    }
    if verdicts.blocked(&candidate) {
        debug!("skipping {:?}: contains a breaking subset", candidate);
        return Ok(());
    }
    if options.assume_compose {
        let union = verdicts.union_unneeded();
        if candidate.is_subset(&union) {
            debug!("assuming {:?} composes from confirmed sets", candidate);
            verdicts.note_unneeded(candidate);
            return Ok(());
        }
    }

    match prober.probe(&candidate)? {
        ProbeOutcome::Equivalent => verdicts.note_unneeded(candidate),
        ProbeOutcome::PulledIn => {
            debug!("{:?} deferred: pulled in indirectly", candidate);
        }
        ProbeOutcome::OutputChanged | ProbeOutcome::RebuildFailed if extension_phase => {
            info!("extension {:?} did not hold; leaving unclassified", candidate);
        }
        ProbeOutcome::OutputChanged | ProbeOutcome::RebuildFailed => {
            verdicts.note_breaking(candidate)
        }
    }
    Ok(())
}

fn finish(verdicts: Verdicts) -> Minimization {
    let removable: Vec<String> = verdicts.union_unneeded().into_iter().collect();
    Minimization {
        unneeded: verdicts.unneeded,
        breaking: verdicts.breaking,
        removable,
    }
}

/// Size-k subsets of a sorted slice, in lexicographic order
struct Combinations<'a> {
    items: &'a [String],
    indices: Vec<usize>,
    done: bool,
}

impl<'a> Combinations<'a> {
    fn new(items: &'a [String], k: usize) -> Self {
        Self {
            items,
            indices: (0..k).collect(),
            done: k == 0 || k > items.len(),
        }
    }
}

impl Iterator for Combinations<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        if self.done {
            return None;
        }
        let subset: Candidate = self
            .indices
            .iter()
            .map(|&i| self.items[i].clone())
            .collect();

        let n = self.items.len();
        let k = self.indices.len();
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            if self.indices[i] + 1 <= n - (k - i) {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }
        Some(subset)
    }
}
