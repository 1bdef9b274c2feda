//! Orchestrating a pruning run: load, plan, report, confirm and vacuum.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::io::{BufRead, Write};

use storage::StorageBucket;
use tokio_util::sync::CancellationToken;

use crate::digest::Digest;
use crate::error::{PruneError, PruneResult};
use crate::graph::{GraphBuilder, RegistryGraph, RepositoryGraphInfo};
use crate::layout::Layout;
use crate::vacuum::{Vacuum, VacuumReport};

const PROMPT: &str = "Proceed with pruning? [y/n] ";

/// How a pruning run behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOptions {
    /// Remove repositories which have no manifest revisions.
    pub remove_empty: bool,

    /// Report only, never delete.
    pub dry_run: bool,

    /// Ask the operator before deleting.
    pub confirm: bool,

    /// List every object in the report, not just counts.
    pub verbose: bool,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            remove_empty: false,
            dry_run: false,
            confirm: true,
            verbose: false,
        }
    }
}

/// Everything a pruning run would delete, derived from a [`RegistryGraph`]
/// without touching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    /// Empty repositories to remove whole, sorted.
    pub empty_repositories: Vec<String>,

    /// Dirty repositories to clean, sorted. Empty repositories are never
    /// cleaned piecemeal: they are removed whole or left alone.
    pub dirty_repositories: Vec<String>,

    /// Blobs left without references, sorted.
    pub unreferenced_blobs: Vec<Digest>,
}

impl PrunePlan {
    /// Derive the plan for `graph`.
    ///
    /// When `remove_empty` is set, the references held by empty repositories
    /// are released on a copy of the blob counts, so blobs only they kept
    /// alive are planned for deletion too.
    pub fn new(graph: &RegistryGraph, remove_empty: bool) -> PruneResult<Self> {
        let dirty_repositories = graph
            .dirty_repositories
            .keys()
            .filter(|name| !graph.empty_repositories.contains_key(*name))
            .cloned()
            .collect();

        if !remove_empty {
            return Ok(Self {
                empty_repositories: Vec::new(),
                dirty_repositories,
                unreferenced_blobs: graph.blobs.get_unreferenced(),
            });
        }

        let released = graph.blobs.released(
            graph
                .empty_repositories
                .values()
                .flat_map(|info| info.retained.iter()),
        )?;

        Ok(Self {
            empty_repositories: graph.empty_repositories.keys().cloned().collect(),
            dirty_repositories,
            unreferenced_blobs: released.get_unreferenced(),
        })
    }

    /// Whether there is nothing to delete.
    pub fn is_empty(&self) -> bool {
        self.empty_repositories.is_empty()
            && self.dirty_repositories.is_empty()
            && self.unreferenced_blobs.is_empty()
    }
}

/// How a call to [`Pruner::prune`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Dry run, nothing was deleted.
    DryRun,
    /// There was nothing to delete.
    Clean,
    /// The operator declined, nothing was deleted.
    Declined,
    /// Deletions were carried out.
    Pruned(VacuumReport),
}

/// Drives a pruning run over one registry.
#[derive(Debug, Clone)]
pub struct Pruner {
    storage: StorageBucket,
    layout: Layout,
    options: PruneOptions,
    concurrency: usize,
    cancel: CancellationToken,
}

impl Pruner {
    /// Create a pruner for the registry at `layout` in `storage`.
    pub fn new(storage: StorageBucket, layout: Layout, options: PruneOptions) -> Self {
        Self {
            storage,
            layout,
            options,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Scan up to `concurrency` repositories at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Use `cancel` to stop scanning and deleting.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A token which cancels this pruner's work.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The options this pruner runs with.
    pub fn options(&self) -> &PruneOptions {
        &self.options
    }

    /// Scan the registry. Read-only.
    pub async fn load_registry_graph(&self) -> PruneResult<RegistryGraph> {
        GraphBuilder::new(self.storage.clone(), self.layout.clone())
            .with_concurrency(self.concurrency)
            .with_cancellation(self.cancel.clone())
            .build()
            .await
    }

    /// Derive what this pruner would delete from `graph`.
    pub fn plan(&self, graph: &RegistryGraph) -> PruneResult<PrunePlan> {
        PrunePlan::new(graph, self.options.remove_empty)
    }

    /// Write a report of everything orphaned in `graph` to `out`.
    ///
    /// Returns whether anything would be deleted. The output depends only on
    /// `graph` and the options, so reporting twice gives the same text.
    pub fn report_orphans(&self, graph: &RegistryGraph, out: &mut dyn Write) -> PruneResult<bool> {
        let plan = self.plan(graph)?;
        let verbose = self.options.verbose;

        writeln!(
            out,
            "Scanned {} repositories and {} blobs",
            graph.total_repositories,
            graph.blobs.len()
        )?;

        if self.options.remove_empty {
            writeln!(out, "Empty repositories: {}", plan.empty_repositories.len())?;
            for name in &plan.empty_repositories {
                if let Some(info) = graph.empty_repositories.get(name) {
                    report_empty_repository(out, info, verbose)?;
                }
            }
        } else if !graph.empty_repositories.is_empty() {
            writeln!(
                out,
                "Empty repositories: {} (kept, use --remove-empty to remove)",
                graph.empty_repositories.len()
            )?;
        }

        writeln!(out, "Dirty repositories: {}", plan.dirty_repositories.len())?;
        for name in &plan.dirty_repositories {
            if let Some(info) = graph.dirty_repositories.get(name) {
                report_repository(out, info, verbose)?;
            }
        }

        section(out, "", "Unreferenced blobs", &plan.unreferenced_blobs, verbose)?;
        section(out, "", "Void blobs", &graph.void_blobs, verbose)?;

        Ok(!plan.is_empty())
    }

    /// Delete everything orphaned in `graph`, unless this is a dry run or the
    /// operator declines.
    ///
    /// The confirmation prompt is written to `out` and answered from `input`.
    pub async fn prune(
        &self,
        graph: &RegistryGraph,
        input: &mut dyn BufRead,
        out: &mut dyn Write,
    ) -> PruneResult<PruneOutcome> {
        if self.options.dry_run {
            tracing::info!("dry run, nothing deleted");
            return Ok(PruneOutcome::DryRun);
        }

        let plan = self.plan(graph)?;
        if plan.is_empty() {
            return Ok(PruneOutcome::Clean);
        }

        if self.options.confirm && !confirm(input, out)? {
            tracing::info!("pruning declined");
            return Ok(PruneOutcome::Declined);
        }

        Vacuum::new(self.storage.clone(), self.layout.clone())
            .with_cancellation(self.cancel.clone())
            .prune(&plan, graph)
            .await
            .map(PruneOutcome::Pruned)
    }
}

/// Ask the operator whether to proceed until they answer yes or no.
///
/// Answers are trimmed and case-insensitive. Running out of input before an
/// answer is an error.
pub fn confirm(input: &mut dyn BufRead, out: &mut dyn Write) -> PruneResult<bool> {
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Err(PruneError::ConfirmationAborted);
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            answer => tracing::debug!(answer, "unrecognized answer"),
        }
    }
}

/// An empty repository being removed, with every digest its removal folds in.
fn report_empty_repository(
    out: &mut dyn Write,
    info: &RepositoryGraphInfo,
    verbose: bool,
) -> PruneResult<()> {
    writeln!(out, "  {}:", info.name)?;

    let released: BTreeSet<&Digest> = info
        .retained
        .iter()
        .chain(info.dangling_layers.iter())
        .collect();
    section(out, "    ", "released digests", released, verbose)?;
    report_details(out, "    ", info, verbose)
}

fn report_repository(
    out: &mut dyn Write,
    info: &RepositoryGraphInfo,
    verbose: bool,
) -> PruneResult<()> {
    writeln!(out, "{}:", info.name)?;

    section(out, "  ", "unreferenced layers", &info.layers.get_unreferenced(), verbose)?;
    section(out, "  ", "unlinked layers", &info.unlinked_layers, verbose)?;
    report_details(out, "  ", info, verbose)
}

/// Categories an empty repository can share with a non-empty one.
fn report_details(
    out: &mut dyn Write,
    indent: &str,
    info: &RepositoryGraphInfo,
    verbose: bool,
) -> PruneResult<()> {
    section(out, indent, "dangling layers", &info.dangling_layers, verbose)?;

    for (label, manifests) in [
        ("dangling manifests", &info.dangling_manifests),
        ("unlinked manifests", &info.unlinked_manifests),
    ] {
        if manifests.is_empty() {
            continue;
        }
        writeln!(out, "{indent}{label}: {}", manifests.len())?;
        if verbose {
            for (digest, manifest) in manifests {
                writeln!(out, "{indent}  {digest}")?;
                for signature in &manifest.signatures {
                    writeln!(out, "{indent}    signature {signature}")?;
                }
            }
        }
    }

    let signed: Vec<_> = info.manifests_with_dangling_signatures().collect();
    if !signed.is_empty() {
        let count: usize = signed.iter().map(|m| m.dangling_signatures.len()).sum();
        writeln!(out, "{indent}dangling signatures: {count}")?;
        if verbose {
            for manifest in signed {
                for signature in &manifest.dangling_signatures {
                    writeln!(out, "{indent}  {signature} (on {})", manifest.digest)?;
                }
            }
        }
    }

    if !info.dangling_tags.is_empty() {
        writeln!(out, "{indent}dangling tags: {}", info.dangling_tags.len())?;
        if verbose {
            for (tag, target) in &info.dangling_tags {
                match target {
                    Some(digest) => writeln!(out, "{indent}  {tag} -> {digest}")?,
                    None => writeln!(out, "{indent}  {tag} (no link)")?,
                }
            }
        }
    }

    section(out, indent, "invalid tags", &info.invalid_tags, verbose)?;
    section(out, indent, "invalid links", &info.invalid_links, verbose)?;
    Ok(())
}

fn section<'i, I, T>(
    out: &mut dyn Write,
    indent: &str,
    label: &str,
    items: I,
    verbose: bool,
) -> PruneResult<()>
where
    I: IntoIterator<Item = &'i T>,
    I::IntoIter: ExactSizeIterator,
    T: Display + 'i,
{
    let items = items.into_iter();
    if items.len() == 0 {
        return Ok(());
    }

    writeln!(out, "{indent}{label}: {}", items.len())?;
    if verbose {
        for item in items {
            writeln!(out, "{indent}  {item}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn confirm_reprompts_until_answered() {
        let mut input = Cursor::new("maybe\n  YES \n");
        let mut out: Vec<u8> = Vec::new();
        assert!(confirm(&mut input, &mut out).unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), PROMPT.repeat(2));
    }

    #[test]
    fn confirm_declines() {
        let mut input = Cursor::new("N\n");
        let mut out: Vec<u8> = Vec::new();
        assert!(!confirm(&mut input, &mut out).unwrap());
    }

    #[test]
    fn confirm_end_of_input() {
        let mut input = Cursor::new("what\n");
        let mut out: Vec<u8> = Vec::new();
        assert!(matches!(
            confirm(&mut input, &mut out),
            Err(PruneError::ConfirmationAborted)
        ));
    }

    #[test]
    fn empty_graph_has_empty_plan() {
        let graph = RegistryGraph::default();
        assert!(PrunePlan::new(&graph, true).unwrap().is_empty());
        assert!(PrunePlan::new(&graph, false).unwrap().is_empty());
    }
}
