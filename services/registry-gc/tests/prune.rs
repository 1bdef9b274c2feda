mod common;

use std::collections::BTreeSet;
use std::io::Cursor;

use camino::Utf8Path;
use common::{report, unattended, verbose, Fixture};
use registry_gc::{
    BlobRefCounter, Digest, PruneError, PruneOptions, PruneOutcome, PrunePlan, RefCountError,
    RepositoryScanner,
};

const PROMPT: &str = "Proceed with pruning? [y/n] ";

async fn prune(fixture: &Fixture, options: PruneOptions, input: &str) -> (PruneOutcome, String) {
    let pruner = fixture.pruner(options);
    let graph = pruner.load_registry_graph().await.unwrap();
    let mut out: Vec<u8> = Vec::new();
    let outcome = pruner
        .prune(&graph, &mut Cursor::new(input.to_owned()), &mut out)
        .await
        .unwrap();
    (outcome, String::from_utf8(out).unwrap())
}

#[tokio::test]
async fn lib_app_scenario() {
    let fixture = Fixture::new();
    let m1 = fixture.push("lib/app", Some("latest"), &[b"A", b"B"]).await;
    let m2 = fixture.push("lib/app", None, &[b"C"]).await;
    let d = fixture.blob(b"D").await;
    let [a, b] = [&m1.layers[0], &m1.layers[1]];
    let c = &m2.layers[0];

    let graph = fixture.graph().await;
    assert_eq!(graph.total_repositories, 1);

    let info = &graph.dirty_repositories["lib/app"];
    assert_eq!(info.manifests["latest"].digest, m1.manifest);
    assert_eq!(info.manifests["latest"].tag.as_deref(), Some("latest"));
    assert!(info.unlinked_manifests.contains_key(&m2.manifest));
    assert!(info.dangling_manifests.is_empty());
    assert!(info.layers.get_unreferenced().is_empty());
    assert_eq!(info.layers.count(a), Some(1));
    assert_eq!(info.layers.count(c), Some(1));
    assert_eq!(info.unlinked_layers, BTreeSet::from([c.clone()]));

    let plan = PrunePlan::new(&graph, false).unwrap();
    let mut expected = vec![c.clone(), d.clone(), m2.manifest.clone()];
    expected.sort();
    assert_eq!(plan.unreferenced_blobs, expected);
    assert_eq!(plan.dirty_repositories, vec!["lib/app".to_owned()]);
    for live in [a, b, &m1.manifest] {
        assert!(graph.blobs.count(live).unwrap() >= 1);
    }

    let pruner = fixture.pruner(verbose());
    let (dirty, text) = report(&pruner, &graph);
    assert!(dirty);
    assert!(text.contains("lib/app:"));
    assert!(text.contains("unlinked manifests: 1"));
    assert!(text.contains("unlinked layers: 1"));
    assert!(text.contains("Unreferenced blobs: 3"));
    assert!(text.contains(c.as_str()));
    assert!(text.contains(d.as_str()));
}

#[tokio::test]
async fn tagged_layers_are_reachable() {
    let fixture = Fixture::new();
    let mut exclusive = Vec::new();
    for repo in ["r0", "team/r1", "team/nested/r2"] {
        for tag in ["v1", "v2"] {
            let image = fixture
                .push(
                    repo,
                    Some(tag),
                    &[b"shared", format!("{repo}-{tag}-1").as_bytes(), format!("{repo}-{tag}-2").as_bytes()],
                )
                .await;
            if repo == "r0" {
                exclusive.extend(image.layers[1..].iter().cloned());
                exclusive.push(image.manifest);
            }
        }
    }
    let shared = Digest::sha256(b"shared");

    let graph = fixture.graph().await;
    assert_eq!(graph.total_repositories, 3);
    assert!(graph.dirty_repositories.is_empty());
    assert!(graph.blobs.get_unreferenced().is_empty());
    assert_eq!(graph.blobs.count(&shared), Some(3));
    for digest in &exclusive {
        assert!(graph.blobs.count(digest).unwrap() >= 1);
    }

    // Dropping r0's references, as untagging it would, orphans exactly its own blobs.
    let storage = fixture.storage();
    let info = RepositoryScanner::new(&storage, &fixture.layout)
        .scan("r0", &graph.blobs)
        .await
        .unwrap();
    let released = graph.blobs.released(&info.retained).unwrap();
    let mut expected = exclusive.clone();
    expected.sort();
    assert_eq!(released.get_unreferenced(), expected);

    // And untagging it in storage does the same.
    fixture.remove(fixture.layout.tags("r0")).await;
    let graph = fixture.graph().await;
    let plan = PrunePlan::new(&graph, false).unwrap();
    assert_eq!(plan.unreferenced_blobs, expected);
    assert_eq!(graph.dirty_repositories["r0"].unlinked_manifests.len(), 2);
}

#[tokio::test]
async fn report_is_idempotent() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    fixture.push("lib/app", None, &[b"B"]).await;
    let d = fixture.blob(b"D").await;
    fixture.layer_link("lib/empty", &d).await;

    let graph = fixture.graph().await;
    for options in [verbose(), unattended(true), PruneOptions::default()] {
        let pruner = fixture.pruner(options);
        let first = report(&pruner, &graph);
        let second = report(&pruner, &graph);
        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn blob_referenced_elsewhere_is_kept() {
    let fixture = Fixture::new();
    fixture.push("live", Some("latest"), &[b"shared"]).await;
    let stale = fixture.push("stale", None, &[b"shared", b"stale only"]).await;
    fixture.push("stale", Some("latest"), &[b"other"]).await;
    let shared = Digest::sha256(b"shared");

    let graph = fixture.graph().await;
    let info = &graph.dirty_repositories["stale"];
    assert!(info.unlinked_layers.contains(&shared));
    assert!(info.unlinked_manifests.contains_key(&stale.manifest));

    for remove_empty in [false, true] {
        let plan = PrunePlan::new(&graph, remove_empty).unwrap();
        assert!(!plan.unreferenced_blobs.contains(&shared));
        assert!(plan.unreferenced_blobs.contains(&stale.manifest));
    }

    let (outcome, _) = prune(&fixture, unattended(false), "").await;
    assert!(matches!(outcome, PruneOutcome::Pruned(_)));
    assert!(fixture.blob_exists(&shared).await);
    assert!(
        !fixture.link_exists(fixture.layout.layer_dir("stale", &shared))
            .await
    );
    assert!(fixture.link_exists(fixture.layout.layer_dir("live", &shared)).await);
}

#[tokio::test]
async fn removing_empty_repositories_cascades_to_blobs() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    let d = fixture.blob(b"only in empty").await;
    fixture.layer_link("lib/empty", &d).await;

    let graph = fixture.graph().await;
    assert!(graph.empty_repositories.contains_key("lib/empty"));
    assert_eq!(graph.blobs.count(&d), Some(1));

    let kept = PrunePlan::new(&graph, false).unwrap();
    assert!(kept.unreferenced_blobs.is_empty());
    assert!(kept.empty_repositories.is_empty());
    let (dirty, text) = report(&fixture.pruner(verbose()), &graph);
    assert!(!dirty);
    assert!(!text.contains(d.as_str()));

    let removed = PrunePlan::new(&graph, true).unwrap();
    assert_eq!(removed.unreferenced_blobs, vec![d.clone()]);
    assert_eq!(removed.empty_repositories, vec!["lib/empty".to_owned()]);
    let options = PruneOptions {
        remove_empty: true,
        ..verbose()
    };
    let (dirty, text) = report(&fixture.pruner(options), &graph);
    assert!(dirty);
    assert!(text.contains("Empty repositories: 1"));
    assert!(text.contains(d.as_str()));

    // The authoritative counts are untouched by planning.
    assert_eq!(graph.blobs.count(&d), Some(1));

    let (outcome, _) = prune(&fixture, unattended(true), "").await;
    let PruneOutcome::Pruned(vacuumed) = outcome else {
        panic!("expected pruning, got {outcome:?}");
    };
    assert_eq!(vacuumed.repositories, 1);
    assert_eq!(vacuumed.blobs, 1);
    assert!(!fixture.blob_exists(&d).await);
    assert!(!fixture.link_exists(fixture.layout.layer_dir("lib/empty", &d)).await);

    let graph = fixture.graph().await;
    assert_eq!(graph.total_repositories, 1);
    assert!(PrunePlan::new(&graph, true).unwrap().is_empty());
}

#[tokio::test]
async fn removing_empty_repositories_reports_their_dangling_layers() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    let d = Digest::sha256(b"never stored");
    fixture.layer_link("lib/empty", &d).await;

    let graph = fixture.graph().await;
    assert!(graph.empty_repositories["lib/empty"].dangling_layers.contains(&d));

    let (dirty, text) = report(&fixture.pruner(verbose()), &graph);
    assert!(!dirty);
    assert!(!text.contains(d.as_str()), "{text}");

    let options = PruneOptions {
        remove_empty: true,
        ..verbose()
    };
    let (dirty, text) = report(&fixture.pruner(options), &graph);
    assert!(dirty);
    assert!(text.contains("Empty repositories: 1"), "{text}");
    assert!(text.contains(d.as_str()), "{text}");

    // Left alone unless removal was asked for.
    let (outcome, _) = prune(&fixture, unattended(false), "").await;
    assert_eq!(outcome, PruneOutcome::Clean);
    assert!(fixture.link_exists(fixture.layout.layer_dir("lib/empty", &d)).await);

    let (outcome, _) = prune(&fixture, unattended(true), "").await;
    let PruneOutcome::Pruned(vacuumed) = outcome else {
        panic!("expected pruning, got {outcome:?}");
    };
    assert_eq!(vacuumed.repositories, 1);
    assert!(!fixture.link_exists(fixture.layout.layer_dir("lib/empty", &d)).await);
}

#[tokio::test]
async fn tampered_manifest_keeps_every_layer() {
    let fixture = Fixture::new();
    let image = fixture.push("lib/app", Some("latest"), &[b"A", b"B"]).await;
    let empty = fixture.manifest_blob(&[]).await;
    let content = fixture
        .storage()
        .get_content(&fixture.layout.blob_data(&empty))
        .await
        .unwrap();
    fixture
        .put(fixture.layout.blob_data(&image.manifest), &content)
        .await;

    let graph = fixture.graph().await;
    assert!(!graph.dirty_repositories.contains_key("lib/app"));
    for layer in &image.layers {
        assert_eq!(graph.blobs.count(layer), Some(1));
    }
}

#[tokio::test]
async fn releasing_more_than_retained_is_a_consistency_error() {
    let fixture = Fixture::new();
    let d = fixture.blob(b"layer").await;
    fixture.layer_link("lib/empty", &d).await;

    let mut graph = fixture.graph().await;
    assert_eq!(
        graph.blobs.released([&d, &d]),
        Err(RefCountError::Underflow { digest: d.clone() })
    );

    let mut corrupted = BlobRefCounter::new();
    corrupted.register(d.clone());
    graph.blobs = corrupted;

    let error = PrunePlan::new(&graph, true).unwrap_err();
    assert!(matches!(
        error,
        PruneError::Consistency(RefCountError::Underflow { .. })
    ));
    assert!(PrunePlan::new(&graph, false).is_ok());
}

#[tokio::test]
async fn declined_confirmation_changes_nothing() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    fixture.push("lib/app", None, &[b"B"]).await;

    let options = PruneOptions {
        remove_empty: true,
        ..PruneOptions::default()
    };
    let (outcome, out) = prune(&fixture, options, "maybe\nno\n").await;
    assert_eq!(outcome, PruneOutcome::Declined);
    assert_eq!(out, PROMPT.repeat(2));
    assert!(fixture.driver.mutations().is_empty());

    let (outcome, out) = prune(&fixture, options, " Y \n").await;
    assert!(matches!(outcome, PruneOutcome::Pruned(_)));
    assert_eq!(out, PROMPT);
    assert!(!fixture.driver.deletions().is_empty());
}

#[tokio::test]
async fn confirmation_needs_an_answer() {
    let fixture = Fixture::new();
    fixture.push("lib/app", None, &[b"A"]).await;

    let pruner = fixture.pruner(PruneOptions::default());
    let graph = pruner.load_registry_graph().await.unwrap();
    let error = pruner
        .prune(&graph, &mut Cursor::new("maybe\n"), &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    assert!(matches!(error, PruneError::ConfirmationAborted));
    assert!(fixture.driver.mutations().is_empty());
}

#[tokio::test]
async fn dry_run_never_mutates() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    fixture.push("lib/app", None, &[b"B"]).await;
    let d = fixture.blob(b"D").await;
    fixture.layer_link("lib/empty", &d).await;
    fixture
        .put(fixture.layout.tag_current_link("lib/app", "gone"), b"garbage")
        .await;

    for remove_empty in [false, true] {
        for confirm in [false, true] {
            for verbose in [false, true] {
                let options = PruneOptions {
                    remove_empty,
                    dry_run: true,
                    confirm,
                    verbose,
                };
                let pruner = fixture.pruner(options);
                let graph = pruner.load_registry_graph().await.unwrap();
                let (dirty, _) = report(&pruner, &graph);
                assert!(dirty);

                let outcome = pruner
                    .prune(&graph, &mut Cursor::new("y\n"), &mut Vec::<u8>::new())
                    .await
                    .unwrap();
                assert_eq!(outcome, PruneOutcome::DryRun);
            }
        }
    }

    assert_eq!(fixture.driver.mutations(), Vec::new());
}

#[tokio::test]
async fn failed_deletions_are_collected() {
    let fixture = Fixture::new();
    for repo in ["a", "b"] {
        fixture.push(repo, Some("latest"), &[b"live"]).await;
    }
    let stuck = fixture.push("a", None, &[b"a-old"]).await;
    let freed = fixture.push("b", None, &[b"b-old"]).await;
    fixture
        .driver
        .fail_deletes_under(fixture.layout.revision_dir("a", &stuck.manifest));

    let pruner = fixture.pruner(unattended(false));
    let graph = pruner.load_registry_graph().await.unwrap();
    let error = pruner
        .prune(&graph, &mut Cursor::new(""), &mut Vec::<u8>::new())
        .await
        .unwrap_err();

    let PruneError::Vacuum { report, failures } = error else {
        panic!("expected vacuum failure, got {error:?}");
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].object.contains(&format!("a@{}", stuck.manifest)));
    assert_eq!(report.manifests, 1);
    assert_eq!(report.layers, 2);
    assert_eq!(report.blobs, 0);

    // Independent deletions went ahead, blob deletion did not.
    assert!(
        !fixture.link_exists(fixture.layout.revision_dir("b", &freed.manifest))
            .await
    );
    assert!(!fixture.link_exists(fixture.layout.layer_dir("a", &stuck.layers[0])).await);
    assert!(fixture.blob_exists(&freed.manifest).await);
    let blobs = fixture.layout.blobs();
    assert!(
        fixture
            .driver
            .deletions()
            .iter()
            .all(|path| !Utf8Path::new(path).starts_with(&blobs))
    );
}

#[tokio::test]
async fn invalid_tags_take_precedence_over_dangling() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    let missing = Digest::sha256(b"never pushed");
    let layout = &fixture.layout;

    fixture.tag("lib/app", ".hidden", &missing).await;
    fixture.tag("lib/app", "gone", &missing).await;
    fixture
        .put(layout.tag_current_link("lib/app", "garbage"), b"sha256:nope")
        .await;
    fixture
        .put(layout.tag_index_dir("lib/app", "unlinked", &missing).join("link"), missing.as_str().as_bytes())
        .await;

    let graph = fixture.graph().await;
    let info = &graph.dirty_repositories["lib/app"];
    assert_eq!(info.invalid_tags, vec![".hidden".to_owned(), "garbage".to_owned()]);
    assert_eq!(info.dangling_tags.len(), 2);
    assert_eq!(info.dangling_tags["gone"], Some(missing.clone()));
    assert_eq!(info.dangling_tags["unlinked"], None);
    assert_eq!(info.manifests.keys().collect::<Vec<_>>(), vec!["latest"]);

    let (outcome, _) = prune(&fixture, unattended(false), "").await;
    let PruneOutcome::Pruned(vacuumed) = outcome else {
        panic!("expected pruning, got {outcome:?}");
    };
    assert_eq!(vacuumed.tags, 4);
    for tag in [".hidden", "gone", "garbage", "unlinked"] {
        assert!(!fixture.exists(layout.tag_current_link("lib/app", tag)).await);
    }
    assert!(fixture.exists(layout.tag_current_link("lib/app", "latest")).await);
    assert!(fixture.graph().await.dirty_repositories.is_empty());
}

#[tokio::test]
async fn void_blobs_are_reported_not_deleted() {
    let fixture = Fixture::new();
    let layout = &fixture.layout;
    let blobs = layout.blobs();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;

    let bad_hex = blobs.join("sha256/zz/not-hex");
    let bad_algorithm = blobs.join("md5");
    let no_data = Digest::sha256(b"no data");
    let wrong_prefix = Digest::sha256(b"wrong prefix");
    let misplaced = blobs.join("sha256/00").join(wrong_prefix.hex());

    fixture.put(bad_hex.join("data"), b"x").await;
    fixture.put(bad_algorithm.join("ab/abcd/data"), b"x").await;
    fixture.put(layout.blob_dir(&no_data).join("partial"), b"x").await;
    fixture.put(misplaced.join("data"), b"x").await;
    fixture.layer_link("lib/app", &no_data).await;

    let graph = fixture.graph().await;
    let expected: BTreeSet<_> = [
        bad_hex.clone(),
        bad_algorithm.clone(),
        layout.blob_dir(&no_data),
        misplaced.clone(),
    ]
    .into_iter()
    .collect();
    assert_eq!(graph.void_blobs, expected);
    assert!(!graph.blobs.contains(&no_data));
    assert!(graph.dirty_repositories["lib/app"].dangling_layers.contains(&no_data));

    let (dirty, text) = report(&fixture.pruner(verbose()), &graph);
    assert!(dirty);
    assert!(text.contains("Void blobs: 4"));
    assert!(text.contains(bad_hex.as_str()));

    let (outcome, _) = prune(&fixture, unattended(true), "").await;
    assert!(matches!(outcome, PruneOutcome::Pruned(_)));
    for path in &expected {
        assert!(
            fixture
                .driver
                .deletions()
                .iter()
                .all(|deleted| !path.starts_with(deleted.as_str())),
            "{path} was deleted"
        );
    }
    assert!(fixture.exists(bad_hex.join("data")).await);
    assert!(fixture.exists(misplaced.join("data")).await);
    assert!(!fixture.link_exists(layout.layer_dir("lib/app", &no_data)).await);
}

#[tokio::test]
async fn index_manifests_keep_children_alive() {
    let fixture = Fixture::new();
    let amd64 = fixture.push("lib/multi", None, &[b"amd64 layer"]).await;
    let arm64 = fixture.push("lib/multi", None, &[b"arm64 layer"]).await;
    let index = fixture
        .push_index("lib/multi", "latest", &[&amd64.manifest, &arm64.manifest])
        .await;

    let graph = fixture.graph().await;
    assert!(graph.dirty_repositories.is_empty());
    assert!(graph.blobs.get_unreferenced().is_empty());

    let storage = fixture.storage();
    let info = RepositoryScanner::new(&storage, &fixture.layout)
        .scan("lib/multi", &graph.blobs)
        .await
        .unwrap();
    assert_eq!(info.manifests["latest"].digest, index);
    assert_eq!(
        info.referenced_manifests.keys().collect::<BTreeSet<_>>(),
        BTreeSet::from([&amd64.manifest, &arm64.manifest])
    );
    assert!(info.unlinked_manifests.is_empty());
    assert!(info.unlinked_layers.is_empty());
    assert!(!info.is_dirty());
}

#[tokio::test]
async fn dangling_signatures_on_live_manifests() {
    let fixture = Fixture::new();
    let image = fixture.push("lib/signed", Some("latest"), &[b"A"]).await;
    let present = fixture.blob(b"good signature").await;
    let missing = Digest::sha256(b"lost signature");
    fixture.signature("lib/signed", &image.manifest, &present).await;
    fixture.signature("lib/signed", &image.manifest, &missing).await;

    let graph = fixture.graph().await;
    let info = &graph.dirty_repositories["lib/signed"];
    assert_eq!(info.manifests["latest"].dangling_signatures, vec![missing.clone()]);
    assert!(info.retained.contains(&present));
    assert!(graph.blobs.get_unreferenced().is_empty());

    let (outcome, _) = prune(&fixture, unattended(false), "").await;
    let PruneOutcome::Pruned(vacuumed) = outcome else {
        panic!("expected pruning, got {outcome:?}");
    };
    assert_eq!(vacuumed.signatures, 1);
    let layout = &fixture.layout;
    assert!(
        !fixture
            .exists(layout.signature_dir("lib/signed", &image.manifest, &missing).join("link"))
            .await
    );
    assert!(
        fixture
            .exists(layout.signature_dir("lib/signed", &image.manifest, &present).join("link"))
            .await
    );
    assert!(fixture.blob_exists(&present).await);
}

#[tokio::test]
async fn prune_leaves_a_clean_registry() {
    let fixture = Fixture::new();
    let old = fixture.push("lib/app", Some("latest"), &[b"base", b"old"]).await;
    let new = fixture.push("lib/app", Some("latest"), &[b"base", b"new"]).await;
    let layout = &fixture.layout;
    assert!(fixture.link_exists(layout.tag_index_dir("lib/app", "latest", &old.manifest)).await);

    let (outcome, _) = prune(&fixture, unattended(false), "").await;
    let PruneOutcome::Pruned(vacuumed) = outcome else {
        panic!("expected pruning, got {outcome:?}");
    };
    assert_eq!(vacuumed.manifests, 1);
    assert_eq!(vacuumed.layers, 1);
    assert_eq!(vacuumed.blobs, 2);

    assert!(!fixture.link_exists(layout.revision_dir("lib/app", &old.manifest)).await);
    assert!(!fixture.link_exists(layout.tag_index_dir("lib/app", "latest", &old.manifest)).await);
    assert!(fixture.link_exists(layout.tag_index_dir("lib/app", "latest", &new.manifest)).await);
    assert!(!fixture.blob_exists(&old.layers[1]).await);
    for digest in new.layers.iter().chain([&new.manifest]) {
        assert!(fixture.blob_exists(digest).await);
    }

    let graph = fixture.graph().await;
    assert!(graph.dirty_repositories.is_empty());
    assert!(PrunePlan::new(&graph, true).unwrap().is_empty());

    let (outcome, _) = prune(&fixture, unattended(false), "").await;
    assert_eq!(outcome, PruneOutcome::Clean);
}

#[tokio::test]
async fn cancelled_before_scanning() {
    let fixture = Fixture::new();
    fixture.push("lib/app", Some("latest"), &[b"A"]).await;

    let pruner = fixture.pruner(PruneOptions::default());
    pruner.cancellation().cancel();
    let error = pruner.load_registry_graph().await.unwrap_err();
    assert!(matches!(error, PruneError::Cancelled));
}

#[tokio::test]
async fn cancelled_vacuum_reports_partial_progress() {
    let fixture = Fixture::new();
    fixture.push("a", None, &[b"a-old"]).await;
    fixture.push("b", None, &[b"b-old"]).await;

    let pruner = fixture.pruner(unattended(false));
    let graph = pruner.load_registry_graph().await.unwrap();
    fixture.driver.cancel_after_delete(pruner.cancellation());

    let error = pruner
        .prune(&graph, &mut Cursor::new(""), &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    let PruneError::VacuumCancelled { report, failures } = error else {
        panic!("expected cancellation, got {error:?}");
    };
    assert_eq!(report.total(), 1);
    assert_eq!(report.manifests, 1);
    assert!(failures.is_empty());
    assert_eq!(fixture.driver.deletions().len(), 1);
}

#[tokio::test]
async fn local_storage_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(dir.path()).unwrap();
    let fixture = Fixture::local(root);

    let live = fixture.push("lib/app", Some("latest"), &[b"A"]).await;
    let stale = fixture.push("lib/app", None, &[b"B"]).await;
    let d = fixture.blob(b"only in empty").await;
    fixture.layer_link("lib/empty", &d).await;

    let (outcome, _) = prune(&fixture, unattended(true), "").await;
    let PruneOutcome::Pruned(vacuumed) = outcome else {
        panic!("expected pruning, got {outcome:?}");
    };
    assert_eq!(vacuumed.repositories, 1);
    assert_eq!(vacuumed.blobs, 3);
    assert!(!fixture.blob_exists(&stale.manifest).await);
    assert!(fixture.blob_exists(&live.manifest).await);

    let graph = fixture.graph().await;
    assert!(graph.dirty_repositories.is_empty());
    assert!(graph.void_blobs.is_empty());
    assert!(PrunePlan::new(&graph, true).unwrap().is_empty());
}
