use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::anyhow;
use paxd_core::{Backend, ManifestError, PackageManifest};

use super::*;

fn manifest(name: &str, deps: &str) -> PackageManifest {
    let deps = if deps.is_empty() { " {}\n" } else { deps };
    let content = format!(
        "name: {name}\nauthor: tester\nversion: 1.0.0\ndescription: test\nlicense: MIT\ninstall:\n  files: [{name}.txt]\n  dependencies:{deps}"
    );
    PackageManifest::from_yaml_str(&content).expect("manifest must parse")
}

fn registry(entries: &[(&str, &str)]) -> BTreeMap<String, PackageManifest> {
    entries
        .iter()
        .map(|(name, deps)| (name.to_string(), manifest(name, deps)))
        .collect()
}

fn resolve(
    root: &str,
    available: &BTreeMap<String, PackageManifest>,
) -> Result<InstallPlan, ResolveError> {
    let root_manifest = available.get(root).expect("root must exist").clone();
    resolve_install_plan(root, &root_manifest, |id| Ok(available.get(id).cloned()))
}

#[test]
fn package_without_self_dependencies_is_a_single_level() {
    let available = registry(&[("app", "\n    pip: [rich, requests]\n    npm: [left-pad]\n")]);
    let plan = resolve("app", &available).expect("must resolve");

    assert_eq!(plan.levels.len(), 1);
    assert_eq!(plan.install_order(), vec!["app"]);
    assert_eq!(
        plan.levels[0].backend_batches,
        vec![
            BackendBatch {
                backend: Backend::Pip,
                ids: vec!["rich".to_string(), "requests".to_string()],
            },
            BackendBatch {
                backend: Backend::Npm,
                ids: vec!["left-pad".to_string()],
            },
        ]
    );
}

#[test]
fn dependencies_are_ordered_before_dependents() {
    let available = registry(&[
        ("app", "\n    paxd: [lib, util]\n"),
        ("lib", "\n    paxd: [base]\n"),
        ("util", "\n    paxd: [base]\n"),
        ("base", "\n    pip: [rich]\n"),
    ]);
    let plan = resolve("app", &available).expect("must resolve");

    assert_eq!(plan.install_order(), vec!["base", "lib", "util", "app"]);
    let depths = plan
        .levels
        .iter()
        .map(|level| {
            (
                level.depth,
                level
                    .packages
                    .iter()
                    .map(|package| package.package_id.as_str())
                    .collect::<Vec<_>>(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        depths,
        vec![(0, vec!["base"]), (1, vec!["lib", "util"]), (2, vec!["app"])]
    );
    assert_eq!(plan.root_manifest().map(|m| m.name.as_str()), Some("app"));
}

#[test]
fn siblings_follow_declaration_order() {
    let available = registry(&[
        ("app", "\n    paxd: [zeta, alpha]\n"),
        ("zeta", ""),
        ("alpha", ""),
    ]);
    let plan = resolve("app", &available).expect("must resolve");
    assert_eq!(plan.install_order(), vec!["zeta", "alpha", "app"]);
}

#[test]
fn each_self_dependency_is_fetched_once() {
    let available = registry(&[
        ("app", "\n    paxd: [lib, util]\n"),
        ("lib", "\n    paxd: [base]\n"),
        ("util", "\n    paxd: [base, lib]\n"),
        ("base", ""),
    ]);
    let calls = RefCell::new(BTreeMap::<String, usize>::new());
    let root = available["app"].clone();
    resolve_install_plan("app", &root, |id| {
        *calls.borrow_mut().entry(id.to_string()).or_default() += 1;
        Ok(available.get(id).cloned())
    })
    .expect("must resolve");

    let calls = calls.into_inner();
    assert_eq!(calls.len(), 3);
    assert!(calls.values().all(|count| *count == 1), "{calls:?}");
    assert!(!calls.contains_key("app"));
}

#[test]
fn identical_inputs_produce_identical_plans() {
    let available = registry(&[
        ("app", "\n    paxd: [b, a]\n    pip: [rich]\n"),
        ("a", "\n    pip: [requests]\n"),
        ("b", "\n    npm: [left-pad]\n"),
    ]);
    let first = resolve("app", &available).expect("must resolve");
    let second = resolve("app", &available).expect("must resolve");
    assert_eq!(first, second);
    assert_eq!(first.operations(), second.operations());
}

#[test]
fn two_package_cycle_names_both_ids() {
    let available = registry(&[("a", "\n    paxd: [b]\n"), ("b", "\n    paxd: [a]\n")]);
    let err = resolve("a", &available).expect_err("cycle must fail");

    match &err {
        ResolveError::Cycle { path } => assert_eq!(path, &["a", "b", "a"]),
        other => panic!("unexpected error: {other}"),
    }
    let message = err.to_string();
    assert!(message.contains('a') && message.contains('b'), "{message}");
}

#[test]
fn cycle_path_starts_at_the_repeated_package() {
    let available = registry(&[
        ("app", "\n    paxd: [x]\n"),
        ("x", "\n    paxd: [y]\n"),
        ("y", "\n    paxd: [z]\n"),
        ("z", "\n    paxd: [x]\n"),
    ]);
    let err = resolve("app", &available).expect_err("cycle must fail");
    assert!(
        matches!(&err, ResolveError::Cycle { path } if path == &["x", "y", "z", "x"]),
        "{err}"
    );
}

#[test]
fn self_reference_is_a_one_node_cycle() {
    let available = registry(&[("app", "\n    paxd: [app]\n")]);
    let err = resolve("app", &available).expect_err("cycle must fail");
    assert!(
        matches!(&err, ResolveError::Cycle { path } if path == &["app", "app"]),
        "{err}"
    );
}

#[test]
fn missing_self_dependency_names_requester() {
    let available = registry(&[("app", "\n    paxd: [lib]\n"), ("lib", "\n    paxd: [ghost]\n")]);
    let err = resolve("app", &available).expect_err("must fail");
    match err {
        ResolveError::Unresolved { missing, requester } => {
            assert_eq!(missing, "ghost");
            assert_eq!(requester, "lib");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn invalid_fetched_manifest_names_package() {
    let root = manifest("app", "\n    paxd: [broken]\n");
    let err = resolve_install_plan("app", &root, |_| {
        Err(anyhow::Error::new(ManifestError::MissingField("license")))
    })
    .expect_err("must fail");
    match err {
        ResolveError::InvalidManifest { package_id, source } => {
            assert_eq!(package_id, "broken");
            assert_eq!(source, ManifestError::MissingField("license"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn lookup_failures_are_reported() {
    let root = manifest("app", "\n    paxd: [lib]\n");
    let err = resolve_install_plan("app", &root, |_| Err(anyhow!("connection refused")))
        .expect_err("must fail");
    assert!(matches!(err, ResolveError::Lookup { ref package_id, .. } if package_id == "lib"));
}

#[test]
fn backend_dependencies_are_scheduled_at_first_needing_level() {
    let available = registry(&[
        ("app", "\n    paxd: [lib]\n    pip: [rich, click]\n"),
        ("lib", "\n    pip: [rich]\n"),
    ]);
    let plan = resolve("app", &available).expect("must resolve");

    assert_eq!(plan.levels[0].backend_batches[0].ids, vec!["rich"]);
    assert_eq!(plan.levels[1].backend_batches[0].ids, vec!["click"]);
}

#[test]
fn same_id_under_different_backends_is_distinct() {
    let available = registry(&[("app", "\n    pip: [left-pad]\n    npm: [left-pad]\n")]);
    let plan = resolve("app", &available).expect("must resolve");
    assert_eq!(plan.levels[0].backend_batches.len(), 2);
}

#[test]
fn pruning_keeps_root_and_drops_exclusive_backend_dependencies() {
    let available = registry(&[
        ("app", "\n    paxd: [lib]\n    pip: [click]\n"),
        ("lib", "\n    pip: [rich]\n"),
    ]);
    let plan = resolve("app", &available).expect("must resolve");
    let pruned = plan.without_packages(|id| id == "lib" || id == "app");

    assert_eq!(pruned.install_order(), vec!["app"]);
    assert_eq!(pruned.levels.len(), 1);
    assert_eq!(pruned.levels[0].backend_batches[0].ids, vec!["click"]);
}

#[test]
fn operations_flatten_levels_in_order() {
    let root = PackageManifest::from_yaml_str(
        "name: app\nauthor: t\nversion: 1.0.0\ndescription: d\nlicense: MIT\ninstall:\n  files: [main.py]\n  dependencies:\n    pip: [rich]\n  firstrun: true\n  main_executable: main.py\n  command_alias: app\n",
    )
    .expect("manifest must parse");
    let plan = resolve_install_plan("app", &root, |_| Ok(None)).expect("must resolve");

    assert_eq!(
        plan.operations(),
        vec![
            PlanOperation::InstallBackendBatch {
                depth: 0,
                backend: Backend::Pip,
                ids: vec!["rich".to_string()],
            },
            PlanOperation::StageFiles {
                depth: 0,
                package_id: "app".to_string(),
                files: vec!["main.py".to_string()],
            },
            PlanOperation::WriteMarker {
                depth: 0,
                package_id: "app".to_string(),
                event: LifecycleEvent::FirstRun,
            },
            PlanOperation::RegisterAlias {
                depth: 0,
                package_id: "app".to_string(),
                alias: "app".to_string(),
                target: "main.py".to_string(),
            },
        ]
    );
}
