use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;

use paxd_core::ManifestError;
use tempfile::TempDir;

use super::*;

const MANIFEST: &str = "name: Demo\nauthor: tester\nversion: 1.2.0\ndescription: demo\nlicense: MIT\ninstall:\n  files: [main.py, lib/util.py]\n";

fn write_package(root: &Path, id: &str, manifest_name: &str, manifest: &str) {
    let dir = root.join("packages").join(id);
    fs::create_dir_all(dir.join("lib")).expect("must create package dir");
    fs::write(dir.join(manifest_name), manifest).expect("must write manifest");
    fs::write(dir.join("main.py"), "print('main')").expect("must write file");
    fs::write(dir.join("lib/util.py"), "print('util')").expect("must write file");
}

/// Serves `routes` over HTTP/1.1 until the test process exits; any other path
/// is a 404.
fn serve(routes: BTreeMap<&'static str, (u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("must bind");
    let addr = listener.local_addr().expect("must have address");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                continue;
            };
            let mut reader = BufReader::new(stream.try_clone().expect("must clone stream"));
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) | Err(_) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                }
            }
            let path = request_line.split_whitespace().nth(1).unwrap_or("/");
            let (status, body) = routes.get(path).copied().unwrap_or((404, "not found"));
            let reason = if status == 200 { "OK" } else { "Other" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

#[test]
fn registry_open_picks_client_by_location() {
    assert!(matches!(
        Registry::open("https://example.test/repo").expect("must open"),
        Registry::Http(_)
    ));
    assert!(matches!(
        Registry::open("/srv/paxd-repo").expect("must open"),
        Registry::Fs(_)
    ));

    let registry =
        Registry::open("optimised::https://example.test/repo/\n").expect("must open");
    assert_eq!(registry.location(), "https://example.test/repo");
}

#[test]
fn fs_registry_loads_package_yaml() {
    let root = TempDir::new().expect("tempdir");
    write_package(root.path(), "com.example.demo", "package.yaml", MANIFEST);
    let registry = FsRegistry::open(root.path());

    let manifest = registry
        .load_manifest("com.example.demo")
        .expect("must load")
        .expect("must exist");
    assert_eq!(manifest.name, "Demo");
    assert_eq!(manifest.install.files, vec!["main.py", "lib/util.py"]);
    assert_eq!(registry.package_ids().expect("ids"), vec!["com.example.demo"]);
}

#[test]
fn fs_registry_falls_back_to_paxd_yaml() {
    let root = TempDir::new().expect("tempdir");
    write_package(root.path(), "legacy", "paxd.yaml", MANIFEST);
    let registry = FsRegistry::open(root.path());

    assert!(registry.load_manifest("legacy").expect("must load").is_some());
    assert!(registry.load_manifest("missing").expect("must load").is_none());
}

const LEGACY_MANIFEST: &str = r#"{
    // legacy manifests carry comments
    "pkg_info": {
        "pkg_name": "Old Demo",
        "pkg_author": "tester",
        "pkg_version": "0.9.0",
        "pkg_description": "https://example.com/old-demo",
        "pkg_license": "MIT"
    },
    "install": {
        "include": ["main.py", "lib/util.py"], // installed in order
        "depend": ["pip:rich", "paxd:demo"]
    }
}"#;

#[test]
fn fs_registry_falls_back_to_legacy_jsonc() {
    let root = TempDir::new().expect("tempdir");
    write_package(root.path(), "old", "paxd", LEGACY_MANIFEST);
    let registry = FsRegistry::open(root.path());

    let manifest = registry
        .load_manifest("old")
        .expect("must load")
        .expect("must exist");
    assert_eq!(manifest.name, "Old Demo");
    assert_eq!(manifest.description, "https://example.com/old-demo");
    assert_eq!(manifest.install.files, vec!["main.py", "lib/util.py"]);
    assert_eq!(manifest.self_dependencies(), ["demo"]);
    assert_eq!(registry.package_ids().expect("ids"), vec!["old"]);
}

#[test]
fn yaml_manifest_wins_over_legacy_jsonc() {
    let root = TempDir::new().expect("tempdir");
    write_package(root.path(), "both", "paxd", LEGACY_MANIFEST);
    fs::write(root.path().join("packages/both/package.yaml"), MANIFEST)
        .expect("must write manifest");

    let manifest = FsRegistry::open(root.path())
        .load_manifest("both")
        .expect("must load")
        .expect("must exist");
    assert_eq!(manifest.name, "Demo");
}

#[test]
fn fs_registry_keeps_manifest_errors_typed() {
    let root = TempDir::new().expect("tempdir");
    write_package(
        root.path(),
        "broken",
        "package.yaml",
        &MANIFEST.replace("version: 1.2.0", "version: 1.2"),
    );
    let err = FsRegistry::open(root.path())
        .load_manifest("broken")
        .expect_err("must fail");
    assert!(matches!(
        err.downcast_ref::<ManifestError>(),
        Some(ManifestError::InvalidVersion(_))
    ));
}

#[test]
fn fs_registry_rejects_path_like_ids() {
    let root = TempDir::new().expect("tempdir");
    let registry = FsRegistry::open(root.path());
    assert!(registry.load_manifest("../etc").is_err());
}

#[test]
fn fs_registry_copies_nested_files() {
    let root = TempDir::new().expect("tempdir");
    write_package(root.path(), "demo", "package.yaml", MANIFEST);
    let out = TempDir::new().expect("tempdir");
    let destination = out.path().join("util.py");

    FsRegistry::open(root.path())
        .fetch_file("demo", "lib/util.py", &destination)
        .expect("must copy");
    assert_eq!(
        fs::read_to_string(&destination).expect("must read"),
        "print('util')"
    );

    let err = FsRegistry::open(root.path())
        .fetch_file("demo", "nope.py", &out.path().join("nope.py"))
        .expect_err("missing file must fail");
    assert!(err.to_string().contains("failed to copy"), "{err}");
}

#[test]
fn http_registry_builds_file_urls() {
    let registry = HttpRegistry::new("https://example.test/repo/").expect("client");
    assert_eq!(registry.base_url(), "https://example.test/repo");
    assert_eq!(
        registry.file_url("demo", "lib\\util.py"),
        "https://example.test/repo/packages/demo/lib/util.py"
    );
}

#[test]
fn http_registry_falls_back_and_downloads() {
    let base = serve(BTreeMap::from([
        ("/packages/demo/paxd.yaml", (200, MANIFEST)),
        ("/packages/demo/main.py", (200, "print('main')")),
        ("/packages/down/package.yaml", (500, "boom")),
        ("/packages/old/paxd", (200, LEGACY_MANIFEST)),
    ]));
    let registry = HttpRegistry::new(&base).expect("client");

    let manifest = registry
        .load_manifest("demo")
        .expect("must load")
        .expect("must exist");
    assert_eq!(manifest.version.to_string(), "1.2.0");
    assert!(registry.load_manifest("ghost").expect("must load").is_none());
    assert!(registry.load_manifest("down").is_err());
    let legacy = registry
        .load_manifest("old")
        .expect("must load")
        .expect("must exist");
    assert_eq!(legacy.version.to_string(), "0.9.0");

    let out = TempDir::new().expect("tempdir");
    let destination = out.path().join("main.py");
    registry
        .fetch_file("demo", "main.py", &destination)
        .expect("must download");
    assert_eq!(
        fs::read_to_string(&destination).expect("must read"),
        "print('main')"
    );
    assert!(!out.path().join("main.py.tmp").exists());

    let missing = out.path().join("missing.py");
    assert!(registry.fetch_file("demo", "missing.py", &missing).is_err());
    assert!(!missing.exists());
}
