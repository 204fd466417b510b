use std::fs;
use std::path::{Path, PathBuf};

use kiln::output::ArtifactKind;
use kiln::runtime::{ClientRuntime, NodePatch, ServerMessage};
use kiln::{BuildOptions, Builder, Config, KilnError, ModuleKind};
use tempfile::TempDir;

/// Copy the sample app into `<temp>/assets` so builds can write `../priv`
fn sample_app() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_app");
    let assets = temp.path().join("assets");
    kiln::static_copy::copy_tree(&fixture, &assets).unwrap();
    (temp, assets)
}

fn load(assets: &Path) -> Config {
    Config::load(Some(&assets.join("kiln.toml"))).unwrap()
}

#[tokio::test]
async fn test_sample_app_build() {
    let (temp, assets) = sample_app();
    let builder = Builder::new(load(&assets)).unwrap();

    let report = builder.build(&BuildOptions::default()).await.unwrap();

    assert_eq!(report.modules, 6);
    assert_eq!(report.static_files, 2);
    assert_eq!(report.artifacts.len(), 4);
    assert_eq!(report.artifacts[0].kind, ArtifactKind::Script);
    assert_eq!(report.artifacts[1].kind, ArtifactKind::Stylesheet);

    let priv_static = temp.path().join("priv/static");
    let script = fs::read_to_string(priv_static.join("js/app.js")).unwrap();
    let styles = fs::read_to_string(priv_static.join("css/app.css")).unwrap();

    // vendor code first, then the module registry, then the entry require
    let topbar = script.find("window.topbar").unwrap();
    let registry = script.find("function __kiln_define").unwrap();
    assert!(topbar < registry);
    assert!(script.trim_end().ends_with("__kiln_require(\"js/app.js\");\n})();"));

    // traversal order is preserved
    let app = script.find("__kiln_define(\"js/app.js\"").unwrap();
    let phoenix = script
        .find("__kiln_define(\"node_modules/phoenix/priv/static/phoenix.js\"")
        .unwrap();
    let live_view = script
        .find("__kiln_define(\"node_modules/phoenix_live_view/priv/static/phoenix_live_view.esm.js\"")
        .unwrap();
    let editor = script.find("__kiln_define(\"js/components/editor.vue\"").unwrap();
    let hooks = script.find("__kiln_define(\"js/hooks.js\"").unwrap();
    assert!(app < phoenix && phoenix < live_view && live_view < editor && editor < hooks);

    // stylesheets never become script modules
    assert!(!script.contains("__kiln_define(\"css/"));
    assert!(!script.contains("../css/app.css"));
    assert!(!script.contains("Entry point for the application bundle"));
    assert!(script.contains("exports.template = template;"));

    // import cycle between app.css and base.css is inlined once
    assert_eq!(styles.matches("margin: 0").count(), 1);
    assert!(!styles.contains("@import"));
    assert!(styles.contains("padding: 4.5rem"));
    assert!(styles.contains("color: #fd4f00"));
    assert!(styles.contains("-webkit-appearance: none"));
    assert!(styles.contains("-webkit-user-select: none"));
    assert!(styles.contains("min-height: 4.5rem"));
    assert!(styles.find(".container").unwrap() < styles.find(".editor").unwrap());

    assert!(priv_static.join("robots.txt").is_file());
    assert!(priv_static.join("images/logo.svg").is_file());
}

#[tokio::test]
async fn test_rebuild_is_deterministic() {
    let (temp, assets) = sample_app();
    let builder = Builder::new(load(&assets)).unwrap();
    let script = temp.path().join("priv/static/js/app.js");

    builder.build(&BuildOptions::default()).await.unwrap();
    let first = fs::read_to_string(&script).unwrap();
    builder.build(&BuildOptions::default()).await.unwrap();
    let second = fs::read_to_string(&script).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_minified_build_is_smaller() {
    let (temp, assets) = sample_app();
    let builder = Builder::new(load(&assets)).unwrap();
    let script = temp.path().join("priv/static/js/app.js");

    builder
        .build(&BuildOptions { entries: Vec::new(), minify: Some(false) })
        .await
        .unwrap();
    let plain = fs::metadata(&script).unwrap().len();

    builder
        .build(&BuildOptions { entries: Vec::new(), minify: Some(true) })
        .await
        .unwrap();
    let minified = fs::read_to_string(&script).unwrap();

    assert!((minified.len() as u64) < plain);
    assert!(minified.contains("__kiln_require"));
}

#[tokio::test]
async fn test_vendor_after_application_code() {
    let (temp, assets) = sample_app();
    let mut config = load(&assets);
    config.entries[0].vendor_position = kiln::config::VendorPosition::After;
    let builder = Builder::new(config).unwrap();

    builder.build(&BuildOptions::default()).await.unwrap();
    let script = fs::read_to_string(temp.path().join("priv/static/js/app.js")).unwrap();
    assert!(script.find("window.topbar").unwrap() > script.find("function __kiln_define").unwrap());
}

#[tokio::test]
async fn test_missing_import_fails_without_output() {
    let (temp, assets) = sample_app();
    fs::write(
        assets.join("js/hooks.js"),
        "import { missing } from \"./nowhere\";\nexport const hooks = {};\n",
    )
    .unwrap();
    let builder = Builder::new(load(&assets)).unwrap();

    let err = builder.build(&BuildOptions::default()).await.unwrap_err();
    match err {
        KilnError::Resolution { module, identifier, .. } => {
            assert_eq!(module, "js/hooks.js");
            assert_eq!(identifier, "./nowhere");
        }
        other => panic!("expected resolution error, got {:?}", other),
    }
    assert!(!temp.path().join("priv/static/js/app.js").exists());
}

#[tokio::test]
async fn test_malformed_component_is_transform_error() {
    let (temp, assets) = sample_app();
    fs::write(
        assets.join("js/components/editor.vue"),
        "<template><div></div></template>\n<script>\nexport default { data() { return {}; }\n</script>\n",
    )
    .unwrap();
    let builder = Builder::new(load(&assets)).unwrap();

    let err = builder.build(&BuildOptions::default()).await.unwrap_err();
    match err {
        KilnError::Transform { module, .. } => assert_eq!(module, "js/components/editor.vue"),
        other => panic!("expected transform error, got {:?}", other),
    }
    assert!(!temp.path().join("priv/static/js/app.js").exists());
    assert!(!temp.path().join("priv/static/css/app.css").exists());
}

#[tokio::test]
async fn test_static_overlap_is_config_error() {
    let (temp, assets) = sample_app();
    fs::create_dir_all(assets.join("static/js")).unwrap();
    fs::write(assets.join("static/js/app.js"), "// stale copy\n").unwrap();
    let builder = Builder::new(load(&assets)).unwrap();

    let err = builder.build(&BuildOptions::default()).await.unwrap_err();
    assert!(matches!(err, KilnError::Config { .. }));
    assert!(!temp.path().join("priv/static/robots.txt").exists());
}

#[test]
fn test_graph_of_sample_app() {
    let (_temp, assets) = sample_app();
    let builder = Builder::new(load(&assets)).unwrap();

    let graph = builder.graph("app").unwrap();
    let kinds: Vec<ModuleKind> = graph.modules().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ModuleKind::Script,
            ModuleKind::Stylesheet,
            ModuleKind::Script,
            ModuleKind::Script,
            ModuleKind::Component,
            ModuleKind::Script,
        ]
    );
    assert!(graph.dangling_edges().is_empty());

    let json = serde_json::to_value(&graph).unwrap();
    assert_eq!(json["modules"][0]["id"], "js/app.js");
    assert!(json["modules"][0].get("source").is_none());
}

#[test]
fn test_runtime_bootstrap_with_server_messages() {
    let config = kiln::config::RuntimeConfig::default();
    let (mut runtime, mut errors) = ClientRuntime::bootstrap(&config);

    let message = ServerMessage::parse(
        r#"{"kind":"patch","nodes":[
            {"id":"title","tag":"input","attributes":{"phx-hook":"Autofocusing"}},
            {"id":"body","tag":"div","attributes":{"class":"vue-editor"},"text":"Hello"},
            {"id":"oops","tag":"div","attributes":{"phx-hook":"Typo"}}
        ]}"#,
    )
    .unwrap();
    let summary = runtime.handle(message);

    assert_eq!(summary.hooks_mounted, 1);
    assert_eq!(summary.components_mounted, 1);
    assert_eq!(summary.errors, 1);
    assert!(runtime.document().get("title").unwrap().focused);
    assert_eq!(
        runtime.document().get("body").unwrap().rendered.as_deref(),
        Some("<textarea class=\"editor\">Hello</textarea>")
    );
    assert!(matches!(errors.try_recv().unwrap(), KilnError::UnknownHook { .. }));

    runtime.apply_patch(&[NodePatch::new("title", "input").attribute("phx-hook", "Autofocusing")]);
    assert!(runtime.mounted("body").is_none());
    assert_eq!(runtime.document().len(), 1);
}
