use cachify::config::{self, AssetSource, CompressorKind};

const SAMPLE: &str = r#"
strict: true
logger:
  level: debug
server:
  addr: "127.0.0.1:8080"
  middleware:
    - name: recovery
    - name: cachify
      options:
        max_age: 600
assets:
  root: /srv/site
  prefix: https://cdn.example.com/s/
  watch: true
  assets:
    app.js: [/js/a.js, /js/b.js]
    site.css: /css/site.css
compressor:
  kind: gzip
  level: 9
"#;

#[test]
fn test_parse_full_config() {
    let (cfg, ignored) = config::parse(SAMPLE).unwrap();
    assert!(ignored.is_empty(), "{ignored:?}");
    assert!(cfg.strict);
    assert_eq!(cfg.logger.level, "debug");
    assert_eq!(cfg.server.addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.middleware.len(), 2);
    assert_eq!(cfg.server.middleware[1].name, "cachify");
    assert!(cfg.server.middleware[1].options.contains_key("max_age"));

    let assets = &cfg.assets;
    assert_eq!(assets.root.as_deref(), Some(std::path::Path::new("/srv/site")));
    assert_eq!(assets.prefix, "https://cdn.example.com/s/");
    assert!(assets.watch);
    assert!(!assets.development);
    let keys: Vec<&str> = assets.assets.keys().map(String::as_str).collect();
    assert_eq!(keys, ["app.js", "site.css"]);
    assert_eq!(
        assets.assets["app.js"],
        AssetSource::Many(vec!["/js/a.js".to_string(), "/js/b.js".to_string()])
    );
    assert_eq!(assets.assets["site.css"], AssetSource::One("/css/site.css".to_string()));

    assert_eq!(cfg.compressor.kind, CompressorKind::Gzip);
    assert_eq!(cfg.compressor.level, Some(9));
    cfg.validate().unwrap();
}

#[test]
fn test_defaults() {
    let (cfg, _) = config::parse("server:\n  addr: \":8080\"\n").unwrap();
    assert_eq!(cfg.assets.prefix, "/");
    assert!(cfg.assets.root.is_none());
    assert!(cfg.assets.map.is_empty());
    assert_eq!(cfg.compressor.kind, CompressorKind::Identity);
    assert!(cfg.server.middleware.is_empty());
}

#[test]
fn test_unknown_fields_are_reported() {
    let raw = "server:\n  addr: \":8080\"\n  colour: blue\nassets:\n  prefx: /s/\n";
    let (_, ignored) = config::parse(raw).unwrap();
    assert_eq!(ignored, ["server.colour", "assets.prefx"]);
}

#[test]
fn test_development_map_keeps_declared_order() {
    let raw = r#"
server:
  addr: ":8080"
assets:
  development: true
  map:
    /js/vendor/: /node_modules/
    /js/: /src/js/
"#;
    let (cfg, _) = config::parse(raw).unwrap();
    assert!(cfg.assets.development);
    let rules: Vec<(&str, &str)> = cfg
        .assets
        .map
        .iter()
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();
    assert_eq!(rules, [("/js/vendor/", "/node_modules/"), ("/js/", "/src/js/")]);
}

#[test]
fn test_validate_rejects_incomplete_config() {
    let (cfg, _) = config::parse("assets:\n  prefix: /s/\n").unwrap();
    assert!(cfg.validate().is_err());

    let (cfg, _) = config::parse("server:\n  addr: \":8080\"\ncompressor:\n  kind: command\n").unwrap();
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("compressor.command"));
}

#[test]
fn test_load_reports_missing_file() {
    let err = config::load(std::path::Path::new("/nonexistent/cachify.yaml")).unwrap_err();
    assert!(format!("{err:#}").contains("read config"));
}
