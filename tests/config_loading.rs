// tests/config_loading.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, ShareConfigBuilder};

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use sharenotify::cli::CliArgs;
use sharenotify::config::{load_and_validate, load_from_path};
use sharenotify::{resolve_targets, ChangeMask, NotifyError};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_shares_with_defaults_and_overrides() {
    let file = write_config(
        r#"
        [notify]
        backend = "poll"
        [notify.options]
        poll_interval = "1s"

        [share.public]
        path = "/export/public"
        filter = ["created", "deleted"]
        [share.public.options]
        poll_interval = "100ms"

        [share.home]
        path = "/export/home"
        backend = "inotify"
        recursive = true
        "#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.share.len(), 2);

    let public = &cfg.share["public"];
    assert_eq!(public.filter, ChangeMask::CREATED | ChangeMask::DELETED);
    let scope = cfg.scope_for(public);
    assert_eq!(scope.backend.as_deref(), Some("poll"));
    assert_eq!(scope.options["poll_interval"], "100ms");

    let home = &cfg.share["home"];
    assert!(home.recursive);
    assert_eq!(home.filter, ChangeMask::ALL);
    assert_eq!(cfg.scope_for(home).backend.as_deref(), Some("inotify"));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_from_path("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, NotifyError::Io(_)));
}

#[test]
fn malformed_toml_and_bad_intervals_are_rejected() {
    let file = write_config("[share.a\npath = 1");
    assert!(matches!(load_and_validate(file.path()), Err(NotifyError::Toml(_))));

    let file = write_config(
        "[share.a]\npath = \"/a\"\n[share.a.options]\npoll_interval = \"fast\"\n",
    );
    assert!(matches!(load_and_validate(file.path()), Err(NotifyError::Config(_))));

    let file = write_config("[notify]\nbackend = \"poll\"\n");
    assert!(matches!(load_and_validate(file.path()), Err(NotifyError::Config(_))));
}

#[test]
fn cli_flags_override_configured_shares() {
    let file = write_config(
        "[share.public]\npath = \"/export/public\"\nbackend = \"inotify\"\n",
    );
    let args = CliArgs::try_parse_from([
        "sharenotify",
        "--config",
        file.path().to_str().unwrap(),
        "--backend",
        "poll",
        "--poll-interval",
        "250ms",
        "--recursive",
    ])
    .unwrap();

    let targets = resolve_targets(&args).unwrap();
    assert_eq!(targets.len(), 1);
    let target = &targets[0];
    assert_eq!(target.name, "public");
    assert_eq!(target.path, PathBuf::from("/export/public"));
    assert!(target.recursive);
    assert_eq!(target.scope.backend.as_deref(), Some("poll"));
    assert_eq!(target.scope.options["poll_interval"], "250ms");
}

#[test]
fn cli_paths_bypass_the_config_file() {
    let args = CliArgs::try_parse_from([
        "sharenotify",
        "/srv/a",
        "/srv/b",
        "--filter",
        "modified",
    ])
    .unwrap();

    let targets = resolve_targets(&args).unwrap();
    let paths: Vec<_> = targets.iter().map(|t| t.path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]);
    assert!(targets.iter().all(|t| t.filter == ChangeMask::MODIFIED));
    assert!(targets.iter().all(|t| t.scope.backend.is_none()));

    let args = CliArgs::try_parse_from(["sharenotify", "/srv/a", "--filter", "sometimes"]).unwrap();
    assert!(resolve_targets(&args).is_err());
}

#[test]
fn builders_produce_validated_configs() {
    let cfg = ConfigFileBuilder::new()
        .with_default_backend("poll")
        .with_default_option("poll_interval", "500ms")
        .with_share(
            "docs",
            ShareConfigBuilder::new("/export/docs")
                .recursive(true)
                .filter(ChangeMask::RENAMED)
                .option("max_roots", "4")
                .build(),
        )
        .build();

    let scope = cfg.scope_for(&cfg.share["docs"]);
    assert_eq!(scope.options.len(), 2);
    assert_eq!(scope.backend.as_deref(), Some("poll"));
}

#[test]
fn no_paths_and_no_config_reads_the_default_file() {
    let args = CliArgs::try_parse_from(["sharenotify"]).unwrap();
    let err = resolve_targets(&args).unwrap_err();
    assert!(format!("{err:#}").contains("sharenotify.toml"));
}
