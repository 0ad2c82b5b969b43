//! Integration tests for `ttb select`.

mod common;

use common::{Project, have_patch, ttb_fails, ttb_in, ttb_ok};
use ttb_select::{ContentDigest, Index, bundle_fingerprint};

#[test]
fn builds_bundle_with_overlay_and_index() {
    let p = Project::new();
    p.file("base/tex/latex/foo/foo.sty", "base foo");
    p.file("base/tex/latex/bar/bar.sty", "bar");
    p.file("include/foo.sty", "overlay foo");
    p.file("search-order", "/include//\n/texlive/tex/latex//\n");

    let stdout = ttb_ok(p.root(), &["select"]);
    assert!(stdout.contains("Summary"), "{stdout}");
    assert!(stdout.contains("files replaced:       1"), "{stdout}");

    assert_eq!(p.read(&p.out("content/include/foo.sty")), "overlay foo");
    assert!(!p.exists(&p.out("content/texlive/tex/latex/foo/foo.sty")));
    assert_eq!(
        p.read(&p.out("content/texlive/tex/latex/bar/bar.sty")),
        "bar"
    );

    let index = Index::parse(&p.read(&p.out("content/INDEX"))).unwrap();
    assert_eq!(
        index.candidates("foo.sty").collect::<Vec<_>>(),
        vec!["include/foo.sty"]
    );
    let fingerprint = bundle_fingerprint(index.hashed_pairs());
    assert_eq!(
        p.read(&p.out("content/SHA256SUM")),
        format!("{fingerprint}\n")
    );
    assert!(stdout.contains(&fingerprint.to_hex()));
}

#[test]
fn json_summary_is_machine_readable() {
    let p = Project::new();
    p.file("base/a/dup.tex", "one");
    p.file("base/b/dup.tex", "two");

    let stdout = ttb_ok(p.root(), &["select", "--format", "json"]);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(v["stats"]["clashes"], 1);
    assert_eq!(v["clashed_names"][0], "dup.tex");
    let fp = v["fingerprint"].as_str().unwrap();
    assert!(ContentDigest::from_hex(fp).is_some());
    assert!(p.exists(&p.out("clash-report")));
}

#[test]
fn rebuilding_into_populated_output_fails() {
    let p = Project::new();
    p.file("base/a.sty", "a");
    ttb_ok(p.root(), &["select"]);

    let stderr = ttb_fails(p.root(), &["select"]);
    assert!(stderr.contains("not empty"), "{stderr}");
}

#[test]
fn two_builds_have_the_same_fingerprint() {
    let p = Project::new();
    for i in 0..20 {
        p.file(&format!("base/pkg{}/f{i}.sty", i % 4), &format!("file {i}"));
    }
    p.file("include/extra.cfg", "cfg");

    ttb_ok(p.root(), &["select", "--output", "one"]);
    ttb_ok(p.root(), &["select", "--output", "two"]);
    assert_eq!(
        p.read("one/content/SHA256SUM"),
        p.read("two/content/SHA256SUM")
    );
    assert_eq!(p.read("one/content/INDEX"), p.read("two/content/INDEX"));
}

#[test]
fn cli_paths_override_config() {
    let p = Project::new();
    p.file("elsewhere/x.tex", "x");
    p.file("ov/y.tex", "y");

    ttb_ok(
        p.root(),
        &["select", "--base", "elsewhere", "--overlay", "ov", "-o", "custom"],
    );
    let listing = p.read("custom/listing");
    assert!(listing.contains("x.tex\n"));
    assert!(listing.contains("y.tex\n"));
}

#[test]
fn missing_base_is_reported() {
    let p = Project::new();
    p.file("bundle.toml", "[bundle]\nname = \"test\"\n");
    let stderr = ttb_fails(p.root(), &["select"]);
    assert!(stderr.contains("no base tree configured"), "{stderr}");
}

#[test]
fn bad_config_names_line() {
    let p = Project::new();
    p.file("bundle.toml", "[inputs]\nbase = \"base\"\nunknown = 1\n");
    let stderr = ttb_fails(p.root(), &["select"]);
    assert!(stderr.contains("bundle.toml"), "{stderr}");
    assert!(stderr.contains("line 3"), "{stderr}");
}

#[test]
fn invalid_ignore_rule_leaves_no_output() {
    let p = Project::new();
    p.file("base/a.sty", "a");
    p.file("ignore", "[unclosed\n");
    let stderr = ttb_fails(p.root(), &["select"]);
    assert!(stderr.contains("line 1"), "{stderr}");
    assert!(!p.exists(&p.out("content")));
}

#[test]
fn failing_patch_program_is_not_fatal() {
    let p = Project::new();
    p.file(
        "bundle.toml",
        "[bundle]\nname = \"test\"\n[inputs]\nbase = \"base\"\n[patch]\nprogram = \"false\"\n",
    );
    p.file("base/a.sty", "a\n");
    p.file("include/a.sty.diff", "irrelevant\n");

    let out = ttb_in(p.root(), &["select", "--format", "json"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["stats"]["patch_failures"], 1);
    assert_eq!(v["stats"]["patches_applied"], 0);
    assert_eq!(p.read(&p.out("content/texlive/a.sty")), "a\n");
}

#[test]
fn real_patch_is_applied_before_hashing() {
    if !have_patch() {
        eprintln!("skipping: no `patch` on PATH");
        return;
    }
    let p = Project::new();
    p.file("base/tex/foo.sty", "line one\nline two\n");
    p.file(
        "include/patches/foo.sty.diff",
        "--- a/foo.sty\n+++ b/foo.sty\n@@ -1,2 +1,2 @@\n line one\n-line two\n+line 2\n",
    );

    let stdout = ttb_ok(p.root(), &["select", "--format", "json"]);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(v["stats"]["patches_applied"], 1);

    let staged = p.read(&p.out("content/texlive/tex/foo.sty"));
    assert_eq!(staged, "line one\nline 2\n");
    let index = Index::parse(&p.read(&p.out("content/INDEX"))).unwrap();
    let hashes = p.read(&p.out("file-hashes"));
    assert!(hashes.contains(&format!(
        "texlive/tex/foo.sty\t{}",
        ContentDigest::of(staged.as_bytes())
    )));
    assert!(!index.contains("foo.sty.diff"));
}

#[test]
fn rejected_patch_leaves_no_stray_files() {
    if !have_patch() {
        eprintln!("skipping: no `patch` on PATH");
        return;
    }
    let p = Project::new();
    p.file("base/tex/foo.sty", "alpha\nbeta\n");
    p.file(
        "include/patches/foo.sty.diff",
        "--- a/foo.sty\n+++ b/foo.sty\n@@ -1,2 +1,2 @@\n gamma\n-delta\n+epsilon\n",
    );

    let stdout = ttb_ok(p.root(), &["select", "--format", "json"]);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(v["stats"]["patch_failures"], 1);
    assert_eq!(v["stats"]["patches_applied"], 0);

    assert_eq!(p.read(&p.out("content/texlive/tex/foo.sty")), "alpha\nbeta\n");
    assert!(!p.exists(&p.out("content/texlive/tex/foo.sty.rej")));
    assert!(!p.exists(&p.out("content/texlive/tex/foo.sty.orig")));
    let entries: Vec<_> = std::fs::read_dir(p.path(&p.out("content/texlive/tex")))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["foo.sty"]);
}
