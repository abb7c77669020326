//! Settings resolution: file, then environment overrides, then defaults.

mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use tsqa::environment::EnvironmentFactory;
use tsqa::settings::{expand_tilde, Settings, DEFAULT_TMP_DIR};
use tsqa::Error;

fn lookup(vars: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    move |k| map.get(k).cloned()
}

#[test]
fn defaults_without_overrides() {
    let s = Settings::resolve(lookup(&[])).unwrap();
    assert_eq!(s.tmp_dir, PathBuf::from(DEFAULT_TMP_DIR));
    assert_eq!(s.base_envs_dir, PathBuf::from(DEFAULT_TMP_DIR).join("base_envs"));
    assert_eq!(s.work_root, PathBuf::from(DEFAULT_TMP_DIR).join("envs"));
    assert_eq!(s.source_dir, expand_tilde("~/trafficserver"));
    assert_eq!(s.jobs, None);
}

#[test]
fn file_then_env_overrides() {
    let dir = common::temp_dir();
    let file = dir.path().join("tsqa.toml");
    std::fs::write(
        &file,
        "source_dir = \"/srv/ats\"\ntmp_dir = \"/var/tmp/qa\"\njobs = 4\n",
    )
    .unwrap();
    let config = file.to_string_lossy().into_owned();

    let s = Settings::resolve(lookup(&[("TSQA_CONFIG", config.clone())])).unwrap();
    assert_eq!(s.source_dir, PathBuf::from("/srv/ats"));
    assert_eq!(s.base_envs_dir, PathBuf::from("/var/tmp/qa/base_envs"));
    assert_eq!(s.jobs, Some(4));

    let s = Settings::resolve(lookup(&[
        ("TSQA_CONFIG", config),
        ("TSQA_TMP_DIR", "/scratch".to_string()),
    ]))
    .unwrap();
    assert_eq!(s.source_dir, PathBuf::from("/srv/ats"));
    assert_eq!(s.tmp_dir, PathBuf::from("/scratch"));

    let factory = EnvironmentFactory::from_settings(&s);
    assert_eq!(factory.base_envs_dir(), PathBuf::from("/scratch/base_envs").as_path());
    assert_eq!(factory.work_root(), PathBuf::from("/scratch/envs").as_path());
}

#[test]
fn bad_settings_file() {
    let dir = common::temp_dir();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        Settings::resolve(lookup(&[("TSQA_CONFIG", missing.to_string_lossy().into_owned())])),
        Err(Error::NotFound(_))
    ));

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "jobs = \"many\"\n").unwrap();
    assert!(matches!(
        Settings::resolve(lookup(&[("TSQA_CONFIG", bad.to_string_lossy().into_owned())])),
        Err(Error::Settings(_))
    ));
}

#[test]
fn tilde_expansion() {
    assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
    if let Some(dirs) = directories::BaseDirs::new() {
        assert_eq!(expand_tilde("~/src"), dirs.home_dir().join("src"));
    }
}
