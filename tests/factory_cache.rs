//! Base builds are cached per fingerprint and copied per environment.

mod common;

use tsqa::environment::{BuildRecipe, BuildStep, ConfigureFlags, EnvVars, Fingerprint};
use tsqa::Error;

#[test]
fn second_call_reuses_cached_build() {
    let dir = common::temp_dir();
    let (factory, source) = common::fake_factory(dir.path());
    let flags = ConfigureFlags::new().flag("enable-debug");
    let env = EnvVars::new();

    assert!(!factory.is_cached(&flags, &env));
    let first = factory.get_environment(&flags, &env).unwrap();
    assert_eq!(source.builds(), 1);
    assert!(factory.is_cached(&flags, &env));

    let second = factory.get_environment(&flags, &env).unwrap();
    assert_eq!(source.builds(), 1, "second call must not build");

    let a = &first.layout.prefix;
    let b = &second.layout.prefix;
    assert_ne!(a, b);
    assert!(!a.starts_with(b) && !b.starts_with(a));
    assert!(a.starts_with(factory.work_root()));
    assert!(first.layout.sysconfdir.join("records.config").is_file());
    assert!(second.layout.sysconfdir.join("remap.config").is_file());
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn copies_are_isolated_from_each_other_and_the_base() {
    let dir = common::temp_dir();
    let (factory, _source) = common::fake_factory(dir.path());
    let flags = ConfigureFlags::new();
    let env = EnvVars::new();

    let first = factory.get_environment(&flags, &env).unwrap();
    let second = factory.get_environment(&flags, &env).unwrap();
    std::fs::write(first.layout.sysconfdir.join("remap.config"), "changed\n").unwrap();

    let base = factory.base_prefix(&Fingerprint::compute(&flags, &env));
    let untouched = "map http://example.test/ http://127.0.0.1:8000/\n";
    assert_eq!(
        std::fs::read_to_string(second.layout.sysconfdir.join("remap.config")).unwrap(),
        untouched
    );
    assert_eq!(
        std::fs::read_to_string(base.join("etc/trafficserver/remap.config")).unwrap(),
        untouched
    );

    let link = first.layout.bindir.join("ts_link");
    assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
}

#[test]
fn different_parameters_build_separately() {
    let dir = common::temp_dir();
    let (factory, source) = common::fake_factory(dir.path());
    let env = EnvVars::new();

    factory.get_environment(&ConfigureFlags::new(), &env).unwrap();
    factory
        .get_environment(&ConfigureFlags::new().with("with-lua", "/opt/lua"), &env)
        .unwrap();
    assert_eq!(source.builds(), 2);
    assert_eq!(source.build_lines()[1], "--with-lua=/opt/lua");
}

#[test]
fn build_info_records_parameters() {
    let dir = common::temp_dir();
    let (factory, _source) = common::fake_factory(dir.path());
    let flags = ConfigureFlags::new().flag("enable-ccache");
    let env = EnvVars::new().set("CC", "cc");
    let environment = factory.get_environment(&flags, &env).unwrap();

    let info = factory.build_info(environment.fingerprint().unwrap()).unwrap();
    assert_eq!(info.configure, flags);
    assert_eq!(info.env, env);
    assert!(chrono::DateTime::parse_from_rfc3339(&info.built_at).is_ok());
}

#[test]
fn failing_build_is_build_error_and_not_cached() {
    let dir = common::temp_dir();
    let (factory, _source) = common::fake_factory(dir.path());
    let failing = factory.clone().with_recipe(BuildRecipe::new(vec![BuildStep::new(
        "sh",
        ["-c", "echo compiling; echo 'error: no compiler' >&2; exit 2"],
    )]));
    let flags = ConfigureFlags::new();
    let env = EnvVars::new();

    match failing.get_environment(&flags, &env) {
        Err(Error::Build { output, .. }) => {
            assert!(output.contains("compiling"), "{output}");
            assert!(output.contains("error: no compiler"), "{output}");
        }
        other => panic!("expected build error, got {other:?}"),
    }
    assert!(!failing.is_cached(&flags, &env));

    // A later good build replaces the partial one.
    factory.get_environment(&flags, &env).unwrap();
    assert!(factory.is_cached(&flags, &env));
}

#[test]
fn missing_build_tool_is_build_error() {
    let dir = common::temp_dir();
    let (factory, _source) = common::fake_factory(dir.path());
    let factory = factory.with_recipe(BuildRecipe::new(vec![BuildStep::new(
        "/nonexistent/tsqa-build-tool",
        Vec::<String>::new(),
    )]));
    let err = factory
        .get_environment(&ConfigureFlags::new(), &EnvVars::new())
        .unwrap_err();
    assert!(matches!(err, Error::Build { .. }), "{err}");
}

#[test]
fn skip_if_exists_step_is_skipped() {
    let dir = common::temp_dir();
    let (factory, source) = common::fake_factory(dir.path());
    let mut recipe = common::fake_recipe();
    recipe.steps.insert(
        0,
        BuildStep::new("sh", ["-c", "exit 1"])
            .in_source()
            .skip_if_exists("{source}/fake_build.sh"),
    );
    let factory = factory.with_recipe(recipe);
    factory
        .get_environment(&ConfigureFlags::new(), &EnvVars::new())
        .unwrap();
    assert_eq!(source.builds(), 1);
}
