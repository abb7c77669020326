//! Malformed config content fails with a parse error.

mod common;

use tsqa::configs::{Config, RecordsConfig};
use tsqa::Error;

fn write(dir: &std::path::Path, name: &str, text: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn unterminated_section_header() {
    let dir = common::temp_dir();
    let path = write(dir.path(), "bad.config", b"a 1\n[broken\nb 2\n");
    match Config::load(&path) {
        Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn invalid_utf8() {
    let dir = common::temp_dir();
    let path = write(dir.path(), "bin.config", &[0x66, 0x6f, 0xff, 0xfe, b'\n']);
    assert!(matches!(Config::load(&path), Err(Error::Parse { .. })));
}

#[test]
fn records_unknown_type_tag() {
    let dir = common::temp_dir();
    let path = write(
        dir.path(),
        "records.config",
        b"CONFIG proxy.config.http.server_ports STRING 8080\nCONFIG proxy.config.x BOOL 1\n",
    );
    match RecordsConfig::load(&path) {
        Err(Error::Parse { line, message, .. }) => {
            assert_eq!(line, 2);
            assert!(message.contains("BOOL"), "{message}");
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn records_bad_int_and_short_lines() {
    let dir = common::temp_dir();
    let bad_int = write(dir.path(), "a.config", b"CONFIG proxy.config.x INT many\n");
    assert!(matches!(RecordsConfig::load(&bad_int), Err(Error::Parse { .. })));

    let short = write(dir.path(), "b.config", b"CONFIG proxy.config.x INT\n");
    assert!(matches!(RecordsConfig::load(&short), Err(Error::Parse { .. })));

    let directive = write(dir.path(), "c.config", b"SETTING proxy.config.x INT 1\n");
    assert!(matches!(RecordsConfig::load(&directive), Err(Error::Parse { .. })));
}
