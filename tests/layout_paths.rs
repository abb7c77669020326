//! Layout directories derive from the prefix.

use std::path::PathBuf;
use tsqa::layout::Layout;

#[test]
fn derives_everything_from_prefix() {
    let layout = Layout::new("/tmp/tsqa/envs/env-abc");
    assert_eq!(
        layout.sysconfdir,
        PathBuf::from("/tmp/tsqa/envs/env-abc/etc/trafficserver")
    );
    assert_eq!(layout.bindir, PathBuf::from("/tmp/tsqa/envs/env-abc/bin"));
    assert_eq!(
        layout.logdir,
        PathBuf::from("/tmp/tsqa/envs/env-abc/var/log/trafficserver")
    );
    assert_eq!(
        layout.runtimedir,
        PathBuf::from("/tmp/tsqa/envs/env-abc/var/trafficserver")
    );
    assert!(layout.contains(&layout.logdir));
    assert_eq!(layout, Layout::new(layout.prefix.clone()));
}
