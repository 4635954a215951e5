//! 全局订阅器安装；独立测试二进制，不与 `tracing-test` 的全局订阅器冲突。

use relay_core::observability::init_tracing;

#[test]
fn repeated_installation_reports_the_first_outcome() {
    let first = init_tracing();
    assert!(first, "nothing else installs a global subscriber in this binary");
    assert_eq!(init_tracing(), first);
    tracing::info!(installed = first, "subscriber ready");
}
