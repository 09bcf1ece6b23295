//! バーチャルホスト名の合成
//!
//! 記述子の `virtualHost` が最優先。無ければルートドメインから
//! `{name}-{safe_branch}.{domain}` を合成する（`name` 未指定なら
//! `{safe_branch}.{domain}`）。`masterAsRoot` が有効で master ブランチ
//! なら、ルートドメイン自体も併記する。

use shipment_core::{DeployConfig, DeployTarget};

pub fn compose_virtual_host(
    config: &DeployConfig,
    target: &DeployTarget,
    root_domain: Option<&str>,
) -> Option<String> {
    if let Some(host) = &config.virtual_host {
        return Some(host.clone());
    }

    let domain = root_domain?;
    let safe_branch = target.safe_branch();
    let mut host = match &config.name {
        Some(name) => format!("{}-{}.{}", name, safe_branch, domain),
        None => format!("{}.{}", safe_branch, domain),
    };

    if config.master_as_root && target.branch == "master" {
        host.push(',');
        host.push_str(domain);
    }

    Some(host)
}
