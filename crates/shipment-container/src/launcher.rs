//! 実行引数の合成とレプリカ起動
//!
//! 記述子の `dockerargs` にデプロイ識別用の環境変数とラベルを
//! 合成し、Docker API のコンテナ設定へ変換して scale 個のレプリカを
//! 起動する。記述子側の値が優先され、注入値は欠けている所だけを埋める。

use crate::error::{ContainerError, Result};
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use serde_json::Value;
use shipment_core::{
    DeployTarget, LABEL_BRANCH, LABEL_DEPLOY, LABEL_DEPLOY_VALUE, LABEL_ORG, LABEL_REPO,
};
use std::collections::HashMap;
use tracing::{info, warn};

/// 起動済みレプリカ
#[derive(Debug, Clone)]
pub struct Launched {
    pub id: String,
    pub name: String,
}

/// 記述子の実行引数に識別用のデフォルトを合成する
///
/// 注入するもの:
/// - `e`: `REPO_NAME` / `REPO_BRANCH` / `REPO_ORG`、バーチャルホストが
///   あれば `VIRTUAL_HOST`
/// - `restart`: `on-failure:5`
/// - `label`: shipment の来歴ラベル一式
pub fn merge_runtime_args(
    config_args: &serde_json::Map<String, Value>,
    target: &DeployTarget,
    virtual_host: Option<&str>,
) -> serde_json::Map<String, Value> {
    let mut merged = config_args.clone();

    let mut env_defaults: Vec<(&str, String)> = vec![
        ("REPO_NAME", target.repo.clone()),
        ("REPO_BRANCH", target.branch.clone()),
        ("REPO_ORG", target.org.clone()),
    ];
    if let Some(host) = virtual_host {
        env_defaults.push(("VIRTUAL_HOST", host.to_string()));
    }
    fill_nested(&mut merged, "e", &env_defaults);

    merged
        .entry("restart")
        .or_insert_with(|| Value::String("on-failure:5".to_string()));

    let label_defaults: Vec<(&str, String)> = vec![
        (LABEL_DEPLOY, LABEL_DEPLOY_VALUE.to_string()),
        (LABEL_REPO, target.repo.clone()),
        (LABEL_BRANCH, target.branch.clone()),
        (LABEL_ORG, target.org.clone()),
    ];
    fill_nested(&mut merged, "label", &label_defaults);

    merged
}

/// `args[key]` のマップに、欠けているエントリだけを追加する
fn fill_nested(
    args: &mut serde_json::Map<String, Value>,
    key: &str,
    defaults: &[(&str, String)],
) {
    let entry = args
        .entry(key)
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let Some(map) = entry.as_object_mut() else {
        warn!(flag = key, "Runtime arg is not a map, skipping defaults");
        return;
    };
    for (k, v) in defaults {
        map.entry(*k)
            .or_insert_with(|| Value::String(v.clone()));
    }
}

/// レプリカ名: `{repo}_{safe_branch}_{ランダム 6 文字}`
pub fn generate_name(repo: &str, safe_branch: &str) -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}_{}_{}", repo, safe_branch, suffix)
}

/// 合成済み実行引数を Docker のコンテナ設定に変換する
///
/// 理解するフラグ: `e`/`env`, `label`, `restart`, `p`/`publish`,
/// `v`/`volume`, `net`/`network`, `m`/`memory`。その他は警告して無視。
pub fn runtime_args_to_config(
    image_tag: &str,
    name: &str,
    args: &serde_json::Map<String, Value>,
) -> Result<(Config<String>, CreateContainerOptions<String>)> {
    let mut env: Vec<String> = Vec::new();
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut binds: Vec<String> = Vec::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut restart_policy: Option<RestartPolicy> = None;
    let mut network_mode: Option<String> = None;
    let mut memory: Option<i64> = None;

    for (flag, value) in args {
        match flag.as_str() {
            "e" | "env" => {
                if let Some(map) = value.as_object() {
                    for (k, v) in map {
                        env.push(format!("{}={}", k, scalar_to_string(v)));
                    }
                }
            }
            "label" => {
                if let Some(map) = value.as_object() {
                    for (k, v) in map {
                        labels.insert(k.clone(), scalar_to_string(v));
                    }
                }
            }
            "restart" => {
                restart_policy = parse_restart_policy(&scalar_to_string(value));
            }
            "p" | "publish" => {
                for spec in value_as_strings(value) {
                    let (key, binding) = parse_port_spec(&spec)?;
                    exposed_ports.insert(key.clone(), HashMap::new());
                    port_bindings.insert(key, binding);
                }
            }
            "v" | "volume" => {
                binds.extend(value_as_strings(value));
            }
            "net" | "network" => {
                network_mode = Some(scalar_to_string(value));
            }
            "m" | "memory" => {
                let spec = scalar_to_string(value);
                memory = Some(parse_memory(&spec).ok_or_else(|| {
                    ContainerError::InvalidRuntimeArg {
                        flag: flag.clone(),
                        message: format!("メモリ指定を解釈できません: {}", spec),
                    }
                })?);
            }
            other => {
                warn!(flag = other, "Unknown runtime arg, ignoring");
            }
        }
    }

    let host_config = HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        restart_policy,
        network_mode,
        memory,
        ..Default::default()
    };

    #[allow(deprecated)]
    let config = Config {
        image: Some(image_tag.to_string()),
        env: if env.is_empty() { None } else { Some(env) },
        labels: Some(labels),
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        host_config: Some(host_config),
        ..Default::default()
    };

    #[allow(deprecated)]
    let options = CreateContainerOptions {
        name: name.to_string(),
        platform: None,
    };

    Ok((config, options))
}

/// scale 個のレプリカを起動し、ID と名前を返す
pub async fn launch_replicas(
    docker: &Docker,
    target: &DeployTarget,
    image_tag: &str,
    args: &serde_json::Map<String, Value>,
    scale: u32,
) -> Result<Vec<Launched>> {
    let safe_branch = target.safe_branch();
    let mut launched = Vec::with_capacity(scale as usize);

    for replica in 0..scale {
        let name = generate_name(&target.repo, &safe_branch);
        let (config, options) = runtime_args_to_config(image_tag, &name, args)?;

        info!(%target, %name, replica, "Starting container");

        let created = docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::LaunchFailed {
                name: name.clone(),
                message: e.to_string(),
            })?;

        docker
            .start_container(&name, None::<bollard::query_parameters::StartContainerOptions>)
            .await
            .map_err(|e| ContainerError::LaunchFailed {
                name: name.clone(),
                message: e.to_string(),
            })?;

        launched.push(Launched {
            id: created.id,
            name,
        });
    }

    Ok(launched)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 文字列または文字列配列を Vec<String> に
fn value_as_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(scalar_to_string).collect(),
        other => vec![scalar_to_string(other)],
    }
}

/// `host:container` / `container` 形式のポート指定を変換
fn parse_port_spec(spec: &str) -> Result<(String, Option<Vec<PortBinding>>)> {
    let (host, container) = match spec.rsplit_once(':') {
        Some((host, container)) => (Some(host.to_string()), container.to_string()),
        None => (None, spec.to_string()),
    };

    if container.is_empty() {
        return Err(ContainerError::InvalidRuntimeArg {
            flag: "p".to_string(),
            message: format!("ポート指定を解釈できません: {}", spec),
        });
    }

    let key = if container.contains('/') {
        container
    } else {
        format!("{}/tcp", container)
    };

    let binding = host.map(|host_port| {
        vec![PortBinding {
            host_ip: None,
            host_port: Some(host_port),
        }]
    });

    Ok((key, binding))
}

/// `on-failure:5` / `always` / `unless-stopped` / `no` を解釈
fn parse_restart_policy(spec: &str) -> Option<RestartPolicy> {
    let (name, retries) = match spec.split_once(':') {
        Some((name, count)) => (name, count.parse::<i64>().ok()),
        None => (spec, None),
    };

    let name = match name {
        "no" => RestartPolicyNameEnum::NO,
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        other => {
            warn!(restart = other, "Unknown restart policy, ignoring");
            return None;
        }
    };

    Some(RestartPolicy {
        name: Some(name),
        maximum_retry_count: retries,
    })
}

/// `512m` のようなメモリ指定をバイト数に変換
fn parse_memory(spec: &str) -> Option<i64> {
    let spec = spec.trim().to_lowercase();
    let (number, multiplier) = match spec.chars().last()? {
        'b' => (&spec[..spec.len() - 1], 1i64),
        'k' => (&spec[..spec.len() - 1], 1024),
        'm' => (&spec[..spec.len() - 1], 1024 * 1024),
        'g' => (&spec[..spec.len() - 1], 1024 * 1024 * 1024),
        _ => (spec.as_str(), 1),
    };
    number.parse::<i64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn target() -> DeployTarget {
        DeployTarget::new("acme", "api", "feature/x")
    }

    #[test]
    fn test_merge_injects_identity_env_and_labels() {
        let merged = merge_runtime_args(&serde_json::Map::new(), &target(), None);

        assert_eq!(merged["e"]["REPO_NAME"], "api");
        assert_eq!(merged["e"]["REPO_BRANCH"], "feature/x");
        assert_eq!(merged["e"]["REPO_ORG"], "acme");
        assert_eq!(merged["restart"], "on-failure:5");
        assert_eq!(merged["label"]["shipment"], "deploy");
        assert_eq!(merged["label"]["shipment-repo"], "api");
        assert_eq!(merged["label"]["shipment-branch"], "feature/x");
        assert_eq!(merged["label"]["shipment-org"], "acme");
        // バーチャルホスト未指定なら VIRTUAL_HOST も無い
        assert!(merged["e"].get("VIRTUAL_HOST").is_none());
    }

    #[test]
    fn test_merge_adds_virtual_host() {
        let merged = merge_runtime_args(&serde_json::Map::new(), &target(), Some("api-x.example.com"));
        assert_eq!(merged["e"]["VIRTUAL_HOST"], "api-x.example.com");
    }

    #[test]
    fn test_merge_config_values_win() {
        let config_args = serde_json::json!({
            "e": { "REPO_NAME": "renamed" },
            "restart": "always"
        });
        let config_args = config_args.as_object().unwrap().clone();

        let merged = merge_runtime_args(&config_args, &target(), None);

        // 記述子の値が優先、欠けたところだけ注入
        assert_eq!(merged["e"]["REPO_NAME"], "renamed");
        assert_eq!(merged["e"]["REPO_ORG"], "acme");
        assert_eq!(merged["restart"], "always");
    }

    #[test]
    fn test_generate_name_format_and_uniqueness() {
        let names: HashSet<String> = (0..32).map(|_| generate_name("api", "x")).collect();

        assert_eq!(names.len(), 32);
        for name in &names {
            assert!(name.starts_with("api_x_"));
            let suffix = name.strip_prefix("api_x_").unwrap();
            assert_eq!(suffix.len(), 6);
            assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_runtime_args_to_config_env_and_labels() {
        let args = merge_runtime_args(&serde_json::Map::new(), &target(), Some("api-x.example.com"));
        let (config, options) = runtime_args_to_config("api_x:abc1234", "api_x_aaaaaa", &args).unwrap();

        assert_eq!(config.image.as_deref(), Some("api_x:abc1234"));
        assert_eq!(options.name, "api_x_aaaaaa");

        let env = config.env.unwrap();
        assert!(env.contains(&"REPO_NAME=api".to_string()));
        assert!(env.contains(&"VIRTUAL_HOST=api-x.example.com".to_string()));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get("shipment"), Some(&"deploy".to_string()));

        let restart = config.host_config.unwrap().restart_policy.unwrap();
        assert_eq!(restart.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(restart.maximum_retry_count, Some(5));
    }

    #[test]
    fn test_runtime_args_to_config_ports_and_volumes() {
        let args = serde_json::json!({
            "p": ["8080:3000", "9125"],
            "v": "/data:/var/lib/data:ro",
            "net": "proxy",
            "m": "512m"
        });
        let args = args.as_object().unwrap().clone();

        let (config, _) = runtime_args_to_config("api_x:abc", "api_x_bbbbbb", &args).unwrap();
        let host_config = config.host_config.unwrap();

        let bindings = host_config.port_bindings.unwrap();
        let bound = bindings.get("3000/tcp").unwrap().as_ref().unwrap();
        assert_eq!(bound[0].host_port.as_deref(), Some("8080"));
        // ホスト側未指定はバインディング無しで公開のみ
        assert!(bindings.get("9125/tcp").unwrap().is_none());

        assert_eq!(
            host_config.binds.unwrap(),
            vec!["/data:/var/lib/data:ro".to_string()]
        );
        assert_eq!(host_config.network_mode.as_deref(), Some("proxy"));
        assert_eq!(host_config.memory, Some(512 * 1024 * 1024));
    }

    #[test]
    fn test_unknown_flag_is_ignored() {
        let args = serde_json::json!({ "privileged": true });
        let args = args.as_object().unwrap().clone();

        let result = runtime_args_to_config("api_x:abc", "api_x_cccccc", &args);
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_restart_policy() {
        let policy = parse_restart_policy("on-failure:5").unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(5));

        let policy = parse_restart_policy("always").unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ALWAYS));
        assert_eq!(policy.maximum_retry_count, None);

        assert!(parse_restart_policy("sometimes").is_none());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory("2G"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("1024"), Some(1024));
        assert_eq!(parse_memory("abc"), None);
    }
}
