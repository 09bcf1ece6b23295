//! デプロイ記述子のテンプレート展開
//!
//! Tera を使用して記述子内の文字列値を展開します。
//! 利用できる変数: `repo` / `branch` / `safe_branch` / `env` と、
//! プロセス環境変数（`env_vars.*`）。

use crate::error::{CoreError, Result};
use std::collections::HashMap;
use tera::{Context, Tera};
use tracing::debug;

/// テンプレート展開器
pub struct TemplateExpander {
    tera: Tera,
    context: Context,
}

impl TemplateExpander {
    /// デプロイ対象の変数を束縛した展開器を作成
    pub fn new(repo: &str, branch: &str, safe_branch: &str, env: &str) -> Self {
        let mut context = Context::new();
        context.insert("repo", repo);
        context.insert("branch", branch);
        context.insert("safe_branch", safe_branch);
        context.insert("env", env);

        Self {
            tera: Tera::default(),
            context,
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: &str) {
        self.context.insert(key.into(), value);
    }

    /// プロセス環境変数を `env_vars.*` として追加
    pub fn add_process_env(&mut self) {
        let vars: HashMap<String, String> = std::env::vars().collect();
        debug!(env_var_count = vars.len(), "Adding process environment");
        self.context.insert("env_vars", &vars);
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| CoreError::TemplateRender(flatten_tera_error(&e)))
    }

    /// JSON 値の中の全文字列を再帰的に展開
    pub fn expand_value(&mut self, value: &mut serde_json::Value) -> Result<()> {
        match value {
            serde_json::Value::String(s) => {
                if s.contains("{{") || s.contains("{%") {
                    *s = self.render_str(s)?;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.expand_value(item)?;
                }
            }
            serde_json::Value::Object(map) => {
                for (_, v) in map.iter_mut() {
                    self.expand_value(v)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Tera のエラーチェーンを 1 つのメッセージにまとめる
fn flatten_tera_error(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(" | ")
}
