//! 依存関係つきステップの実行エンジン
//!
//! 名前付きステップを依存順に実行する。依存関係のないステップは並行に
//! 走り、最初の失敗以降は新しいステップをスケジュールしない。
//! ステップは型付きアキュムレータ `Arc<C>` を受け取り、結果を
//! そこへ書き込む。

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::debug;

type StepFuture<E> = Pin<Box<dyn Future<Output = std::result::Result<(), E>> + Send>>;
type StepFn<C, E> = Box<dyn FnOnce(Arc<C>) -> StepFuture<E> + Send>;

#[derive(Error, Debug)]
pub enum GraphError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("ステップ定義が重複しています: {0}")]
    DuplicateStep(&'static str),

    #[error("ステップ '{step}' が未定義の依存 '{dep}' を参照しています")]
    UnknownDependency {
        step: &'static str,
        dep: &'static str,
    },

    #[error("ステップの循環依存が検出されました: {0:?}")]
    Cycle(Vec<&'static str>),

    #[error("ステップ '{step}' が失敗しました: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: E,
    },

    #[error("ステップ '{0}' がパニックしました")]
    StepPanicked(&'static str),
}

struct Step<C, E> {
    id: &'static str,
    deps: Vec<&'static str>,
    work: StepFn<C, E>,
}

/// 依存関係つきステップのグラフ
pub struct TaskGraph<C, E> {
    steps: Vec<Step<C, E>>,
}

impl<C, E> TaskGraph<C, E>
where
    C: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// ステップを登録。`deps` は先に完了していなければならないステップ名
    pub fn step<F, Fut>(mut self, id: &'static str, deps: &[&'static str], work: F) -> Self
    where
        F: FnOnce(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        self.steps.push(Step {
            id,
            deps: deps.to_vec(),
            work: Box::new(move |ctx| Box::pin(work(ctx))),
        });
        self
    }

    /// 全ステップを依存順に実行する
    ///
    /// 依存の無い（または依存が満たされた）ステップは即座に並行起動する。
    /// いずれかのステップが失敗したら新規スケジュールを止め、実行中の
    /// ステップの完了を待ってから最初のエラーだけを返す。
    pub async fn run(self, ctx: Arc<C>) -> std::result::Result<(), GraphError<E>> {
        self.validate()?;

        let mut dep_count: HashMap<&'static str, usize> = HashMap::new();
        let mut dependents: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        let mut pending: HashMap<&'static str, StepFn<C, E>> = HashMap::new();
        let mut ready: VecDeque<&'static str> = VecDeque::new();

        for step in self.steps {
            dep_count.insert(step.id, step.deps.len());
            if step.deps.is_empty() {
                ready.push_back(step.id);
            }
            for dep in &step.deps {
                dependents.entry(*dep).or_default().push(step.id);
            }
            pending.insert(step.id, step.work);
        }

        let mut join_set: JoinSet<std::result::Result<(), E>> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, &'static str> = HashMap::new();
        let mut first_error: Option<GraphError<E>> = None;

        loop {
            if first_error.is_none() {
                while let Some(id) = ready.pop_front() {
                    let Some(work) = pending.remove(id) else {
                        continue;
                    };
                    debug!(step = id, "Starting step");
                    let ctx = Arc::clone(&ctx);
                    let handle = join_set.spawn(async move { work(ctx).await });
                    running.insert(handle.id(), id);
                }
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((task_id, result)) => {
                    let id = running.remove(&task_id).unwrap_or("unknown");
                    match result {
                        Ok(()) => {
                            debug!(step = id, "Step finished");
                            for waiter in dependents.get(id).cloned().unwrap_or_default() {
                                if let Some(count) = dep_count.get_mut(waiter) {
                                    *count -= 1;
                                    if *count == 0 {
                                        ready.push_back(waiter);
                                    }
                                }
                            }
                        }
                        Err(source) => {
                            debug!(step = id, "Step failed");
                            if first_error.is_none() {
                                first_error = Some(GraphError::Step { step: id, source });
                                ready.clear();
                            }
                        }
                    }
                }
                Err(join_error) => {
                    let id = running.remove(&join_error.id()).unwrap_or("unknown");
                    if first_error.is_none() {
                        first_error = Some(GraphError::StepPanicked(id));
                        ready.clear();
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 重複・未定義依存・循環を実行前に検出する
    fn validate(&self) -> std::result::Result<(), GraphError<E>> {
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id) {
                return Err(GraphError::DuplicateStep(step.id));
            }
        }
        for step in &self.steps {
            for dep in &step.deps {
                if !ids.contains(dep) {
                    return Err(GraphError::UnknownDependency {
                        step: step.id,
                        dep: *dep,
                    });
                }
            }
        }

        // Kahn のトポロジカルソート。処理しきれなかったステップが循環
        let mut dep_count: HashMap<&'static str, usize> = HashMap::new();
        let mut dependents: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for step in &self.steps {
            dep_count.insert(step.id, step.deps.len());
            for dep in &step.deps {
                dependents.entry(*dep).or_default().push(step.id);
            }
        }

        let mut queue: VecDeque<&'static str> = dep_count
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut resolved = 0usize;

        while let Some(id) = queue.pop_front() {
            resolved += 1;
            for waiter in dependents.get(id).into_iter().flatten().copied() {
                if let Some(count) = dep_count.get_mut(waiter) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(waiter);
                    }
                }
            }
        }

        if resolved < self.steps.len() {
            let mut remaining: Vec<&'static str> = dep_count
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(id, _)| id)
                .collect();
            remaining.sort_unstable();
            return Err(GraphError::Cycle(remaining));
        }

        Ok(())
    }
}

impl<C, E> Default for TaskGraph<C, E>
where
    C: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
