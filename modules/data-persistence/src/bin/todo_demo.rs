//! Todo demo: all three effect helpers against a simulated backend.
//!
//! The host side (state updates, re-dispatch) lives here, not in the library.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use data_persistence::{
    spawn_effect, Action, ActionBus, Config, DataPersistence, FetchOpts, LogFormat,
    OptimisticUpdateOpts, Outcome, PessimisticUpdateOpts,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum TodoAction {
    GetTodo { id: u64 },
    TodoLoaded { id: u64, title: String },
    UpdateTodo { id: u64, title: String },
    TodoUpdated { id: u64, title: String },
    DeleteTodo { id: u64 },
    RestoreTodo { id: u64, title: String },
    TodoError { id: u64, message: String },
}

impl Action for TodoAction {
    fn action_type(&self) -> &str {
        match self {
            TodoAction::GetTodo { .. } => "GET_TODO",
            TodoAction::TodoLoaded { .. } => "TODO_LOADED",
            TodoAction::UpdateTodo { .. } => "UPDATE_TODO",
            TodoAction::TodoUpdated { .. } => "TODO_UPDATED",
            TodoAction::DeleteTodo { .. } => "DELETE_TODO",
            TodoAction::RestoreTodo { .. } => "RESTORE_TODO",
            TodoAction::TodoError { .. } => "TODO_ERROR",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TodoState {
    todos: BTreeMap<u64, String>,
    errors: Vec<String>,
}

/// Local state changes made by the host reducer.
///
/// The reducer is its own bus subscriber, so an effect may snapshot the state
/// before or after its action has been applied.
fn apply(state: &mut TodoState, action: &TodoAction) {
    match action {
        TodoAction::TodoLoaded { id, title }
        | TodoAction::TodoUpdated { id, title }
        | TodoAction::RestoreTodo { id, title } => {
            state.todos.insert(*id, title.clone());
        }
        TodoAction::DeleteTodo { id } => {
            state.todos.remove(id);
        }
        TodoAction::TodoError { message, .. } => state.errors.push(message.clone()),
        TodoAction::GetTodo { .. } | TodoAction::UpdateTodo { .. } => {}
    }
}

/// Pretend server. Rejects deletes of todo 3 and titles that are empty.
#[derive(Clone, Default)]
struct Backend {
    todos: Arc<Mutex<BTreeMap<u64, String>>>,
}

impl Backend {
    fn seeded() -> Self {
        let todos = BTreeMap::from([
            (1, "write the design doc".to_string()),
            (2, "review the design doc".to_string()),
            (3, "ship it".to_string()),
        ]);
        Self {
            todos: Arc::new(Mutex::new(todos)),
        }
    }

    async fn get(&self, id: u64) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let todos = self.todos.lock().map_err(|_| anyhow!("backend poisoned"))?;
        todos.get(&id).cloned().ok_or_else(|| anyhow!("todo {id} not found"))
    }

    async fn update(&self, id: u64, title: String) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if title.trim().is_empty() {
            return Err(anyhow!("title must not be empty"));
        }
        let mut todos = self.todos.lock().map_err(|_| anyhow!("backend poisoned"))?;
        todos.insert(id, title.clone());
        Ok(title)
    }

    async fn delete(&self, id: u64) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if id == 3 {
            return Err(anyhow!("todo {id} is locked"));
        }
        let mut todos = self.todos.lock().map_err(|_| anyhow!("backend poisoned"))?;
        todos.remove(&id);
        Ok(())
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter =
        EnvFilter::from_default_env().add_directive("data_persistence=info".parse()?);
    match config.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;
    config.log_redacted();

    let bus: ActionBus<TodoAction> = ActionBus::from_config(&config);
    let (state_tx, state_rx) = watch::channel(TodoState::default());
    let backend = Backend::seeded();

    // Host reducer loop: keep the state container in step with the bus.
    let mut reducer_feed = bus.subscribe();
    let reducer = tokio::spawn(async move {
        while let Some(action) = reducer_feed.next().await {
            if let Ok(json) = serde_json::to_string(&action) {
                debug!(action = %json, "Reducing action");
            }
            state_tx.send_modify(|state| apply(state, &action));
        }
    });

    let persistence = DataPersistence::new(bus.clone(), state_rx.clone());

    let fetch_backend = backend.clone();
    let loads = persistence.fetch(
        "GET_TODO",
        FetchOpts::new(
            move |action: &TodoAction, _state: &TodoState| {
                let TodoAction::GetTodo { id } = *action else {
                    return Ok(Outcome::none());
                };
                let backend = fetch_backend.clone();
                Ok(Outcome::future(async move {
                    let title = backend.get(id).await?;
                    Ok(TodoAction::TodoLoaded { id, title })
                }))
            },
            |action: &TodoAction, err| {
                let id = match action {
                    TodoAction::GetTodo { id } => *id,
                    _ => 0,
                };
                Outcome::action(TodoAction::TodoError {
                    id,
                    message: err.to_string(),
                })
            },
        )
        .with_id(|action: &TodoAction, _state: &TodoState| match action {
            TodoAction::GetTodo { id } => *id,
            _ => 0,
        }),
    );

    let update_backend = backend.clone();
    let updates = persistence.pessimistic_update(
        "UPDATE_TODO",
        PessimisticUpdateOpts::new(
            move |action: &TodoAction, _state: &TodoState| {
                let TodoAction::UpdateTodo { id, title } = action.clone() else {
                    return Ok(Outcome::none());
                };
                let backend = update_backend.clone();
                Ok(Outcome::future(async move {
                    let title = backend.update(id, title).await?;
                    Ok(TodoAction::TodoUpdated { id, title })
                }))
            },
            |action: &TodoAction, err| {
                let id = match action {
                    TodoAction::UpdateTodo { id, .. } => *id,
                    _ => 0,
                };
                Outcome::action(TodoAction::TodoError {
                    id,
                    message: err.to_string(),
                })
            },
        ),
    );

    let delete_backend = backend.clone();
    let deletes = persistence.optimistic_update(
        "DELETE_TODO",
        OptimisticUpdateOpts::new(
            move |action: &TodoAction, state: &TodoState| {
                let TodoAction::DeleteTodo { id } = *action else {
                    return Ok(Outcome::none());
                };
                // The reducer removes it locally; undo restores from the backend copy.
                info!(id, remaining = state.todos.len(), "Deleting todo");
                let backend = delete_backend.clone();
                // Success carries no action; only a failure produces output.
                let confirmed = futures::stream::once(async move { backend.delete(id).await })
                    .filter_map(|result| async move {
                        result.err().map(Err::<TodoAction, anyhow::Error>)
                    });
                Ok(Outcome::stream(confirmed))
            },
            {
                let backend = backend.clone();
                move |action: &TodoAction, err| {
                    let id = match action {
                        TodoAction::DeleteTodo { id } => *id,
                        _ => 0,
                    };
                    info!(id, error = %err, "Delete rejected, restoring");
                    let title = backend
                        .todos
                        .lock()
                        .ok()
                        .and_then(|todos| todos.get(&id).cloned())
                        .unwrap_or_default();
                    TodoAction::RestoreTodo { id, title }
                }
            },
        ),
    );

    let effects = vec![
        spawn_effect("load_todos", loads, bus.clone()),
        spawn_effect("update_todos", updates, bus.clone()),
        spawn_effect("delete_todos", deletes, bus.clone()),
    ];

    // Seed local state, then drive the effects.
    for id in [1, 2, 3] {
        bus.dispatch(TodoAction::GetTodo { id });
    }
    // A second request for todo 2 supersedes the first.
    bus.dispatch(TodoAction::GetTodo { id: 2 });
    tokio::time::sleep(Duration::from_millis(100)).await;

    bus.dispatch(TodoAction::UpdateTodo {
        id: 1,
        title: "write the design doc, twice".to_string(),
    });
    bus.dispatch(TodoAction::UpdateTodo {
        id: 2,
        title: "   ".to_string(),
    });
    bus.dispatch(TodoAction::DeleteTodo { id: 2 });
    bus.dispatch(TodoAction::DeleteTodo { id: 3 });
    tokio::time::sleep(Duration::from_millis(250)).await;

    let state = state_rx.borrow().clone();
    info!(todos = ?state.todos, errors = ?state.errors, "Final state");
    println!("{}", serde_json::to_string_pretty(&state.todos)?);

    for effect in effects {
        effect.abort();
    }
    reducer.abort();

    Ok(())
}
