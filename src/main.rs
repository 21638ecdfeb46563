use perfkit::{debounce, throttle, Config, PersistentStore, Scheduler, TokioScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Number of recent searches remembered across runs
const HISTORY_LEN: usize = 10;

// Every stdin line is a keystroke-level update of a search box:
//   printf 'b\nbu\nbus\nbus 1\nbus 12\n' | perfkit [config.json]

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match Config::from_file(&path) {
            Ok(c) => c,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let backend = match config.open_backend() {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(PersistentStore::new(backend, config.namespace.clone()));

    if let Some(last) = store.get::<String>("last_query") {
        info!("Last search was '{}'", last);
    }

    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new());

    // Debounced search: only the settled query is looked up and remembered
    let search_store = store.clone();
    let search = debounce(
        move |query: String| {
            info!("Searching routes for '{}'", query);
            let mut history: Vec<String> = search_store.get("history").unwrap_or_default();
            history.retain(|q| q != &query);
            history.insert(0, query.clone());
            history.truncate(HISTORY_LEN);
            search_store.set("history", &history);
            search_store.set("last_query", &query);
        },
        config.debounce_delay(),
        scheduler.clone(),
    );

    // Throttled progress report
    let progress = throttle(
        |seen: usize| info!("{} keystroke(s) received", seen),
        config.throttle_interval(),
        scheduler.clone(),
    );

    let mut keystrokes = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                keystrokes += 1;
                progress.call(keystrokes);
                search.call(line.trim().to_string());
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }
    }

    // Let the pending search and trailing progress report fire
    let settle = config.debounce_delay().max(config.throttle_interval());
    tokio::time::sleep(settle + Duration::from_millis(50)).await;

    let history: Vec<String> = store.get("history").unwrap_or_default();
    info!("Recent searches: {:?}", history);
}
