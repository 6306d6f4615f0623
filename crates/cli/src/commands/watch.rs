use super::utils::{print_info, CliError, CliResult};
use serde_json::json;
use spectra_core::{
    executor::{HttpBaseQuery, HttpBaseQueryConfig},
    Api, ApiConfig, CacheEntry, QueryEndpoint, QueryStatus, SubscriptionOptions, Tag,
};
use std::time::Duration;
use tracing::{debug, info};

const RESOURCE_ENDPOINT: &str = "resource";

pub struct WatchOptions {
    pub base_url: String,
    pub path: String,
    /// Zero fetches once and never polls.
    pub interval_ms: u64,
    /// Settled results to print before exiting; zero runs until interrupted.
    pub count: usize,
}

fn resource_endpoint() -> QueryEndpoint {
    QueryEndpoint::new()
        .query(|path| json!({ "path": path }))
        .provides_tags(vec![Tag::new("Resource")])
}

fn subscription_options(interval_ms: u64) -> SubscriptionOptions {
    let options = SubscriptionOptions::default();
    if interval_ms == 0 {
        options
    } else {
        options.polling(Duration::from_millis(interval_ms))
    }
}

fn render(entry: &CacheEntry) -> CliResult<String> {
    let body = match (&entry.status, &entry.data, &entry.error) {
        (QueryStatus::Rejected, _, Some(error)) => format!("error: {error}"),
        (_, Some(data), _) => serde_json::to_string_pretty(data)?,
        _ => "<no data>".to_string(),
    };
    Ok(format!("[{} rev {}] {body}", entry.status.as_str(), entry.revision))
}

/// Subscribes to a single HTTP resource and prints every settled snapshot.
pub async fn watch_resource(config: ApiConfig, options: WatchOptions) -> CliResult<()> {
    let base_query = HttpBaseQuery::new(HttpBaseQueryConfig::new(options.base_url.clone()))?;
    let api = Api::builder()
        .base_query(base_query)
        .config(config)
        .query(RESOURCE_ENDPOINT, resource_endpoint())
        .build()?;

    print_info(&format!("Watching {}{}", options.base_url, options.path));
    info!(path = %options.path, interval_ms = options.interval_ms, "watch started");

    let mut subscription =
        api.subscribe(RESOURCE_ENDPOINT, &options.path, subscription_options(options.interval_ms))?;

    let mut printed = 0usize;
    let mut last_revision = None;
    loop {
        let entry = subscription.snapshot();
        if entry.status != QueryStatus::Pending && last_revision != Some(entry.revision) {
            last_revision = Some(entry.revision);
            println!("{}", render(&entry)?);
            printed += 1;
            if options.count > 0 && printed >= options.count {
                break;
            }
            if options.interval_ms == 0 {
                break;
            }
        }

        tokio::select! {
            changed = subscription.changed() => {
                if !changed {
                    return Err(CliError::Watch("cache entry was dropped".to_string()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }

    subscription.unsubscribe();
    api.dispose();
    Ok(())
}
