/// Debounced search dispatch with sequence-number staleness checks
use crate::api::ApiClient;
use crate::model::SearchFilter;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug)]
enum Command {
    /// New input at this revision; restart the quiescence window
    Input(u64),
    /// Input cleared; forget the pending dispatch
    Clear,
}

/// Turns keystrokes into at most one search per quiescence window.
///
/// Input state lives in the store's search cache. The background task only
/// owns the timer and the in-flight request handles.
pub struct SearchDispatcher {
    store: Store,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SearchDispatcher {
    pub fn spawn(
        store: Store,
        api: Arc<dyn ApiClient>,
        debounce: Duration,
        cancel_superseded: bool,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store.clone(), api, debounce, cancel_superseded, rx));
        Self {
            store,
            commands,
            task,
        }
    }

    /// Called on every keystroke or filter toggle.
    ///
    /// Blank text clears the results right away, bypassing the debounce.
    pub async fn on_query_changed(&self, text: &str, filter: SearchFilter) {
        let query = text.trim();
        // sent under the guard so commands queue in revision order
        let mut cache = self.store.search_mut().await;
        let command = if query.is_empty() {
            cache.clear();
            Command::Clear
        } else {
            Command::Input(cache.begin_debounce(query, filter))
        };
        if self.commands.send(command).is_err() {
            debug!("Search dispatcher stopped, input ignored");
        }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SearchDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: Store,
    api: Arc<dyn ApiClient>,
    debounce: Duration,
    cancel_superseded: bool,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Option<(u64, Instant)> = None;
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        let deadline = pending.map(|(_, at)| at).unwrap_or_else(Instant::now);
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Input(revision)) => {
                    restart_window(&mut pending, revision, Instant::now() + debounce);
                }
                Some(Command::Clear) => {
                    pending = None;
                    if cancel_superseded {
                        if let Some(task) = in_flight.take() {
                            task.abort();
                        }
                    }
                }
                None => break,
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                if let Some((revision, _)) = pending.take() {
                    let task = dispatch(&store, &api, revision).await;
                    if let (true, Some(task)) = (cancel_superseded, task) {
                        if let Some(previous) = in_flight.replace(task) {
                            previous.abort();
                        }
                    }
                }
            }
        }
    }
    debug!("Search dispatcher finished");
}

/// Restart the quiescence window, never going back to an older revision
fn restart_window(pending: &mut Option<(u64, Instant)>, revision: u64, deadline: Instant) {
    let newest = match *pending {
        Some((current, _)) => current.max(revision),
        None => revision,
    };
    *pending = Some((newest, deadline));
}

/// Issue the next sequence number and send the query
async fn dispatch(store: &Store, api: &Arc<dyn ApiClient>, revision: u64) -> Option<JoinHandle<()>> {
    let (seq, query, filter) = store.search_mut().await.dispatch_pending(revision)?;
    debug!("Search #{} dispatched: {:?} ({})", seq, query, filter);

    let store = store.clone();
    let api = api.clone();
    Some(tokio::spawn(async move {
        let result = api.search(&query, filter).await;
        let mut cache = store.search_mut().await;
        let applied = match result {
            Ok(results) => cache.settle(seq, results),
            Err(e) => cache.fail(seq, e.message),
        };
        if !applied {
            debug!("Search #{} stale, latest is #{}", seq, cache.highest_seq());
        }
    }))
}
