use crate::config::AppConfig;
use crate::content::RoundContent;
use crate::coordinator::{self, MatchHandle};
use crate::identity::{IdentityCheck, IdentityRegistry};
use std::sync::Arc;
use tokio::sync::RwLock;

/// State shared by HTTP and socket handlers.
///
/// Match state itself lives in the coordinator task; this only holds the
/// handle to the match currently accepting players.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identities: Arc<IdentityRegistry>,
    pub content: Arc<dyn RoundContent>,
    current: Arc<RwLock<MatchHandle>>,
}

impl AppState {
    /// Create the shared state and open the first match
    pub fn new(config: AppConfig, content: Arc<dyn RoundContent>) -> Self {
        let identities = Arc::new(IdentityRegistry::new());
        let handle = spawn_match(&config, &content, &identities);

        Self {
            config: Arc::new(config),
            identities,
            content,
            current: Arc::new(RwLock::new(handle)),
        }
    }

    /// Handle to the current match, opening a fresh one if the previous
    /// match has finished.
    pub async fn current_match(&self) -> MatchHandle {
        {
            let current = self.current.read().await;
            if !current.is_closed() {
                return current.clone();
            }
        }

        let mut current = self.current.write().await;
        // Another caller may have replaced it already
        if current.is_closed() {
            tracing::info!("Match {} has ended, opening a new one", current.id());
            *current = spawn_match(&self.config, &self.content, &self.identities);
        }
        current.clone()
    }
}

fn spawn_match(
    config: &AppConfig,
    content: &Arc<dyn RoundContent>,
    identities: &Arc<IdentityRegistry>,
) -> MatchHandle {
    let identity: Arc<dyn IdentityCheck> = identities.clone();
    let (handle, _task) = coordinator::spawn(config.game.clone(), content.clone(), identity);
    handle
}
