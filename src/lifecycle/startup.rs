//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (rate limiter sweeper)
//! - Serve, then tear down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - The task pool is passed in, so the binary can use the process-wide
//!   pool while tests build their own

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::accounts::{AccountService, AvatarFiles, InMemoryUserStore, UserStore};
use crate::clock::Clock;
use crate::config::{validation::validate_config, AppConfig, ConfigError};
use crate::http::{ApiServer, AppState};
use crate::lifecycle::Shutdown;
use crate::mail::MailTransport;
use crate::security::{AuthGateway, RateLimiter};
use crate::session::{SessionAuthority, SessionError};
use crate::tasks::{ShutdownOutcome, TaskPool};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session setup failed: {0}")]
    Session(#[from] SessionError),
}

/// A fully wired application, ready to serve.
pub struct App {
    config: AppConfig,
    state: AppState,
    store: Arc<InMemoryUserStore>,
    pool: TaskPool,
    shutdown: Shutdown,
}

impl App {
    /// Wire every subsystem from `config`.
    ///
    /// The config is validated again here, so no caller can start the
    /// service with an unset or placeholder signing secret.
    pub fn build(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn MailTransport>,
        pool: TaskPool,
    ) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let store = Arc::new(match &config.store.snapshot_path {
            Some(path) => InMemoryUserStore::open(path, clock.clone())?,
            None => InMemoryUserStore::new(clock.clone()),
        });
        let users: Arc<dyn UserStore> = store.clone();

        let sessions = Arc::new(SessionAuthority::new(&config.session, clock.clone())?);
        let gateway = Arc::new(AuthGateway::new(sessions.clone(), users.clone()));

        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit, clock.clone())));

        let avatars = AvatarFiles::new(config.store.uploads_dir.as_ref().map(PathBuf::from));
        let accounts = Arc::new(AccountService::new(
            users,
            sessions,
            pool.clone(),
            mailer,
            avatars,
            clock,
            config.server.public_url.clone(),
        ));

        tracing::info!(
            workers = pool.worker_count(),
            queue_capacity = pool.capacity(),
            rate_limit_enabled = limiter.is_some(),
            users = store.len(),
            "Application initialized"
        );

        Ok(Self {
            config,
            state: AppState {
                accounts,
                gateway,
                limiter,
            },
            store,
            pool,
            shutdown: Shutdown::new(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle that stops [`serve`](Self::serve) when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve on `listener` until shutdown, then drain the pool and persist
    /// the store.
    pub async fn serve(self, listener: TcpListener) -> Result<ShutdownOutcome, StartupError> {
        let sweeper = self
            .state
            .limiter
            .as_ref()
            .map(|limiter| limiter.spawn_sweeper(self.shutdown.subscribe()));

        let server = ApiServer::new(&self.config.server, self.state.clone());
        let served = server.run(listener, self.shutdown.subscribe()).await;

        // The server may also have stopped on an I/O error.
        self.shutdown.trigger();

        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "Rate limiter sweeper ended abnormally");
            }
        }

        let outcome = self
            .pool
            .shutdown(self.config.workers.shutdown_timeout())
            .await;

        if let Err(e) = self.store.save() {
            tracing::error!(error = %e, "Failed to save user snapshot");
        }

        served?;
        tracing::info!(outcome = ?outcome, "Shutdown complete");
        Ok(outcome)
    }
}
