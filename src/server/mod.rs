pub mod api;

use crate::auth::{ Credentials, TokenSigner };
use crate::cli::Args;
use crate::history::ConversationStore;
use crate::turn::TurnCoordinator;

use axum::extract::FromRef;
use governor::{ DefaultKeyedRateLimiter, Quota, RateLimiter };
use log::{ error, info };
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// How often idle rate-limit buckets are dropped.
const LIMITER_SWEEP: Duration = Duration::from_secs(60);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TurnCoordinator>,
    pub signer: Arc<TokenSigner>,
    pub credentials: Arc<Credentials>,
    /// One bucket per client, see [`api::rate_limit_key`].
    pub limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<TurnCoordinator>,
        signer: TokenSigner,
        credentials: Credentials,
        requests_per_minute: u32
    ) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            coordinator,
            signer: Arc::new(signer),
            credentials: Arc::new(credentials),
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
        }
    }

    pub fn from_args(coordinator: Arc<TurnCoordinator>, args: &Args) -> Self {
        Self::new(
            coordinator,
            TokenSigner::new(&args.jwt_secret, args.token_ttl_hours),
            Credentials::new(args.auth_user.clone(), args.auth_password_sha256.clone()),
            args.rate_limit_per_minute
        )
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        self.coordinator.store()
    }
}

impl FromRef<AppState> for Arc<TokenSigner> {
    fn from_ref(state: &AppState) -> Self {
        state.signer.clone()
    }
}

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, coordinator: Arc<TurnCoordinator>, args: Args) -> Self {
        let state = AppState::from_args(coordinator, &args);
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = api::build_router(self.state.clone(), &self.args.frontend_url)?;

        let limiter = self.state.limiter.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(LIMITER_SWEEP);
            loop {
                sweep.tick().await;
                limiter.retain_recent();
                limiter.shrink_to_fit();
            }
        });

        match (&self.args.tls_cert_path, &self.args.tls_key_path) {
            (Some(cert_path), Some(key_path)) if self.args.enable_tls => {
                let tls_config = axum_server::tls_rustls::RustlsConfig
                    ::from_pem_file(cert_path, key_path).await
                    .map_err(|e| format!("Failed to load TLS certificate/key: {}", e))?;
                info!("HTTPS API listening on: https://{}", addr);
                axum_server
                    ::bind_rustls(addr, tls_config)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>()).await?;
            }
            _ => {
                let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                    error!("Failed to bind HTTP server to {}: {}", addr, e);
                    e
                })?;
                info!("HTTP API listening on: http://{}", addr);
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>()
                ).await?;
            }
        }

        Ok(())
    }
}
