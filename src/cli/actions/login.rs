use crate::{
    auth::{
        BackendIdentity, CallbackParams, ConsoleNavigator, FlowPurpose, MemoryAttemptStore,
        Navigator, OAuthFlow, SessionGuard,
    },
    cli::globals::GlobalArgs,
    config::PortalConfig,
    error::PortalError,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Extension, Router,
};
use secrecy::ExposeSecret;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, debug_span, info, Span};

pub const CALLBACK_PATH: &str = "/callback";

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub issuer: String,
    pub client_id: String,
    pub callback_port: u16,
    pub purpose: FlowPurpose,
}

/// Only the first callback is delivered; later hits get a 410.
type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Run a login or reactivation round trip through a loopback listener.
///
/// # Errors
/// Returns an error if the listener cannot bind, the user aborts, or the
/// callback fails validation or the exchange.
pub async fn execute(args: Args) -> Result<()> {
    let redirect_uri = format!("http://127.0.0.1:{}{CALLBACK_PATH}", args.callback_port);
    let config = PortalConfig::new(
        args.globals.api_url.clone(),
        &args.issuer,
        args.client_id,
        redirect_uri,
    )?;

    let backend = args.globals.backend()?;
    let navigator: Arc<dyn Navigator> = Arc::new(ConsoleNavigator);
    let session = Arc::new(SessionGuard::new(
        Arc::new(BackendIdentity::new(backend.clone())),
        navigator.clone(),
        config.login_path(),
    ));
    let flow = OAuthFlow::new(
        config,
        Arc::new(MemoryAttemptStore::new()),
        backend,
        session,
        navigator,
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], args.callback_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind callback listener on {addr}"))?;
    info!("Listening for the authorization callback on {}", addr);

    let (tx, rx) = oneshot::channel();
    let shutdown = CancellationToken::new();
    let server = {
        let app = router(Arc::new(Mutex::new(Some(tx))));
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        })
    };

    flow.start_login(args.purpose)?;

    let received = tokio::select! {
        params = rx => params.map_err(|_| anyhow!("callback listener stopped")),
        _ = tokio::signal::ctrl_c() => {
            flow.cancel(args.purpose);
            Err(anyhow!("{} cancelled", args.purpose))
        }
    };
    shutdown.cancel();
    if let Err(err) = server.await {
        debug!("callback listener task ended abnormally: {err}");
    }

    let credential = flow
        .handle_callback(args.purpose, &received?)
        .await
        .map_err(|err| callback_failure(args.purpose, err))?;

    println!("Signed in as {}", credential.subject_id());
    if let Some(masked) = credential.claims().masked_national_id() {
        println!("National id: {masked}");
    }
    println!("Session expires at {}", credential.expires_at().to_rfc3339());
    println!(
        "export EKKLESIA_TOKEN={}",
        credential.token().expose_secret()
    );

    Ok(())
}

/// Security failures leave nothing to retry against; the attempt is gone and
/// the operator has to start over.
fn callback_failure(purpose: FlowPurpose, err: PortalError) -> anyhow::Error {
    if err.is_security_failure() {
        anyhow!("{err} Start a new {purpose} attempt.")
    } else {
        err.into()
    }
}

fn router(slot: CallbackSlot) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(slot)),
        )
}

async fn callback(
    Extension(slot): Extension<CallbackSlot>,
    request: Request<Body>,
) -> (StatusCode, &'static str) {
    let params = CallbackParams::from_query(request.uri().query().unwrap_or_default());
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    let delivered = sender.is_some_and(|sender| sender.send(params).is_ok());
    if delivered {
        (
            StatusCode::OK,
            "Authorization received. You can close this window and return to the terminal.",
        )
    } else {
        (StatusCode::GONE, "This login attempt has already completed.")
    }
}

// The query string carries the authorization code, so only the path is recorded.
fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    debug_span!("callback-request", path)
}
