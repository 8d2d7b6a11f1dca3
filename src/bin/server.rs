use std::{env, fs::OpenOptions, net::SocketAddr, process::exit, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{MatchedPath, Request},
};
use axum_server::Handle;
use bcrypt::DEFAULT_COST;
use clap::Parser;
use rusqlite::Connection;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use spendwise::{
    AppState, Mailer, RetryPolicy, SQLiteCredentialStore, build_router, graceful_shutdown,
    run_outbox_worker,
};

/// The REST API server for SpendWise password resets.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// The public address of the app, used to build the links in reset emails.
    #[arg(long, default_value = "http://localhost:3000")]
    base_url: String,

    /// The SMTP relay used to send emails. Emails are written to the log if
    /// this is not set.
    #[arg(long)]
    smtp_host: Option<String>,

    /// The port of the SMTP relay.
    #[arg(long, default_value_t = 25)]
    smtp_port: u16,

    /// The address emails are sent from.
    #[arg(long, default_value = "SpendWise <no-reply@spendwise.local>")]
    mail_from: String,

    /// How often to check the outbox for unsent emails.
    #[arg(long, default_value_t = 5)]
    outbox_poll_seconds: u64,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let Ok(secret) = env::var("SECRET") else {
        tracing::error!("The environment variable 'SECRET' must be set");
        exit(1);
    };

    let conn = match Connection::open(&args.db_path) {
        Ok(conn) => conn,
        Err(error) => {
            tracing::error!("Could not open the database at {}: {error}", args.db_path);
            exit(1);
        }
    };

    let credentials = Arc::new(SQLiteCredentialStore::new(&args.base_url, DEFAULT_COST));
    let app_state = match AppState::new(conn, &secret, credentials) {
        Ok(app_state) => app_state,
        Err(error) => {
            tracing::error!("Could not initialize the database: {error}");
            exit(1);
        }
    };

    let mailer = match &args.smtp_host {
        Some(host) => match Mailer::smtp(host, args.smtp_port, &args.mail_from) {
            Ok(mailer) => mailer,
            Err(error) => {
                tracing::error!("Could not set up the SMTP mailer: {error}");
                exit(1);
            }
        },
        None => Mailer::Log,
    };

    tokio::spawn(run_outbox_worker(
        mailer,
        RetryPolicy::default(),
        app_state.db_connection.clone(),
        Duration::from_secs(args.outbox_poll_seconds),
    ));

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(app_state));

    tracing::info!("HTTP server listening on {}", addr);
    if let Err(error) = axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
    {
        tracing::error!("Server stopped with an error: {error}");
        exit(1);
    }
}

fn setup_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(env_filter);

    let debug_log = match OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
    {
        Ok(log_file) => Some(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(Arc::new(log_file))
                .with_filter(filter::LevelFilter::DEBUG),
        ),
        Err(error) => {
            eprintln!("Could not create log file, logging to stdout only: {error}");
            None
        }
    };

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(debug_log)
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // Errors are logged where they happen.
        .on_failure(());

    router.layer(tracing_layer)
}
