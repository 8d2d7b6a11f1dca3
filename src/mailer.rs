//! The email outbox and the background worker that delivers it.
//!
//! Emails are queued by inserting a row into the outbox table, which lets
//! callers queue mail inside the same database transaction as the change that
//! caused it. A background task then delivers queued emails and clears their
//! bodies once sent.

use std::sync::{Arc, Mutex};

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
};
use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::{Error, retry::RetryPolicy};

/// How many delivery rounds an email gets before the worker stops trying.
pub const MAX_DELIVERY_ROUNDS: u32 = 5;

/// Create the email outbox table.
pub fn create_email_outbox_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS email_outbox (
            id INTEGER PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            sent_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0
        );",
    )?;

    Ok(())
}

/// An email that has not been queued yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// An email in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEmail {
    pub id: i64,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// The number of failed delivery rounds so far.
    pub attempts: u32,
}

impl QueuedEmail {
    fn map_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            recipient: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            attempts: row.get(4)?,
        })
    }
}

/// Add `email` to the outbox and return its ID.
pub fn queue_email(email: NewEmail, connection: &Connection) -> Result<i64, Error> {
    connection.execute(
        "INSERT INTO email_outbox (recipient, subject, body, created_at) VALUES (?1, ?2, ?3, ?4)",
        (
            email.recipient,
            email.subject,
            email.body,
            OffsetDateTime::now_utc(),
        ),
    )?;

    Ok(connection.last_insert_rowid())
}

/// Get the unsent emails that have failed fewer than [MAX_DELIVERY_ROUNDS]
/// times, oldest first.
pub fn get_unsent_emails(connection: &Connection) -> Result<Vec<QueuedEmail>, Error> {
    connection
        .prepare(
            "SELECT id, recipient, subject, body, attempts FROM email_outbox
            WHERE sent_at IS NULL AND attempts < :max_attempts
            ORDER BY id ASC",
        )?
        .query_map(&[(":max_attempts", &MAX_DELIVERY_ROUNDS)], QueuedEmail::map_row)?
        .map(|maybe_email| maybe_email.map_err(Error::from))
        .collect()
}

/// Mark the email as sent and clear its body, which may hold secrets such as
/// reset-link tokens.
fn mark_email_sent(id: i64, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "UPDATE email_outbox SET sent_at = ?1, body = '' WHERE id = ?2",
        (OffsetDateTime::now_utc(), id),
    )?;

    Ok(())
}

fn record_failed_delivery(id: i64, give_up: bool, connection: &Connection) -> Result<(), Error> {
    if give_up {
        connection.execute(
            "UPDATE email_outbox SET attempts = ?1 WHERE id = ?2",
            (MAX_DELIVERY_ROUNDS, id),
        )?;
    } else {
        connection.execute(
            "UPDATE email_outbox SET attempts = attempts + 1 WHERE id = ?1",
            [id],
        )?;
    }

    Ok(())
}

/// How queued emails leave the server.
pub enum Mailer {
    /// Deliver through an SMTP relay.
    #[allow(missing_docs)]
    Smtp {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    },
    /// Write emails to the log instead of sending them. Used when no SMTP
    /// host is configured.
    Log,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mailer::Smtp { from, .. } => f.debug_struct("Smtp").field("from", from).finish(),
            Mailer::Log => f.write_str("Log"),
        }
    }
}

impl Mailer {
    /// Create a mailer that relays through the SMTP server at `host`:`port`
    /// without TLS, sending from the address `from`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidEmail] if `from` is not a valid mailbox.
    pub fn smtp(host: &str, port: u16, from: &str) -> Result<Self, Error> {
        let from = from
            .parse::<Mailbox>()
            .map_err(|_| Error::InvalidEmail(from.to_owned()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Ok(Mailer::Smtp { transport, from })
    }

    /// Deliver `email`, retrying transient failures according to `retry_policy`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidEmail] if the email cannot be built, or
    /// [Error::EmailError] if every delivery attempt failed.
    pub async fn deliver(
        &self,
        email: &QueuedEmail,
        retry_policy: &RetryPolicy,
    ) -> Result<(), Error> {
        match self {
            Mailer::Log => {
                tracing::info!(
                    "Email delivery is not configured. Email to {} with subject {:?}:\n{}",
                    email.recipient,
                    email.subject,
                    email.body
                );
                Ok(())
            }
            Mailer::Smtp { transport, from } => {
                let message = build_message(from, email)?;

                retry_policy
                    .run(|| {
                        let message = message.clone();
                        async move {
                            transport
                                .send(message)
                                .await
                                .map(|_| ())
                                .map_err(|error| Error::EmailError(error.to_string()))
                        }
                    })
                    .await
            }
        }
    }
}

fn build_message(from: &Mailbox, email: &QueuedEmail) -> Result<Message, Error> {
    let to = email
        .recipient
        .parse::<Mailbox>()
        .map_err(|_| Error::InvalidEmail(email.recipient.clone()))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(&email.subject)
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|error| {
            tracing::error!("Could not build email #{}: {error}", email.id);
            Error::InvalidEmail(email.recipient.clone())
        })
}

/// Make one pass over the outbox, delivering every unsent email.
///
/// Returns the number of emails delivered. The database lock is only held
/// while reading and updating the outbox, never while talking to the mail
/// server.
pub async fn deliver_pending(
    mailer: &Mailer,
    retry_policy: &RetryPolicy,
    db_connection: &Arc<Mutex<Connection>>,
) -> Result<usize, Error> {
    let emails = {
        let connection = db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;
        get_unsent_emails(&connection)?
    };

    let mut delivered = 0;

    for email in emails {
        let result = mailer.deliver(&email, retry_policy).await;

        let connection = db_connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        match result {
            Ok(()) => {
                mark_email_sent(email.id, &connection)?;
                delivered += 1;
            }
            Err(error) => {
                tracing::warn!(
                    "Could not deliver email #{} to {}: {error}",
                    email.id,
                    email.recipient
                );
                record_failed_delivery(email.id, !error.is_retryable(), &connection)?;
            }
        }
    }

    Ok(delivered)
}

/// Deliver queued emails every `poll_interval`, forever.
pub async fn run_outbox_worker(
    mailer: Mailer,
    retry_policy: RetryPolicy,
    db_connection: Arc<Mutex<Connection>>,
    poll_interval: std::time::Duration,
) {
    tracing::info!("Starting email outbox worker with {mailer:?}.");
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        interval.tick().await;

        match deliver_pending(&mailer, &retry_policy, &db_connection).await {
            Ok(0) => {}
            Ok(count) => tracing::info!("Delivered {count} queued email(s)."),
            Err(error) => tracing::error!("Could not process the email outbox: {error}"),
        }
    }
}
