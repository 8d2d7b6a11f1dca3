//! Creates the application's tables.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::{
    Error, auth::create_account_table, credentials::create_reset_token_table,
    mailer::create_email_outbox_table, reset_request::create_reset_request_table,
};

/// Create the tables for the domain models if they do not exist yet, and turn
/// on foreign key checks.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction = Transaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_account_table(&transaction)?;
    create_reset_request_table(&transaction)?;
    create_reset_token_table(&transaction)?;
    create_email_outbox_table(&transaction)?;

    transaction.commit()?;

    // Has no effect inside a transaction.
    connection.pragma_update(None, "foreign_keys", true)?;

    Ok(())
}

#[cfg(test)]
mod initialize_tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn creates_all_tables() {
        let connection = Connection::open_in_memory().unwrap();

        initialize(&connection).unwrap();

        let mut tables: Vec<String> = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        tables.retain(|name| !name.starts_with("sqlite_"));
        assert_eq!(
            tables,
            vec!["account", "email_outbox", "reset_request", "reset_token"]
        );
    }

    #[test]
    fn can_run_twice() {
        let connection = Connection::open_in_memory().unwrap();

        initialize(&connection).unwrap();

        assert_eq!(initialize(&connection), Ok(()));
    }

    #[test]
    fn enables_foreign_keys() {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();

        let enabled: bool = connection
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();

        assert!(enabled);
    }
}
