use std::{error::Error, io, path::Path, process::exit};

use bcrypt::DEFAULT_COST;
use clap::Parser;
use rusqlite::Connection;

use spendwise::{
    CredentialStore, Registration, Role, SQLiteCredentialStore, ValidatedPassword,
    count_accounts_with_role, initialize_db,
};

/// A utility for creating an admin account, who can review password reset
/// requests.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The username of the new admin.
    #[arg(long)]
    username: String,

    /// The email address of the new admin.
    #[arg(long)]
    email: String,

    /// The full name of the new admin.
    #[arg(long)]
    full_name: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let db_path = Path::new(&args.db_path);
    validate_db_path(db_path);

    let connection = Connection::open(db_path)?;
    initialize_db(&connection)?;

    let admin_count = count_accounts_with_role(Role::Admin, &connection)?;
    println!("The database at {db_path:#?} has {admin_count} admin(s).");

    let password = match get_new_password() {
        Some(password) => password,
        None => return Ok(()),
    };

    // Reset links are never sent to accounts created here.
    let credentials = SQLiteCredentialStore::new("", DEFAULT_COST);
    let registration = Registration {
        username: args.username,
        email: args.email,
        full_name: args.full_name,
        password,
        role: Role::Admin,
    };

    match credentials.create_account(registration, &connection) {
        Ok(account) => {
            println!("Created admin {} with ID {}.", account.username, account.id);
            Ok(())
        }
        Err(error) => {
            print_error(&error);
            exit(1);
        }
    }
}

fn validate_db_path(db_path: &Path) {
    match db_path.extension() {
        Some(extension) if !extension.is_empty() => {}
        _ => {
            print_error("Database path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
    }

    if db_path.is_dir() {
        print_error(format!("{db_path:#?} is a directory"));
        exit(1);
    }
}

fn get_new_password() -> Option<ValidatedPassword> {
    loop {
        println!();

        let first_password = read_password("Enter a password for the admin: ")?;

        let password = match ValidatedPassword::new(&first_password) {
            Ok(password) => password,
            Err(error) => {
                print_error(error);
                continue;
            }
        };

        let second_password = read_password("Enter the same password again: ")?;

        if first_password != second_password {
            print_error("Passwords must match, try again.");
            continue;
        }

        return Some(password);
    }
}

/// Returns `None` if the user closed stdin or it could not be read.
fn read_password(prompt: &str) -> Option<String> {
    match rpassword::prompt_password(prompt) {
        Ok(string) => Some(string),
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => None,
        Err(error) => {
            print_error(format!("Could not read password from stdin: {error}"));
            None
        }
    }
}

fn print_error(error: impl ToString) {
    eprintln!(
        "\x1b[31;1m{}\x1b[0m",
        capitalise_first_char(&error.to_string())
    )
}

/// From https://crates.io/crates/capitalize
fn capitalise_first_char(string: &str) -> String {
    let mut chars = string.chars();
    let Some(first) = chars.next() else {
        return String::with_capacity(0);
    };
    first.to_uppercase().chain(chars).collect()
}
