//! Accounts, passwords, sessions and the endpoints for logging in and out.

mod account;
mod caller;
mod log_in;
mod log_out;
mod password;
mod register_user;
mod session;

pub use account::{
    Account, AccountId, AccountRef, NewAccount, Role, count_accounts_with_role,
    create_account_table, insert_account, resolve_account, update_password_hash,
};
pub use caller::{Caller, resolve_caller};
pub use log_in::post_log_in;
pub use log_out::post_log_out;
pub use password::{PasswordHash, ValidatedPassword};
pub use register_user::register_user;
pub use session::{
    DEFAULT_COOKIE_DURATION, REMEMBER_ME_COOKIE_DURATION, invalidate_auth_cookie, set_auth_cookie,
};

#[cfg(test)]
pub use account::{get_account_by_id, get_account_by_username};
#[cfg(test)]
pub use session::COOKIE_TOKEN;
