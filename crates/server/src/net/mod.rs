pub mod listener;
pub mod login;
pub mod session;
