pub mod login;

pub use login::{LoginResponse, LoginService};
