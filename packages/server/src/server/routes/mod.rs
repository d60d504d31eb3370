pub mod gallery;
pub mod health;
pub mod login;
pub mod status;
pub mod submit;

pub use gallery::gallery_handler;
pub use health::health_handler;
pub use login::login_handler;
pub use status::status_handler;
pub use submit::submit_handler;
