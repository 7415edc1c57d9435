pub mod app;
pub mod input;
pub mod state;

pub use app::ChatApp;
