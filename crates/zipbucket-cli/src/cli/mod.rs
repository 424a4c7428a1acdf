mod app;
mod parse;

pub use app::App;
