pub mod subscribe;

pub use subscribe::handle_subscribe;
