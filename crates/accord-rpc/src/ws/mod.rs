pub mod events;
pub mod server;

pub use events::WsEvent;
pub use server::create_ws_router;
