//! Gateway server implementation

mod handler;
mod router;
mod server;

pub use handler::{QuotaGate, QuotaStage, proxy_handler};
pub use router::{AppState, create_router};
pub use server::Gateway;
