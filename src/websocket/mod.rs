mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{
    shutdown_notice, SocketCommand, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, GOING_AWAY_REASON,
    GREETING,
};
