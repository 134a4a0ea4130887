mod handler;
mod line_handler;
mod pickle_handler;
mod tcp_server;

pub use handler::ConnectionHandler;
pub use line_handler::LineHandler;
pub use pickle_handler::PickleHandler;
pub use tcp_server::{bind_shared, TcpServer, BACKLOG};
