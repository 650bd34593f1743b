pub mod commands;
pub mod echo;
pub mod error_handler;
pub mod inspect;

pub use commands::{Cli, Commands, ConfigCommand};
pub use echo::EchoApplication;
pub use error_handler::CliError;
pub use inspect::{decode_wire, encode_frame, parse_frame_kind, DecodeReport};
