use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "polysock")]
#[command(about = "Transport-independent socket sessions over long-polling and full-duplex channels")]
pub struct Cli {
    /// Use this configuration file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the wire encoding of one frame
    ///
    /// Examples:
    ///   polysock encode --kind ping 1
    ///   polysock encode --kind data --message-type 1 '{"a":1}'
    Encode {
        /// Frame kind: name (session-id, heartbeat-interval, close, ping, pong, data) or code 1-6
        #[arg(short, long, default_value = "data")]
        kind: String,
        /// Message type tag for data frames (0 = text, 1 = JSON)
        #[arg(short, long)]
        message_type: Option<i32>,
        /// Frame payload
        payload: String,
    },

    /// Decode wire text and list its frames
    ///
    /// Trailing bytes that do not form a frame are reported, not treated as
    /// an error, unless --strict is given.
    Decode {
        /// Encoded frames, e.g. '~4~1~7~6~0~2~hi'
        wire: String,
        /// Fail if any input is left over
        #[arg(long)]
        strict: bool,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run the native socket server with an echo application
    Serve {
        /// Address to listen on (overrides the configuration file)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the configuration file location
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
